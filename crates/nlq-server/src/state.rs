//! Shared process state: the database pool, the LLM client, the resolved
//! configuration, and a per-`database_id` schema catalog cache.
//!
//! Grounded on the teacher's pattern of handing one `Arc`-wrapped handle to
//! every request path rather than opening resources per call.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;

use nlq_core::config::Config;
use nlq_core::llm::LlmClient;
use nlq_core::schema::catalog::{CatalogError, SchemaCatalog};

pub struct AppState {
    pub pool: PgPool,
    pub llm: LlmClient,
    pub config: Config,
    catalogs: RwLock<HashMap<String, Arc<SchemaCatalog>>>,
}

impl AppState {
    pub fn new(pool: PgPool, llm: LlmClient, config: Config) -> Self {
        Self {
            pool,
            llm,
            config,
            catalogs: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached catalog for `database_id`, loading it from Postgres
    /// on first use. Never reloaded implicitly afterwards.
    pub async fn catalog(&self, database_id: &str) -> Result<Arc<SchemaCatalog>, CatalogError> {
        if let Some(catalog) = self.catalogs.read().await.get(database_id) {
            return Ok(Arc::clone(catalog));
        }
        let loaded = Arc::new(SchemaCatalog::load(&self.pool, database_id).await?);
        self.catalogs
            .write()
            .await
            .insert(database_id.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Drop the cached catalog for `database_id`, forcing the next request
    /// to reload it from Postgres.
    pub async fn invalidate(&self, database_id: &str) {
        self.catalogs.write().await.remove(database_id);
    }
}

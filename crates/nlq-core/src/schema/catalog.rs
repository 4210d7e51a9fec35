//! Persistent schema catalog backed by Postgres.
//!
//! Grounded on the connection-acquisition and sequential-fetch style of a
//! `sqlx::PgPool`-based catalog loader: acquire one connection, pin the
//! search path, then run each fetch in turn rather than fanning out many
//! concurrent queries against a single connection.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnEntry {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub references: Option<FkEdge>,
    pub gloss: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FkEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableEntry {
    pub table_name: String,
    pub table_schema: String,
    pub module: Option<String>,
    pub gloss: Option<String>,
    pub is_hub: bool,
    pub columns: Vec<ColumnEntry>,
}

impl TableEntry {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table_schema, self.table_name)
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// What a [`SchemaEmbeddingRecord`] describes: a whole table, a single
/// column, or a module summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingEntityType {
    Table,
    Column,
    Module,
}

/// One row of the dense + keyword index. Uniqueness key is conceptually
/// `(entity_type, schema, table_name, column_name, model_id, dim)` -- the
/// same table can carry a table-level row, one row per non-trivial column,
/// and its module can carry its own summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaEmbeddingRecord {
    pub entity_type: EmbeddingEntityType,
    pub schema: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub embed_text: String,
    pub embedding: Vec<f32>,
    pub search_vector_text: String,
    pub model_id: String,
    pub dim: usize,
}

/// In-memory view of a database's schema, loaded once per `database_id` and
/// reused across requests. Reload is an explicit, infrequent operation
/// (`rebuild_embeddings`), never triggered implicitly mid-request.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    pub database_id: String,
    pub tables: Vec<TableEntry>,
    pub fk_edges: Vec<FkEdge>,
    pub embeddings: Vec<SchemaEmbeddingRecord>,
}

impl SchemaCatalog {
    /// Load table/column/FK metadata for `database_id` from the catalog
    /// tables `schema_tables`, `schema_columns`, `schema_fks`.
    pub async fn load(pool: &PgPool, database_id: &str) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("SET search_path = public, pg_catalog")
            .execute(&mut *conn)
            .await?;

        let table_rows: Vec<(String, String, Option<String>, Option<String>, bool)> = sqlx::query_as(
            "SELECT table_name, table_schema, module, gloss, is_hub \
             FROM schema_tables WHERE database_id = $1 ORDER BY table_name",
        )
        .bind(database_id)
        .fetch_all(&mut *conn)
        .await?;

        let fk_rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT from_table, from_column, to_table, to_column \
             FROM schema_fks WHERE database_id = $1",
        )
        .bind(database_id)
        .fetch_all(&mut *conn)
        .await?;
        let fk_edges: Vec<FkEdge> = fk_rows
            .into_iter()
            .map(|(from_table, from_column, to_table, to_column)| FkEdge {
                from_table,
                from_column,
                to_table,
                to_column,
            })
            .collect();

        let mut tables = Vec::with_capacity(table_rows.len());
        for (table_name, table_schema, module, gloss, is_hub) in table_rows {
            let column_rows: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(
                "SELECT column_name, data_type, is_primary_key, gloss \
                 FROM schema_columns WHERE database_id = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
            )
            .bind(database_id)
            .bind(&table_name)
            .fetch_all(&mut *conn)
            .await?;

            let columns = column_rows
                .into_iter()
                .map(|(name, data_type, is_primary_key, gloss)| {
                    let references = fk_edges
                        .iter()
                        .find(|fk| fk.from_table == table_name && fk.from_column == name)
                        .cloned();
                    ColumnEntry {
                        name,
                        data_type,
                        is_primary_key,
                        references,
                        gloss,
                    }
                })
                .collect();

            tables.push(TableEntry {
                table_name,
                table_schema,
                module,
                gloss,
                is_hub,
                columns,
            });
        }

        Ok(Self {
            database_id: database_id.to_string(),
            tables,
            fk_edges,
            embeddings: Vec::new(),
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    pub fn neighbors_of(&self, table_name: &str) -> Vec<&FkEdge> {
        self.fk_edges
            .iter()
            .filter(|fk| fk.from_table == table_name || fk.to_table == table_name)
            .collect()
    }

    /// Recompute `embed_text` / `search_vector_text` for every table, every
    /// non-trivial column (timestamps excluded), and every module, attaching
    /// embeddings produced by the caller-supplied closure. This is the only
    /// place the catalog's dense/keyword index changes. Module summaries
    /// cover the module's first few tables, per `model_id`'s row count.
    pub async fn rebuild_embeddings<F, Fut>(&mut self, model_id: &str, mut embed: F) -> Result<()>
    where
        F: FnMut(String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<Vec<f32>, CatalogError>>,
    {
        const MODULE_SUMMARY_TABLE_LIMIT: usize = 5;

        let mut embeddings = Vec::new();
        for table in &self.tables {
            let embed_text = table_embed_text(table);
            let search_vector_text = keyword_text(table);
            let vector = embed(embed_text.clone()).await?;
            let dim = vector.len();
            embeddings.push(SchemaEmbeddingRecord {
                entity_type: EmbeddingEntityType::Table,
                schema: table.table_schema.clone(),
                table_name: table.table_name.clone(),
                column_name: None,
                embed_text,
                embedding: vector,
                search_vector_text,
                model_id: model_id.to_string(),
                dim,
            });

            for column in &table.columns {
                if is_trivial_column(&column.data_type) {
                    continue;
                }
                let embed_text = column_embed_text(table, column);
                let vector = embed(embed_text.clone()).await?;
                let dim = vector.len();
                embeddings.push(SchemaEmbeddingRecord {
                    entity_type: EmbeddingEntityType::Column,
                    schema: table.table_schema.clone(),
                    table_name: table.table_name.clone(),
                    column_name: Some(column.name.clone()),
                    embed_text,
                    embedding: vector,
                    search_vector_text: format!("{} {}", table.table_name, column.name),
                    model_id: model_id.to_string(),
                    dim,
                });
            }
        }

        let mut by_module: std::collections::BTreeMap<String, Vec<&TableEntry>> = std::collections::BTreeMap::new();
        for table in &self.tables {
            if let Some(module) = &table.module {
                by_module.entry(module.clone()).or_default().push(table);
            }
        }
        for (module, tables) in by_module {
            let schema = tables[0].table_schema.clone();
            let summary: Vec<&str> = tables
                .iter()
                .take(MODULE_SUMMARY_TABLE_LIMIT)
                .map(|t| t.table_name.as_str())
                .collect();
            let embed_text = format!("Module: {}\nTables: {}", module, summary.join(", "));
            let vector = embed(embed_text.clone()).await?;
            let dim = vector.len();
            embeddings.push(SchemaEmbeddingRecord {
                entity_type: EmbeddingEntityType::Module,
                schema,
                table_name: module.clone(),
                column_name: None,
                embed_text,
                embedding: vector,
                search_vector_text: format!("module {}", module),
                model_id: model_id.to_string(),
                dim,
            });
        }

        self.embeddings = embeddings;
        Ok(())
    }
}

fn is_trivial_column(data_type: &str) -> bool {
    let lower = data_type.to_lowercase();
    lower.contains("timestamp") || lower == "date" || lower == "time"
}

fn table_embed_text(table: &TableEntry) -> String {
    let mut text = format!("Table: {}\nModule: {}\nDescription: {}\nColumns:\n", table.table_name, table.module.as_deref().unwrap_or(""), table.gloss.as_deref().unwrap_or(""));
    for column in &table.columns {
        text.push_str(&format!("  {} ({})", column.name, column.data_type));
        if column.is_primary_key {
            text.push_str(" [PK]");
        }
        if let Some(fk) = &column.references {
            text.push_str(&format!(" [FK->{}.{}]", fk.to_table, fk.to_column));
        }
        text.push('\n');
    }
    let fks: Vec<&FkEdge> = table.columns.iter().filter_map(|c| c.references.as_ref()).collect();
    if !fks.is_empty() {
        text.push_str("Foreign Keys:\n");
        for fk in fks {
            text.push_str(&format!("  {} -> {}.{}\n", fk.from_column, fk.to_table, fk.to_column));
        }
    }
    text
}

fn column_embed_text(table: &TableEntry, column: &ColumnEntry) -> String {
    let mut text = format!("Column: {}.{} ({})", table.table_name, column.name, column.data_type);
    if column.is_primary_key {
        text.push_str(" [PK]");
    }
    if let Some(fk) = &column.references {
        text.push_str(&format!(" [FK->{}.{}]", fk.to_table, fk.to_column));
    }
    text.push_str(&format!(" in {} module", table.module.as_deref().unwrap_or("none")));
    text
}

fn keyword_text(table: &TableEntry) -> String {
    let mut parts = vec![table.table_name.clone()];
    if let Some(gloss) = &table.gloss {
        parts.push(gloss.clone());
    }
    for column in &table.columns {
        parts.push(column.name.clone());
        if let Some(gloss) = &column.gloss {
            parts.push(gloss.clone());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn companies_table() -> TableEntry {
        TableEntry {
            table_name: "companies".into(),
            table_schema: "public".into(),
            module: Some("core".into()),
            gloss: Some("100 companies with founding year and US state".into()),
            is_hub: true,
            columns: vec![
                ColumnEntry {
                    name: "company_id".into(),
                    data_type: "integer".into(),
                    is_primary_key: true,
                    references: None,
                    gloss: None,
                },
                ColumnEntry {
                    name: "name".into(),
                    data_type: "text".into(),
                    is_primary_key: false,
                    references: None,
                    gloss: None,
                },
            ],
        }
    }

    #[test]
    fn qualified_name_joins_schema_and_table() {
        assert_eq!(companies_table().qualified_name(), "public.companies");
    }

    #[test]
    fn primary_key_returns_pk_columns_only() {
        assert_eq!(companies_table().primary_key(), vec!["company_id"]);
    }

    #[test]
    fn keyword_text_includes_table_and_column_names() {
        let text = keyword_text(&companies_table());
        assert!(text.contains("companies"));
        assert!(text.contains("company_id"));
        assert!(text.contains("name"));
    }
}

//! Assembles the axum [`Router`]: the JSON-RPC envelope, its REST aliases,
//! and a bare `/health` route, wrapped in the same tracing/CORS/concurrency
//! layers the teacher's dashboard server applies.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::protocol::{rest, rpc};
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc::handle))
        .route("/v1/generate_and_run", post(rest::generate_and_run))
        .route("/v1/embed", post(rest::embed))
        .route("/v1/embed_batch", post(rest::embed_batch))
        .route("/v1/repair_sql", post(rest::repair_sql))
        .route("/v1/invalidate_cache", post(rest::invalidate_cache))
        .route("/health", get(rest::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(ConcurrencyLimitLayer::new(64))
        .with_state(state)
}

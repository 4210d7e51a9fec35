//! Plain REST aliases (`POST /v1/<method>`) for callers that would rather
//! not construct a JSON-RPC envelope. Each alias calls the same
//! [`crate::dispatch::dispatch`] table `POST /rpc` uses.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use super::types::JsonRpcError;
use crate::dispatch::dispatch;
use crate::state::AppState;

pub(crate) struct RestError(JsonRpcError);

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            -32602 => StatusCode::BAD_REQUEST,
            -32601 => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0)).into_response()
    }
}

async fn alias(method: &str, state: &AppState, params: Value) -> Result<Json<Value>, RestError> {
    dispatch(method, Some(params), state).await.map(Json).map_err(RestError)
}

pub async fn generate_and_run(State(state): State<Arc<AppState>>, Json(params): Json<Value>) -> Result<Json<Value>, RestError> {
    alias("generate_and_run", &state, params).await
}

pub async fn embed(State(state): State<Arc<AppState>>, Json(params): Json<Value>) -> Result<Json<Value>, RestError> {
    alias("embed", &state, params).await
}

pub async fn embed_batch(State(state): State<Arc<AppState>>, Json(params): Json<Value>) -> Result<Json<Value>, RestError> {
    alias("embed_batch", &state, params).await
}

pub async fn repair_sql(State(state): State<Arc<AppState>>, Json(params): Json<Value>) -> Result<Json<Value>, RestError> {
    alias("repair_sql", &state, params).await
}

pub async fn invalidate_cache(State(state): State<Arc<AppState>>, Json(params): Json<Value>) -> Result<Json<Value>, RestError> {
    alias("invalidate_cache", &state, params).await
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, RestError> {
    dispatch("health", None, &state).await.map(Json).map_err(RestError)
}

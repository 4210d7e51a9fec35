//! `POST /rpc`: the JSON-RPC 2.0 envelope over [`crate::dispatch::dispatch`].

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use super::types::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use crate::dispatch::dispatch;
use crate::state::AppState;

pub async fn handle(State(state): State<Arc<AppState>>, Json(request): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Json(JsonRpcResponse::error(
            request.id,
            super::types::JsonRpcError::invalid_params("jsonrpc must be \"2.0\""),
        ));
    }

    match dispatch(&request.method, request.params, &state).await {
        Ok(result) => Json(JsonRpcResponse::success(request.id, result)),
        Err(error) => Json(JsonRpcResponse::error(request.id, error)),
    }
}

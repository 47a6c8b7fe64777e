use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let coordination = &state.config.coordination;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store_backend,
        "pending_handoffs": state.engine.scheduler().pending().len(),
        "debounce_ms": coordination.debounce_ms,
        "max_wait_ms": coordination.max_wait_ms,
    }))
}

//! Proactive sends: POST /proactive.
//!
//! Answers as soon as the request is validated and queued. Whether the
//! message actually reached the user is only visible in the logs and the
//! conversation history.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use parley_engine::{EngineError, ProactiveRequest};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::app::AppState;

pub async fn proactive_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let request: ProactiveRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid proactive request body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "errors": [{"field": "body", "message": e.to_string()}],
            })),
        )
    })?;

    match state.proactive.submit(request).await {
        Ok(request_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "request_id": request_id})),
        )),
        Err(EngineError::Invalid(errors)) => {
            warn!(errors = errors.len(), "proactive request rejected");
            Err((StatusCode::BAD_REQUEST, Json(json!({"errors": errors}))))
        }
        Err(e) => {
            error!(error = %e, "proactive request could not be queued");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "proactive delivery unavailable"})),
            ))
        }
    }
}

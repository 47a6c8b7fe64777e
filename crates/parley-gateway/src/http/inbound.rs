//! Inbound ingress: POST /inbound.
//!
//! The channel adapter posts one normalised envelope per user message. The
//! request is stamped and acknowledged before any coordination work runs;
//! malformed envelopes are dropped inside the engine with a log line.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use parley_engine::InboundEnvelope;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::AppState;

pub async fn inbound_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let envelope: InboundEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid JSON in inbound body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })?;

    let envelope = envelope.received_now();
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        let outcome = engine.handle_inbound(envelope).await;
        debug!(?outcome, "inbound unit handled");
    });

    Ok((StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))))
}

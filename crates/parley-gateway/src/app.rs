use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use parley_core::ParleyConfig;
use parley_engine::{Engine, ProactiveQueue};

/// Shared state handed to every handler as `Arc<AppState>`.
pub struct AppState {
    pub config: ParleyConfig,
    pub engine: Arc<Engine>,
    pub proactive: ProactiveQueue,
    /// Label of the coordination store backend, for `/health`.
    pub store_backend: String,
}

impl AppState {
    pub fn new(
        config: ParleyConfig,
        engine: Arc<Engine>,
        proactive: ProactiveQueue,
        store_backend: impl Into<String>,
    ) -> Self {
        Self {
            config,
            engine,
            proactive,
            store_backend: store_backend.into(),
        }
    }
}

/// Assemble the router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/inbound", post(crate::http::inbound::inbound_handler))
        .route("/proactive", post(crate::http::proactive::proactive_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use parley_agent::{AgentClient, AgentError, AgentReply, AgentRequest};
    use parley_channels::{Channel, ChannelError, OutboundMessage};
    use parley_engine::run_proactive_worker;
    use parley_sessions::ConversationStore;
    use parley_store::MemoryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl AgentClient for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &AgentRequest) -> Result<AgentReply, AgentError> {
            Ok(AgentReply {
                reply_text: format!("eco: {}", req.combined_text),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }
        async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
        async fn mark_read(&self, _message_id: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    /// The shutdown sender must outlive the test or the hand-off loop stops.
    fn app() -> (Router, Arc<RecordingChannel>, tokio::sync::watch::Sender<bool>) {
        let config = ParleyConfig::default();
        let channel = Arc::new(RecordingChannel::default());
        let conversations = Arc::new(
            ConversationStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let (engine, fired_rx) = Engine::new(
            &config.coordination,
            Arc::new(MemoryStore::new()),
            conversations,
            Arc::new(EchoAgent),
            channel.clone(),
        );
        let engine = Arc::new(engine);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(Arc::clone(&engine).run(fired_rx, shutdown_rx));

        let (proactive, rx) = ProactiveQueue::new(8);
        tokio::spawn(run_proactive_worker(
            rx,
            Arc::clone(engine.resolver()),
            channel.clone(),
        ));

        let state = Arc::new(AppState::new(config, engine, proactive, "memory"));
        (build_router(state), channel, shutdown_tx)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_sent(channel: &RecordingChannel, count: usize) {
        for _ in 0..500 {
            if channel.sent.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("channel never sent {count} messages");
    }

    #[tokio::test]
    async fn health_reports_store_backend() {
        let (router, _, _shutdown) = app();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn inbound_is_acknowledged_and_answered() {
        let (router, channel, _shutdown) = app();
        let response = router
            .oneshot(post_json(
                "/inbound",
                json!({
                    "address": "34600111222",
                    "messageId": "wamid.1",
                    "kind": "text",
                    "body": "Necesito información",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        wait_sent(&channel, 1).await;
        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(sent[0].recipient, "34600111222");
        assert_eq!(sent[0].text_content(), "eco: Necesito información");
    }

    #[tokio::test]
    async fn inbound_with_bad_json_is_rejected() {
        let (router, _, _shutdown) = app();
        let response = router
            .oneshot(
                Request::post("/inbound")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn proactive_is_accepted_with_request_id() {
        let (router, channel, _shutdown) = app();
        let response = router
            .oneshot(post_json(
                "/proactive",
                json!({
                    "phone": "+34 600 111 222",
                    "message": "¿Confirmas tu cita?",
                    "messageType": "buttons",
                    "buttons": [{"id": "yes", "title": "Sí"}, {"id": "no", "title": "No"}],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));

        wait_sent(&channel, 1).await;
    }

    #[tokio::test]
    async fn proactive_validation_errors_are_listed() {
        let (router, channel, _shutdown) = app();
        let response = router
            .oneshot(post_json(
                "/proactive",
                json!({ "phone": "123", "message": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["field"].as_str())
            .collect();
        assert_eq!(fields, ["phone", "message"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.sent.lock().unwrap().is_empty());
    }
}

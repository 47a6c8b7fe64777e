//! Externally triggered outbound sends.
//!
//! [`ProactiveQueue::submit`] validates a request and queues it; the caller
//! gets a request id back before anything is sent. [`run_proactive_worker`]
//! drains the queue. Delivery failures are logged and never reach the caller.

use std::fmt;
use std::sync::Arc;

use parley_channels::{Button, Channel, OutboundMessage, MAX_BUTTONS, MAX_BUTTON_TITLE_CHARS};
use parley_core::Address;
use parley_sessions::{NewMessage, Role, SessionResolver};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};

const PHONE_MIN_DIGITS: usize = 8;
const PHONE_MAX_DIGITS: usize = 20;
const MESSAGE_MAX_CHARS: usize = 4096;

/// Agent id recorded on proactive history rows.
const PROACTIVE_AGENT_ID: &str = "platform";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProactiveMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

/// Body of `POST /proactive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveRequest {
    pub phone: String,
    pub message: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub buttons: Option<Vec<Button>>,
    #[serde(default)]
    pub metadata: Option<ProactiveMetadata>,
}

fn default_message_type() -> String {
    "text".to_string()
}

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A validated request waiting for the worker.
#[derive(Debug, Clone)]
pub struct ProactiveJob {
    pub request_id: String,
    pub address: Address,
    pub message: OutboundMessage,
    pub metadata: ProactiveMetadata,
}

impl ProactiveRequest {
    /// Check the request shape. Every problem is reported, not just the first.
    pub fn validate(self) -> std::result::Result<ProactiveJob, Vec<FieldError>> {
        let mut errors = Vec::new();

        let digits: String = self
            .phone
            .trim()
            .trim_start_matches('+')
            .chars()
            .filter(|c| *c != ' ' && *c != '-')
            .collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            errors.push(FieldError::new("phone", "must contain only digits"));
        } else if !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits.len()) {
            errors.push(FieldError::new(
                "phone",
                format!("must have {PHONE_MIN_DIGITS}-{PHONE_MAX_DIGITS} digits"),
            ));
        }

        let text = self.message.trim();
        if text.is_empty() {
            errors.push(FieldError::new("message", "must not be empty"));
        } else if text.chars().count() > MESSAGE_MAX_CHARS {
            errors.push(FieldError::new(
                "message",
                format!("must be at most {MESSAGE_MAX_CHARS} characters"),
            ));
        }

        let buttons = match self.message_type.as_str() {
            "text" => None,
            "buttons" => {
                let buttons = self.buttons.unwrap_or_default();
                if buttons.is_empty() || buttons.len() > MAX_BUTTONS {
                    errors.push(FieldError::new(
                        "buttons",
                        format!("must contain 1-{MAX_BUTTONS} buttons"),
                    ));
                }
                for (i, button) in buttons.iter().enumerate() {
                    if button.id.trim().is_empty() {
                        errors.push(FieldError::new(format!("buttons[{i}].id"), "must not be empty"));
                    }
                    let title_len = button.title.trim().chars().count();
                    if title_len == 0 || title_len > MAX_BUTTON_TITLE_CHARS {
                        errors.push(FieldError::new(
                            format!("buttons[{i}].title"),
                            format!("must be 1-{MAX_BUTTON_TITLE_CHARS} characters"),
                        ));
                    }
                }
                Some(buttons)
            }
            other => {
                errors.push(FieldError::new(
                    "messageType",
                    format!("must be \"text\" or \"buttons\", got {other:?}"),
                ));
                None
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }
        let address = Address::parse(&digits)
            .map_err(|e| vec![FieldError::new("phone", e.to_string())])?;
        let message = match buttons {
            Some(buttons) => OutboundMessage::buttons(address.as_str(), text, buttons),
            None => OutboundMessage::text(address.as_str(), text),
        };
        Ok(ProactiveJob {
            request_id: Uuid::new_v4().to_string(),
            address,
            message,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

/// Producer side of the proactive queue.
#[derive(Clone)]
pub struct ProactiveQueue {
    tx: mpsc::Sender<ProactiveJob>,
}

impl ProactiveQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProactiveJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Validate and enqueue. Returns the request id once queued; waits while
    /// the queue is full.
    pub async fn submit(&self, request: ProactiveRequest) -> Result<String> {
        let job = request.validate().map_err(EngineError::Invalid)?;
        let request_id = job.request_id.clone();
        info!(request_id = %request_id, address = %job.address, "proactive request accepted");
        self.tx
            .send(job)
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        Ok(request_id)
    }
}

/// Deliver queued proactive sends until every [`ProactiveQueue`] is dropped.
pub async fn run_proactive_worker(
    mut rx: mpsc::Receiver<ProactiveJob>,
    resolver: Arc<SessionResolver>,
    channel: Arc<dyn Channel>,
) {
    while let Some(job) = rx.recv().await {
        if let Err(e) = deliver(&job, &resolver, channel.as_ref()).await {
            error!(request_id = %job.request_id, address = %job.address, error = %e, "proactive send failed");
        }
    }
    info!("proactive worker exiting (queue closed)");
}

async fn deliver(job: &ProactiveJob, resolver: &SessionResolver, channel: &dyn Channel) -> Result<()> {
    let conversation = resolver.current(&job.address).await?;
    channel.send(&job.message).await?;

    let metadata = serde_json::json!({
        "proactive": true,
        "source": job.metadata.source.as_deref().unwrap_or("manual"),
        "reference_id": job.metadata.reference_id,
        "triggered_by": job.metadata.triggered_by,
        "request_id": job.request_id,
    });
    let conversations = resolver.conversations();
    conversations.save_message(&NewMessage {
        address: job.address.clone(),
        thread_id: conversation.thread_id,
        role: Role::System,
        content: job.message.text_content().to_string(),
        agent_id: Some(PROACTIVE_AGENT_ID.to_string()),
        metadata: Some(metadata),
    })?;
    conversations.increment_message_count(&job.address, 1)?;

    info!(request_id = %job.request_id, address = %job.address, "proactive message delivered");
    Ok(())
}

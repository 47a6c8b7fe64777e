//! WhatsApp Cloud API adapter.
//!
//! All sends go to `POST {base_url}/{api_version}/{phone_number_id}/messages`
//! with a bearer token. Read receipts use the same endpoint; on WhatsApp a
//! read receipt also shows the typing indicator until the reply arrives.

use async_trait::async_trait;
use parley_core::config::WhatsAppConfig;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::send::{split_chunks, INTERACTIVE_BODY_MAX, TEXT_CHUNK_MAX};
use crate::types::{Button, OutboundBody, OutboundMessage};

pub struct WhatsAppChannel {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl WhatsAppChannel {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, ChannelError> {
        if config.access_token.is_empty() {
            return Err(ChannelError::ConfigError("whatsapp.access_token is empty".into()));
        }
        if config.phone_number_id.is_empty() {
            return Err(ChannelError::ConfigError(
                "whatsapp.phone_number_id is empty".into(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/{}/{}/messages",
                config.base_url.trim_end_matches('/'),
                config.api_version,
                config.phone_number_id
            ),
            access_token: config.access_token.clone(),
        })
    }

    async fn post(&self, payload: &Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::AuthFailed(text));
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "WhatsApp API error");
            return Err(ChannelError::Api { status, body: text });
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        match &msg.body {
            OutboundBody::Text { text } => {
                for chunk in split_chunks(text, TEXT_CHUNK_MAX) {
                    self.post(&text_payload(&msg.recipient, &chunk)).await?;
                }
            }
            OutboundBody::Buttons { text, buttons } => {
                // leading overflow goes out as plain text, the tail carries the buttons
                let mut chunks = split_chunks(text, INTERACTIVE_BODY_MAX);
                let last = chunks.pop().unwrap_or_default();
                for chunk in chunks {
                    self.post(&text_payload(&msg.recipient, &chunk)).await?;
                }
                self.post(&buttons_payload(&msg.recipient, &last, buttons))
                    .await?;
            }
        }
        debug!(recipient = %msg.recipient, "whatsapp message sent");
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ChannelError> {
        self.post(&read_payload(message_id)).await
    }
}

fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

fn buttons_payload(to: &str, body: &str, buttons: &[Button]) -> Value {
    let buttons: Vec<Value> = buttons
        .iter()
        .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
        .collect();
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "interactive",
        "interactive": {
            "type": "button",
            "body": { "text": body },
            "action": { "buttons": buttons },
        },
    })
}

fn read_payload(message_id: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WhatsAppConfig {
        WhatsAppConfig {
            access_token: "token".into(),
            phone_number_id: "1098765".into(),
            api_version: "v21.0".into(),
            base_url: "https://graph.facebook.com/".into(),
        }
    }

    #[test]
    fn endpoint_includes_version_and_phone_id() {
        let ch = WhatsAppChannel::new(&config()).unwrap();
        assert_eq!(ch.endpoint, "https://graph.facebook.com/v21.0/1098765/messages");
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let mut cfg = config();
        cfg.access_token.clear();
        assert!(matches!(
            WhatsAppChannel::new(&cfg),
            Err(ChannelError::ConfigError(_))
        ));
    }

    #[test]
    fn button_payload_shape() {
        let payload = buttons_payload(
            "34600111222",
            "¿Qué deseas hacer?",
            &[Button::new("action_process", "Agendar cita")],
        );
        assert_eq!(payload["type"], "interactive");
        assert_eq!(payload["interactive"]["type"], "button");
        let first = &payload["interactive"]["action"]["buttons"][0];
        assert_eq!(first["type"], "reply");
        assert_eq!(first["reply"]["id"], "action_process");
        assert_eq!(first["reply"]["title"], "Agendar cita");
    }

    #[test]
    fn text_and_read_payloads() {
        let text = text_payload("34600111222", "Hola");
        assert_eq!(text["text"]["body"], "Hola");
        assert_eq!(text["to"], "34600111222");

        let read = read_payload("wamid.ABC");
        assert_eq!(read["status"], "read");
        assert_eq!(read["message_id"], "wamid.ABC");
    }
}

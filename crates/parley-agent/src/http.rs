use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{AgentClient, AgentReply, AgentRequest};
use crate::error::AgentError;

/// JSON client for the agent service's chat endpoint.
pub struct HttpAgentClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAgentClient {
    /// `timeout` bounds the whole call and should stay below the lock TTL.
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    thread_id: &'a str,
    phone: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    is_new_conversation: bool,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    reply_text: String,
    #[serde(default)]
    actions: Option<Vec<String>>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    risk_score: Option<f64>,
    #[serde(default)]
    follow_up_questions: Option<Vec<String>>,
    #[serde(default)]
    agent_used: Option<String>,
}

fn build_body(req: &AgentRequest) -> WireRequest<'_> {
    WireRequest {
        thread_id: req.thread_id.as_str(),
        phone: req.address.as_str(),
        message: &req.combined_text,
        user_id: req.external_user_id.as_deref(),
        is_new_conversation: req.is_new_conversation,
    }
}

fn parse_reply(resp: WireResponse) -> AgentReply {
    AgentReply {
        reply_text: resp.reply_text,
        actions: resp.actions.unwrap_or_default(),
        risk_level: resp.risk_level,
        risk_score: resp.risk_score,
        follow_up_questions: resp.follow_up_questions.unwrap_or_default(),
        agent_id: resp.agent_used,
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, req: &AgentRequest) -> Result<AgentReply, AgentError> {
        debug!(thread = %req.thread_id, is_new = req.is_new_conversation, "calling agent service");

        let resp = self
            .client
            .post(&self.url)
            .json(&build_body(req))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    AgentError::Unavailable(e.to_string())
                } else {
                    AgentError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "agent service error");
            return Err(AgentError::Api {
                status,
                message: text,
            });
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        Ok(parse_reply(wire))
    }
}

use async_trait::async_trait;
use parley_core::{Address, ThreadId};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// One combined user turn sent to the agent service.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub thread_id: ThreadId,
    pub address: Address,
    pub combined_text: String,
    pub external_user_id: Option<String>,
    /// True for the opening turn of a session.
    pub is_new_conversation: bool,
}

/// The agent's answer to one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub reply_text: String,
    /// Suggested quick replies, rendered as buttons.
    pub actions: Vec<String>,
    pub risk_level: Option<String>,
    pub risk_score: Option<f64>,
    pub follow_up_questions: Vec<String>,
    /// Which agent inside the service answered.
    pub agent_id: Option<String>,
}

impl AgentReply {
    /// Risk levels that deserve attention in the logs.
    pub fn is_elevated_risk(&self) -> bool {
        matches!(self.risk_level.as_deref(), Some(level) if level != "none" && level != "low")
    }
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Run one turn. No retries happen at this layer.
    async fn send(&self, req: &AgentRequest) -> Result<AgentReply, AgentError>;
}

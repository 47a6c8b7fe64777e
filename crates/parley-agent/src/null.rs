use async_trait::async_trait;

use crate::client::{AgentClient, AgentReply, AgentRequest};
use crate::error::AgentError;

/// Agent used when no service URL is configured. Every call fails, so users
/// get the fallback message.
#[derive(Debug, Default)]
pub struct NullAgent;

#[async_trait]
impl AgentClient for NullAgent {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(&self, _req: &AgentRequest) -> Result<AgentReply, AgentError> {
        Err(AgentError::Unavailable(
            "no agent service configured; set agent.base_url in parley.toml".into(),
        ))
    }
}

use std::fmt;
use std::str::FromStr;

use parley_core::{ActionType, Address, ThreadId};
use serde::{Deserialize, Serialize};

/// One conversation, keyed by the user's channel address.
///
/// The address is permanent; the thread id is replaced on every reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub address: Address,
    /// Correlation id handed to the agent service for the current session.
    pub thread_id: ThreadId,
    pub action_type: ActionType,
    /// Messages exchanged in the current thread. Zero means the next agent
    /// call opens the session.
    pub message_count: u32,
    pub last_agent: Option<String>,
    pub risk_level: Option<String>,
    pub risk_score: Option<f64>,
    /// Id of the user in the external profile store, when known.
    pub external_user_id: Option<String>,
    /// RFC3339 timestamp of the last turn or proactive send.
    pub last_activity_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn is_new(&self) -> bool {
        self.message_count == 0
    }
}

/// Author of a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Sent by the system on its own initiative (proactive sends).
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A persisted history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub address: Address,
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: String,
    pub agent_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// A history row about to be written.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub address: Address,
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: String,
    pub agent_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Everything one completed agent turn writes back.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub thread_id: ThreadId,
    pub user_text: String,
    pub reply_text: String,
    pub agent_id: Option<String>,
    pub risk_level: Option<String>,
    pub risk_score: Option<f64>,
}

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ParleyError;

/// Stable external identity of one user on the channel (a phone number on WhatsApp).
///
/// Normalised on construction: surrounding whitespace, a leading `+`, and
/// inner spaces / dashes are removed so `+34 600-111-222` and `34600111222`
/// address the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, ParleyError> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
        let normalized: String = trimmed
            .chars()
            .filter(|c| *c != ' ' && *c != '-')
            .collect();

        if normalized.is_empty() {
            return Err(ParleyError::InvalidAddress("address is empty".to_string()));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(ParleyError::InvalidAddress(format!(
                "address contains whitespace: {raw}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = ParleyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

/// Opaque correlation id handed to the agent service; one per logical session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies one in-flight agent invocation for an address.
///
/// UUIDv7 so generations sort by creation time in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId(pub String);

impl GenerationId {
    pub fn new() -> Self {
        Self(format!("gen_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interaction mode of a conversation.
///
/// Closed set: anything else is rejected by `FromStr` instead of silently
/// falling back, so a corrupted cache value or an unknown button id is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    #[default]
    Chat,
    ProcessData,
    QueryData,
}

impl ActionType {
    /// Map an interactive selection id (button or list reply) to a mode.
    pub fn from_selection(id: &str) -> Option<Self> {
        match id {
            "action_process" => Some(ActionType::ProcessData),
            "action_query" => Some(ActionType::QueryData),
            "action_help" => Some(ActionType::Chat),
            _ => None,
        }
    }

    /// Instruction sent to the agent when the user picks this mode.
    pub fn intent_phrase(&self) -> &'static str {
        match self {
            ActionType::ProcessData => "Quiero agendar una cita",
            ActionType::QueryData => "Quiero consultar mis datos",
            ActionType::Chat => "Necesito ayuda",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Chat => "chat",
            ActionType::ProcessData => "process_data",
            ActionType::QueryData => "query_data",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(ActionType::Chat),
            "process_data" => Ok(ActionType::ProcessData),
            "query_data" => Ok(ActionType::QueryData),
            other => Err(ParleyError::UnknownActionType(other.to_string())),
        }
    }
}

/// Kind of an inbound message unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Interactive,
}

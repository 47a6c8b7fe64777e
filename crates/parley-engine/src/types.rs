use parley_core::{ActionType, Address, MessageKind};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Channel-agnostic inbound message, as posted to `/inbound`.
///
/// `kind` stays a string here so unknown kinds reach validation and get
/// dropped with a log line instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    pub address: String,
    #[serde(default)]
    pub message_id: String,
    /// Unix seconds as reported by the channel.
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub kind: String,
    /// Free text, or the selection id for interactive units.
    #[serde(default)]
    pub body: String,
    /// Display title of an interactive selection.
    #[serde(default)]
    pub title: Option<String>,
    /// User id in the external profile store, when the channel knows it.
    #[serde(default)]
    pub external_user_id: Option<String>,
    /// Ingress stamp (unix milliseconds), set when the request is accepted.
    #[serde(skip)]
    pub received_at_ms: Option<i64>,
}

/// One unit held in a message buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub id: String,
    pub kind: MessageKind,
    /// Text for `Text`, selection id for `Interactive`.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Channel timestamp (unix seconds).
    pub timestamp: i64,
    /// When this process accepted the unit (unix milliseconds).
    pub received_at_ms: i64,
}

impl BufferedMessage {
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            kind: MessageKind::Text,
            content: content.into(),
            title: None,
            timestamp: now.timestamp(),
            received_at_ms: now.timestamp_millis(),
        }
    }

    pub fn selection(id: impl Into<String>, selection: ActionType, title: Option<String>) -> Self {
        let now = chrono::Utc::now();
        let selection_id = match selection {
            ActionType::ProcessData => "action_process",
            ActionType::QueryData => "action_query",
            ActionType::Chat => "action_help",
        };
        Self {
            id: id.into(),
            kind: MessageKind::Interactive,
            content: selection_id.to_string(),
            title,
            timestamp: now.timestamp(),
            received_at_ms: now.timestamp_millis(),
        }
    }

    /// The mode this unit selects, if it is a known selection.
    pub fn selected_mode(&self) -> Option<ActionType> {
        match self.kind {
            MessageKind::Interactive => ActionType::from_selection(&self.content),
            MessageKind::Text => None,
        }
    }

    /// Free text of the unit, used for reset detection.
    pub fn free_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => Some(&self.content),
            MessageKind::Interactive => None,
        }
    }
}

/// A validated inbound unit.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundUnit {
    pub address: Address,
    pub message: BufferedMessage,
    pub external_user_id: Option<String>,
}

impl InboundEnvelope {
    /// Stamp the envelope with the current time, before any concurrent work
    /// can reorder it against its neighbours.
    pub fn received_now(mut self) -> Self {
        self.received_at_ms = Some(chrono::Utc::now().timestamp_millis());
        self
    }

    /// Validate and normalise the envelope.
    ///
    /// An interactive unit with an unknown id becomes free text equal to its
    /// title (a tapped agent-suggested reply); without a title it is rejected.
    pub fn into_unit(self) -> Result<InboundUnit> {
        let address =
            Address::parse(&self.address).map_err(|e| EngineError::Malformed(e.to_string()))?;
        let now = chrono::Utc::now();
        let timestamp = self.timestamp.unwrap_or_else(|| now.timestamp());

        let (kind, content, title) = match self.kind.as_str() {
            "text" => {
                let text = self.body.trim();
                if text.is_empty() {
                    return Err(EngineError::Malformed("empty text".into()));
                }
                (MessageKind::Text, text.to_string(), None)
            }
            "interactive" => {
                let id = self.body.trim();
                let title = self
                    .title
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty());
                if ActionType::from_selection(id).is_some() {
                    (MessageKind::Interactive, id.to_string(), title)
                } else if let Some(title) = title {
                    (MessageKind::Text, title, None)
                } else {
                    return Err(EngineError::Malformed(format!(
                        "unknown selection id without title: {id:?}"
                    )));
                }
            }
            other => {
                return Err(EngineError::Malformed(format!("unsupported kind: {other:?}")));
            }
        };

        let external_user_id = self
            .external_user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(InboundUnit {
            address,
            message: BufferedMessage {
                id: self.message_id,
                kind,
                content,
                title,
                timestamp,
                received_at_ms: self
                    .received_at_ms
                    .unwrap_or_else(|| now.timestamp_millis()),
            },
            external_user_id,
        })
    }
}

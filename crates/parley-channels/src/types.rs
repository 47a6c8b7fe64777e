use serde::{Deserialize, Serialize};

/// Quick-reply buttons per message accepted by the channel.
pub const MAX_BUTTONS: usize = 3;
/// Longest button title the channel renders.
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;

/// One quick-reply button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    /// Build a button, truncating the title to [`MAX_BUTTON_TITLE_CHARS`].
    pub fn new(id: impl Into<String>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.chars().take(MAX_BUTTON_TITLE_CHARS).collect(),
        }
    }
}

/// Content of an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundBody {
    Text { text: String },
    Buttons { text: String, buttons: Vec<Button> },
}

/// A message to be delivered to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Platform-native recipient id (the phone number on WhatsApp).
    pub recipient: String,
    pub body: OutboundBody,
}

impl OutboundMessage {
    pub fn text(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: OutboundBody::Text { text: text.into() },
        }
    }

    /// Quick-reply message. Keeps the first [`MAX_BUTTONS`] buttons.
    pub fn buttons(
        recipient: impl Into<String>,
        text: impl Into<String>,
        mut buttons: Vec<Button>,
    ) -> Self {
        if buttons.len() > MAX_BUTTONS {
            tracing::warn!(count = buttons.len(), "dropping buttons beyond the channel limit");
            buttons.truncate(MAX_BUTTONS);
        }
        for button in &mut buttons {
            if button.title.chars().count() > MAX_BUTTON_TITLE_CHARS {
                button.title = button.title.chars().take(MAX_BUTTON_TITLE_CHARS).collect();
            }
        }
        Self {
            recipient: recipient.into(),
            body: OutboundBody::Buttons {
                text: text.into(),
                buttons,
            },
        }
    }

    /// The visible text, whatever the body kind.
    pub fn text_content(&self) -> &str {
        match &self.body {
            OutboundBody::Text { text } | OutboundBody::Buttons { text, .. } => text,
        }
    }
}

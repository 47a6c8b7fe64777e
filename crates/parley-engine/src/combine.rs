use parley_core::ActionType;

use crate::types::BufferedMessage;

/// Label that introduces free text sent alongside a selection.
const CONTEXT_LABEL: &str = "Contexto adicional:";

/// One logical user turn built from a drained batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Text sent to the agent.
    pub text: String,
    /// Mode selected in this batch, if any.
    pub action: Option<ActionType>,
}

/// Merge a batch into one turn. `None` for an empty batch.
///
/// A selection's intent phrase becomes the primary instruction and the batch's
/// free text follows it as context. With several selections the latest one
/// wins. Without selections the texts are joined by newlines in arrival order.
pub fn combine(batch: &[BufferedMessage]) -> Option<Turn> {
    let action = batch.iter().rev().find_map(BufferedMessage::selected_mode);
    let texts: Vec<&str> = batch
        .iter()
        .filter_map(BufferedMessage::free_text)
        .filter(|t| !t.trim().is_empty())
        .collect();

    match action {
        Some(mode) => {
            let mut text = mode.intent_phrase().to_string();
            if !texts.is_empty() {
                text.push_str("\n\n");
                text.push_str(CONTEXT_LABEL);
                text.push(' ');
                text.push_str(&texts.join("\n"));
            }
            Some(Turn {
                text,
                action: Some(mode),
            })
        }
        None if texts.is_empty() => None,
        None => Some(Turn {
            text: texts.join("\n"),
            action: None,
        }),
    }
}

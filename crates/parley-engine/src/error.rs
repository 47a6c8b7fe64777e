use thiserror::Error;

use crate::proactive::FieldError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] parley_store::StoreError),

    #[error("session error: {0}")]
    Session(#[from] parley_sessions::SessionError),

    #[error("channel error: {0}")]
    Channel(#[from] parley_channels::ChannelError),

    #[error("agent error: {0}")]
    Agent(#[from] parley_agent::AgentError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The inbound unit cannot be processed; it is logged and dropped.
    #[error("malformed inbound unit: {0}")]
    Malformed(String),

    /// A proactive request failed validation.
    #[error("invalid request: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),

    /// The proactive worker is gone.
    #[error("proactive queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, EngineError>;

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

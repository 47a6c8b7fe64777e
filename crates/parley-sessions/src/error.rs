use thiserror::Error;

/// Errors that can occur during conversation operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No conversation row matches the address or thread.
    #[error("conversation not found: {key}")]
    NotFound { key: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Message metadata could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

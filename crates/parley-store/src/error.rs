use thiserror::Error;

/// Errors raised by a [`TtlStore`](crate::TtlStore) backend.
///
/// Callers in the engine treat every variant as "store unavailable" and fail
/// open; the distinction only matters for logs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A list operation hit a plain value or vice versa.
    #[error("Wrong value type at key {key}")]
    WrongType { key: String },

    /// The backend cannot be reached (poisoned lock, closed connection, …).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

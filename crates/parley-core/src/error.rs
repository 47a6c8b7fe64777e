use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),
}

impl ParleyError {
    /// Short error code string for logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ParleyError::Config(_) => "CONFIG_ERROR",
            ParleyError::InvalidAddress(_) => "INVALID_ADDRESS",
            ParleyError::UnknownActionType(_) => "UNKNOWN_ACTION_TYPE",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;

use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The remote API answered with a non-success status.
    #[error("Channel API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The channel rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The channel-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

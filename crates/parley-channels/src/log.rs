use async_trait::async_trait;
use tracing::info;

use crate::{channel::Channel, error::ChannelError, types::OutboundMessage};

/// Channel that only logs outbound traffic.
///
/// Used when no channel credentials are configured, so the gateway still
/// runs end to end in development.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        info!(
            recipient = %msg.recipient,
            body = %serde_json::to_string(&msg.body).unwrap_or_default(),
            "outbound message (log channel)"
        );
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ChannelError> {
        info!(message_id, "mark read (log channel)");
        Ok(())
    }
}

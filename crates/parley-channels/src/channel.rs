use async_trait::async_trait;

use crate::{error::ChannelError, types::OutboundMessage};

/// Outbound side of a messaging channel.
///
/// Implementations must be `Send + Sync`: the dispatcher and the proactive
/// worker share one adapter across tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"whatsapp"`).
    fn name(&self) -> &str;

    /// Deliver one outbound message (text or quick-reply buttons).
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Acknowledge an inbound message. Best-effort: callers log failures.
    async fn mark_read(&self, message_id: &str) -> Result<(), ChannelError>;
}

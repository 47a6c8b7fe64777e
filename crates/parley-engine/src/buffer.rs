use std::sync::Arc;
use std::time::Duration;

use parley_core::Address;
use parley_store::TtlStore;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::types::BufferedMessage;

/// State of a buffer window right after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWindow {
    /// This append opened the window.
    pub is_first: bool,
    /// Units in the window, including this one.
    pub len: usize,
    /// `received_at_ms` of the oldest unit in the window.
    pub first_seen_ms: i64,
}

/// Per-address accumulation of inbound units in the shared store.
///
/// Units are stored as JSON list items under `msg_buffer:{address}`. Append
/// and drain are each one atomic store operation, so a unit appended while a
/// drain runs lands either in the drained batch or in the next window.
pub struct MessageBuffer {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl MessageBuffer {
    /// `ttl` is a leak guard only; windows close long before it expires.
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    #[instrument(skip(self, message), fields(address = %address))]
    pub async fn append(&self, address: &Address, message: &BufferedMessage) -> Result<BufferWindow> {
        let item = serde_json::to_string(message)?;
        let push = self.store.list_push(&buffer_key(address), &item, self.ttl).await?;
        let first_seen_ms = match serde_json::from_str::<BufferedMessage>(&push.head) {
            Ok(head) => head.received_at_ms,
            Err(e) => {
                warn!(error = %e, "unreadable buffer head, restarting window clock");
                message.received_at_ms
            }
        };
        debug!(len = push.len, "buffered");
        Ok(BufferWindow {
            is_first: push.len == 1,
            len: push.len,
            first_seen_ms,
        })
    }

    /// Keep a window alive while its hand-off waits behind a held lock.
    pub async fn touch(&self, address: &Address) -> Result<bool> {
        Ok(self.store.list_touch(&buffer_key(address), self.ttl).await?)
    }

    /// Take every buffered unit, oldest first, leaving the buffer empty.
    ///
    /// Units are ordered by their ingress stamp; concurrent appends may land
    /// in the store out of order. Ties keep store order.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn drain(&self, address: &Address) -> Result<Vec<BufferedMessage>> {
        let items = self.store.list_take(&buffer_key(address)).await?;
        let mut messages: Vec<BufferedMessage> = items
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(error = %e, "dropping unreadable buffered unit");
                    None
                }
            })
            .collect();
        messages.sort_by_key(|m| m.received_at_ms);
        Ok(messages)
    }
}

fn buffer_key(address: &Address) -> String {
    format!("msg_buffer:{address}")
}

use std::sync::Arc;
use std::time::Duration;

use parley_agent::AgentClient;
use parley_channels::Channel;
use parley_core::config::CoordinationConfig;
use parley_core::Address;
use parley_sessions::{Classification, ConversationStore, SessionResolver};
use parley_store::TtlStore;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::buffer::MessageBuffer;
use crate::debounce::DebounceScheduler;
use crate::dispatch::Dispatcher;
use crate::lock::GenerationLock;
use crate::types::{InboundEnvelope, InboundUnit};

/// Capacity of the fired hand-off channel.
const HANDOFF_CHANNEL_CAPACITY: usize = 1024;

/// What `handle_inbound` did with a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Malformed or unsupported; logged and ignored.
    Dropped,
    /// Opening turn of a session: handed off without debounce.
    Immediate(Classification),
    /// Added to an open window.
    Buffered { len: usize },
    /// The store was unavailable; dispatched on its own.
    Unbuffered,
}

/// Wires buffer, scheduler, lock, resolver and dispatcher together.
pub struct Engine {
    resolver: Arc<SessionResolver>,
    buffer: Arc<MessageBuffer>,
    scheduler: Arc<DebounceScheduler>,
    dispatcher: Arc<Dispatcher>,
    channel: Arc<dyn Channel>,
}

impl Engine {
    /// Build the engine. The returned receiver feeds [`Engine::run`].
    pub fn new(
        config: &CoordinationConfig,
        store: Arc<dyn TtlStore>,
        conversations: Arc<ConversationStore>,
        agent: Arc<dyn AgentClient>,
        channel: Arc<dyn Channel>,
    ) -> (Self, mpsc::Receiver<Address>) {
        let (fired_tx, fired_rx) = mpsc::channel(HANDOFF_CHANNEL_CAPACITY);

        let resolver = Arc::new(SessionResolver::new(
            conversations,
            Arc::clone(&store),
            Duration::from_secs(config.session_cache_ttl_secs),
            &config.reset_phrases,
        ));
        let buffer = Arc::new(MessageBuffer::new(
            Arc::clone(&store),
            Duration::from_secs(config.buffer_ttl_secs),
        ));
        let lock = Arc::new(GenerationLock::new(
            store,
            Duration::from_secs(config.lock_ttl_secs),
        ));
        let scheduler = Arc::new(DebounceScheduler::new(
            Duration::from_millis(config.debounce_ms),
            Duration::from_millis(config.max_wait_ms),
            fired_tx,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&buffer),
            lock,
            Arc::clone(&scheduler),
            Arc::clone(&resolver),
            agent,
            Arc::clone(&channel),
            config.fallback_message.clone(),
        ));

        let engine = Self {
            resolver,
            buffer,
            scheduler,
            dispatcher,
            channel,
        };
        (engine, fired_rx)
    }

    pub fn resolver(&self) -> &Arc<SessionResolver> {
        &self.resolver
    }

    pub fn scheduler(&self) -> &Arc<DebounceScheduler> {
        &self.scheduler
    }

    /// Single ingress point for inbound units.
    ///
    /// Opening turns (first contact, reset phrase) are handed off at once;
    /// everything else goes through the debounce window.
    pub async fn handle_inbound(&self, envelope: InboundEnvelope) -> InboundOutcome {
        let InboundUnit {
            address,
            message,
            external_user_id,
        } = match envelope.into_unit() {
            Ok(unit) => unit,
            Err(e) => {
                warn!(error = %e, "dropping inbound unit");
                return InboundOutcome::Dropped;
            }
        };

        // read receipts are a network round trip; never hold the append behind one
        if !message.id.is_empty() {
            let channel = Arc::clone(&self.channel);
            let message_id = message.id.clone();
            let for_address = address.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.mark_read(&message_id).await {
                    debug!(address = %for_address, error = %e, "mark read failed");
                }
            });
        }

        let classification = match self.resolver.classify(&address, message.free_text()).await {
            Ok(c) => Some(c),
            Err(e) => {
                error!(address = %address, error = %e, "session lookup failed; buffering as ongoing");
                None
            }
        };

        if let (Some(_), Some(user_id)) = (&classification, &external_user_id) {
            if let Err(e) = self
                .resolver
                .conversations()
                .set_external_user_id(&address, user_id)
            {
                warn!(address = %address, error = %e, "failed to link external user id");
            }
        }

        match self.buffer.append(&address, &message).await {
            Ok(window) => match classification {
                Some(c) if c.opens_session() => {
                    // units buffered before a reset join the new session's first turn
                    info!(address = %address, thread = %c.thread_id(), "opening turn, skipping debounce");
                    self.scheduler.fire_now(&address);
                    InboundOutcome::Immediate(c)
                }
                _ => {
                    self.scheduler.on_arrival(&address, &window);
                    InboundOutcome::Buffered { len: window.len }
                }
            },
            Err(e) => {
                warn!(address = %address, error = %e, "buffer unavailable, dispatching unit directly");
                let dispatcher = Arc::clone(&self.dispatcher);
                tokio::spawn(async move {
                    dispatcher.dispatch_unbuffered(&address, vec![message]).await;
                });
                InboundOutcome::Unbuffered
            }
        }
    }

    /// Hand-off loop: dispatch every fired address on its own task until
    /// `shutdown` broadcasts `true`.
    pub async fn run(
        self: Arc<Self>,
        mut fired_rx: mpsc::Receiver<Address>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("hand-off loop started");
        loop {
            tokio::select! {
                fired = fired_rx.recv() => {
                    let Some(address) = fired else { break };
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        let outcome = dispatcher.dispatch(&address).await;
                        debug!(address = %address, ?outcome, "hand-off finished");
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("hand-off loop shutting down");
                        break;
                    }
                }
            }
        }
        self.scheduler.cancel_all();
    }
}

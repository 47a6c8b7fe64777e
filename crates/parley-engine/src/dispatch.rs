use std::sync::Arc;

use parley_agent::{AgentClient, AgentReply, AgentRequest};
use parley_channels::{Button, Channel, OutboundMessage};
use parley_core::{Address, GenerationId};
use parley_sessions::{SessionResolver, TurnRecord};
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::MessageBuffer;
use crate::combine::combine;
use crate::debounce::DebounceScheduler;
use crate::lock::{GenerationLock, LockOutcome};
use crate::types::BufferedMessage;

/// Prefix of the message carrying the agent's follow-up questions.
pub const FOLLOW_UP_PREFIX: &str = "💭 También me gustaría preguntarte:";

/// How one hand-off ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Another generation holds the lock; the hand-off was re-armed.
    Deferred,
    /// Nothing to send (empty buffer or nothing usable in it).
    Empty,
    /// The agent answered and the reply went out.
    Replied,
    /// The agent failed; the user got the fallback message.
    Fallback,
    /// The turn could not be set up (history store or buffer unreadable).
    Failed,
}

/// Runs one turn per hand-off: lock, drain, combine, call the agent,
/// persist, reply, unlock.
pub struct Dispatcher {
    buffer: Arc<MessageBuffer>,
    lock: Arc<GenerationLock>,
    scheduler: Arc<DebounceScheduler>,
    resolver: Arc<SessionResolver>,
    agent: Arc<dyn AgentClient>,
    channel: Arc<dyn Channel>,
    fallback_message: String,
}

impl Dispatcher {
    pub fn new(
        buffer: Arc<MessageBuffer>,
        lock: Arc<GenerationLock>,
        scheduler: Arc<DebounceScheduler>,
        resolver: Arc<SessionResolver>,
        agent: Arc<dyn AgentClient>,
        channel: Arc<dyn Channel>,
        fallback_message: String,
    ) -> Self {
        Self {
            buffer,
            lock,
            scheduler,
            resolver,
            agent,
            channel,
            fallback_message,
        }
    }

    /// Handle a fired hand-off for `address`.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn dispatch(&self, address: &Address) -> DispatchOutcome {
        let generation = match self.lock.try_acquire(address).await {
            LockOutcome::Held => {
                debug!("turn in flight, deferring hand-off");
                // the window must outlive the wait, however long the holder takes
                if let Err(e) = self.buffer.touch(address).await {
                    warn!(error = %e, "could not extend buffer expiry while deferred");
                }
                self.scheduler.rearm(address);
                return DispatchOutcome::Deferred;
            }
            LockOutcome::Acquired(g) | LockOutcome::Degraded(g) => g,
        };

        let outcome = match self.buffer.drain(address).await {
            Ok(batch) if batch.is_empty() => {
                debug!("buffer already drained");
                DispatchOutcome::Empty
            }
            Ok(batch) => self.run_turn(address, &generation, batch).await,
            Err(e) => {
                error!(error = %e, "buffer drain failed; units stay until the next hand-off");
                DispatchOutcome::Failed
            }
        };

        self.lock.release(address, &generation).await;
        outcome
    }

    /// Handle units that could not be buffered because the store is down.
    #[instrument(skip(self, batch), fields(address = %address, units = batch.len()))]
    pub async fn dispatch_unbuffered(
        &self,
        address: &Address,
        batch: Vec<BufferedMessage>,
    ) -> DispatchOutcome {
        // `owned` is false when the turn runs unlocked (store down or flapping)
        let (generation, owned) = match self.lock.try_acquire(address).await {
            LockOutcome::Held => {
                // the store answered after all: park the units for the next turn
                let mut parked = true;
                for message in &batch {
                    if let Err(e) = self.buffer.append(address, message).await {
                        warn!(error = %e, "could not park unit behind a held lock");
                        parked = false;
                        break;
                    }
                }
                if parked {
                    self.scheduler.rearm(address);
                    return DispatchOutcome::Deferred;
                }
                // units that cannot be parked are answered now, next to the holder
                warn!("store flapping, running unit unlocked beside the current holder");
                (GenerationId::new(), false)
            }
            LockOutcome::Acquired(g) => (g, true),
            LockOutcome::Degraded(g) => (g, false),
        };

        let outcome = self.run_turn(address, &generation, batch).await;
        if owned {
            self.lock.release(address, &generation).await;
        }
        outcome
    }

    async fn run_turn(
        &self,
        address: &Address,
        generation: &GenerationId,
        batch: Vec<BufferedMessage>,
    ) -> DispatchOutcome {
        let Some(turn) = combine(&batch) else {
            debug!("batch has no usable content");
            return DispatchOutcome::Empty;
        };

        let conversation = match self.resolver.current(address).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "cannot resolve conversation");
                self.send_fallback(address).await;
                return DispatchOutcome::Failed;
            }
        };

        if let Some(mode) = turn.action {
            if let Err(e) = self
                .resolver
                .set_action_type(&conversation.thread_id, mode)
                .await
            {
                warn!(error = %e, mode = %mode, "failed to record action type");
            }
        }

        let request = AgentRequest {
            thread_id: conversation.thread_id.clone(),
            address: address.clone(),
            combined_text: turn.text.clone(),
            external_user_id: conversation.external_user_id.clone(),
            is_new_conversation: conversation.is_new(),
        };
        info!(
            generation = %generation,
            thread = %conversation.thread_id,
            units = batch.len(),
            is_new = request.is_new_conversation,
            "dispatching turn"
        );

        let reply = match self.agent.send(&request).await {
            Ok(reply) if reply.reply_text.trim().is_empty() => {
                warn!(agent = self.agent.name(), "agent returned an empty reply");
                self.send_fallback(address).await;
                return DispatchOutcome::Fallback;
            }
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = self.agent.name(), error = %e, "agent call failed");
                self.send_fallback(address).await;
                return DispatchOutcome::Fallback;
            }
        };

        if !self.lock.is_current(address, generation).await {
            warn!(generation = %generation, "lock expired during the agent call; delivering late reply");
        }
        if reply.is_elevated_risk() {
            warn!(
                thread = %conversation.thread_id,
                risk_level = reply.risk_level.as_deref().unwrap_or_default(),
                risk_score = reply.risk_score.unwrap_or_default(),
                "elevated risk reported by agent"
            );
        }

        let record = TurnRecord {
            thread_id: conversation.thread_id.clone(),
            user_text: turn.text,
            reply_text: reply.reply_text.clone(),
            agent_id: reply.agent_id.clone(),
            risk_level: reply.risk_level.clone(),
            risk_score: reply.risk_score,
        };
        if let Err(e) = self.resolver.conversations().record_turn(address, &record) {
            error!(error = %e, "failed to persist turn");
        }

        self.deliver(address, &reply).await;
        DispatchOutcome::Replied
    }

    async fn deliver(&self, address: &Address, reply: &AgentReply) {
        let recipient = address.as_str();
        let message = if reply.actions.is_empty() {
            OutboundMessage::text(recipient, reply.reply_text.clone())
        } else {
            let buttons = reply
                .actions
                .iter()
                .enumerate()
                .map(|(i, action)| Button::new(format!("reply_{i}"), action))
                .collect();
            OutboundMessage::buttons(recipient, reply.reply_text.clone(), buttons)
        };
        if let Err(e) = self.channel.send(&message).await {
            error!(address = %address, channel = self.channel.name(), error = %e, "reply delivery failed");
            return;
        }

        if let Some(text) = follow_up_text(&reply.follow_up_questions) {
            if let Err(e) = self.channel.send(&OutboundMessage::text(recipient, text)).await {
                warn!(address = %address, error = %e, "follow-up delivery failed");
            }
        }
    }

    async fn send_fallback(&self, address: &Address) {
        let message = OutboundMessage::text(address.as_str(), self.fallback_message.clone());
        if let Err(e) = self.channel.send(&message).await {
            error!(address = %address, error = %e, "fallback delivery failed");
        }
    }
}

/// Numbered follow-up questions, or `None` when there are none.
pub fn follow_up_text(questions: &[String]) -> Option<String> {
    let lines: Vec<String> = questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .enumerate()
        .map(|(i, q)| format!("{}. {q}", i + 1))
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("{FOLLOW_UP_PREFIX}\n{}", lines.join("\n")))
}

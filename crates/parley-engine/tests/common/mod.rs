#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_agent::{AgentClient, AgentError, AgentReply, AgentRequest};
use parley_channels::{Channel, ChannelError, OutboundMessage};
use parley_core::config::CoordinationConfig;
use parley_core::Address;
use parley_engine::{Engine, InboundEnvelope};
use parley_sessions::ConversationStore;
use parley_store::{ListPush, MemoryStore, StoreError, TtlStore};
use rusqlite::Connection;
use tokio::sync::watch;
use tokio::time::Instant;

pub const PHONE: &str = "34600111222";

pub fn addr() -> Address {
    Address::parse(PHONE).unwrap()
}

pub fn text(body: &str) -> InboundEnvelope {
    InboundEnvelope {
        address: PHONE.into(),
        message_id: format!("wamid.{}", body.len()),
        timestamp: None,
        kind: "text".into(),
        body: body.into(),
        title: None,
        external_user_id: None,
        received_at_ms: None,
    }
}

pub fn selection(id: &str, title: &str) -> InboundEnvelope {
    InboundEnvelope {
        address: PHONE.into(),
        message_id: "wamid.sel".into(),
        timestamp: None,
        kind: "interactive".into(),
        body: id.into(),
        title: Some(title.into()),
        external_user_id: None,
        received_at_ms: None,
    }
}

/// Agent double: records every request with the (virtual) time it arrived.
pub struct FakeAgent {
    requests: Mutex<Vec<(Instant, AgentRequest)>>,
    reply: Mutex<Option<AgentReply>>,
    delay: Duration,
}

impl FakeAgent {
    pub fn replying(text: &str) -> Self {
        Self::with_reply(AgentReply {
            reply_text: text.into(),
            agent_id: Some("triage".into()),
            ..Default::default()
        })
    }

    pub fn with_reply(reply: AgentReply) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(Some(reply)),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<(Instant, AgentRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.combined_text.clone())
            .collect()
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, req: &AgentRequest) -> Result<AgentReply, AgentError> {
        self.requests
            .lock()
            .unwrap()
            .push((Instant::now(), req.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::Unavailable("agent down".into()))
    }
}

/// Channel double that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<OutboundMessage>>,
    read: Mutex<Vec<String>>,
    slow_reads: Mutex<Vec<(String, Duration)>>,
}

impl RecordingChannel {
    /// Make the read receipt for `message_id` take `delay`.
    pub fn slow_read(&self, message_id: &str, delay: Duration) {
        self.slow_reads
            .lock()
            .unwrap()
            .push((message_id.to_string(), delay));
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn read(&self) -> Vec<String> {
        self.read.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ChannelError> {
        let delay = self
            .slow_reads
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == message_id)
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.read.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

/// A shared store that is never reachable.
pub struct DownStore;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".into())
}

#[async_trait]
impl TtlStore for DownStore {
    fn backend(&self) -> &str {
        "down"
    }
    async fn get(&self, _: &str) -> parley_store::Result<Option<String>> {
        Err(down())
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> parley_store::Result<()> {
        Err(down())
    }
    async fn delete(&self, _: &str) -> parley_store::Result<bool> {
        Err(down())
    }
    async fn set_nx(&self, _: &str, _: &str, _: Duration) -> parley_store::Result<bool> {
        Err(down())
    }
    async fn delete_if_eq(&self, _: &str, _: &str) -> parley_store::Result<bool> {
        Err(down())
    }
    async fn list_push(&self, _: &str, _: &str, _: Duration) -> parley_store::Result<ListPush> {
        Err(down())
    }
    async fn list_touch(&self, _: &str, _: Duration) -> parley_store::Result<bool> {
        Err(down())
    }
    async fn list_take(&self, _: &str) -> parley_store::Result<Vec<String>> {
        Err(down())
    }
}

/// A store that is reachable for the lock only, and always finds it held.
#[derive(Default)]
pub struct FlappingStore {
    releases: Mutex<usize>,
}

impl FlappingStore {
    pub fn releases(&self) -> usize {
        *self.releases.lock().unwrap()
    }
}

#[async_trait]
impl TtlStore for FlappingStore {
    fn backend(&self) -> &str {
        "flapping"
    }
    async fn get(&self, _: &str) -> parley_store::Result<Option<String>> {
        Err(down())
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> parley_store::Result<()> {
        Err(down())
    }
    async fn delete(&self, _: &str) -> parley_store::Result<bool> {
        Err(down())
    }
    async fn set_nx(&self, _: &str, _: &str, _: Duration) -> parley_store::Result<bool> {
        Ok(false)
    }
    async fn delete_if_eq(&self, _: &str, _: &str) -> parley_store::Result<bool> {
        *self.releases.lock().unwrap() += 1;
        Ok(false)
    }
    async fn list_push(&self, _: &str, _: &str, _: Duration) -> parley_store::Result<ListPush> {
        Err(down())
    }
    async fn list_touch(&self, _: &str, _: Duration) -> parley_store::Result<bool> {
        Err(down())
    }
    async fn list_take(&self, _: &str) -> parley_store::Result<Vec<String>> {
        Err(down())
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub agent: Arc<FakeAgent>,
    pub channel: Arc<RecordingChannel>,
    pub conversations: Arc<ConversationStore>,
    pub config: CoordinationConfig,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn new(agent: FakeAgent) -> Self {
        Self::with_store(agent, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(agent: FakeAgent, store: Arc<dyn TtlStore>) -> Self {
        Self::with_config(agent, store, CoordinationConfig::default())
    }

    pub fn with_config(
        agent: FakeAgent,
        store: Arc<dyn TtlStore>,
        config: CoordinationConfig,
    ) -> Self {
        let agent = Arc::new(agent);
        let channel = Arc::new(RecordingChannel::default());
        let conversations =
            Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());

        let (engine, fired_rx) = Engine::new(
            &config,
            store,
            Arc::clone(&conversations),
            agent.clone(),
            channel.clone(),
        );
        let engine = Arc::new(engine);
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&engine).run(fired_rx, shutdown_rx));

        Self {
            engine,
            agent,
            channel,
            conversations,
            config,
            shutdown,
        }
    }

    /// Wait (in virtual time) until the channel has sent `count` messages.
    pub async fn wait_sent(&self, count: usize) {
        wait_until(|| self.channel.sent().len() >= count).await;
    }

    /// Wait until the agent has seen `count` turns.
    pub async fn wait_turns(&self, count: usize) {
        wait_until(|| self.agent.requests().len() >= count).await;
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn wait_until(mut done: impl FnMut() -> bool) {
    let give_up = Instant::now() + Duration::from_secs(60);
    while !done() {
        assert!(Instant::now() < give_up, "condition not met within 60s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

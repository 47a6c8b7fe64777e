use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_500; // silence window that closes a burst
pub const DEFAULT_MAX_WAIT_MS: u64 = 10_000; // hard ceiling from the first message
pub const DEFAULT_BUFFER_TTL_SECS: u64 = 300; // leak guard, outlives lock TTL + max wait
pub const DEFAULT_LOCK_TTL_SECS: u64 = 60; // must exceed worst-case agent latency
pub const DEFAULT_SESSION_CACHE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_PROACTIVE_QUEUE: usize = 256;
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Lo siento, tuve un problema procesando tu mensaje. Por favor intenta de nuevo en unos momentos.";

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParleyConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Timing and session policy for the coordination engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Silence window: each new message pushes the hand-off back by this much.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Hand-off is forced this long after the first message of a window.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Leak guard on an idle buffer. Refreshed on every append and while a
    /// hand-off waits for the lock, so it only fires on abandoned buffers.
    #[serde(default = "default_buffer_ttl_secs")]
    pub buffer_ttl_secs: u64,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// TTL of the thread-id and action-type cache entries in the shared store.
    #[serde(default = "default_session_cache_ttl_secs")]
    pub session_cache_ttl_secs: u64,
    /// Phrases that start a fresh session. Matched case- and accent-insensitively.
    #[serde(default = "default_reset_phrases")]
    pub reset_phrases: Vec<String>,
    /// The only text ever shown to a user when a turn fails.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            buffer_ttl_secs: DEFAULT_BUFFER_TTL_SECS,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            session_cache_ttl_secs: DEFAULT_SESSION_CACHE_TTL_SECS,
            reset_phrases: default_reset_phrases(),
            fallback_message: default_fallback_message(),
        }
    }
}

/// Backend for the shared TTL store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// In-process map. Single instance only.
    #[default]
    Memory,
    /// SQLite file shared by every instance on the host.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Remote agent service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL without trailing slash. `None` disables the agent (every turn
    /// gets the fallback message).
    pub base_url: Option<String>,
    #[serde(default = "default_agent_path")]
    pub path: String,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            path: default_agent_path(),
            timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub whatsapp: Option<WhatsAppConfig>,
}

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default = "default_whatsapp_api_version")]
    pub api_version: String,
    #[serde(default = "default_whatsapp_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "default_proactive_queue")]
    pub queue_capacity: usize,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_PROACTIVE_QUEUE,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT_MS
}
fn default_buffer_ttl_secs() -> u64 {
    DEFAULT_BUFFER_TTL_SECS
}
fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}
fn default_session_cache_ttl_secs() -> u64 {
    DEFAULT_SESSION_CACHE_TTL_SECS
}
fn default_reset_phrases() -> Vec<String> {
    ["start", "/start", "hi", "hello", "hola", "buenas", "buenos dias"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_fallback_message() -> String {
    DEFAULT_FALLBACK_MESSAGE.to_string()
}
fn default_agent_path() -> String {
    "/v2/chat/message".to_string()
}
fn default_agent_timeout_secs() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}
fn default_whatsapp_api_version() -> String {
    "v21.0".to_string()
}
fn default_whatsapp_base_url() -> String {
    "https://graph.facebook.com".to_string()
}
fn default_proactive_queue() -> usize {
    DEFAULT_PROACTIVE_QUEUE
}
fn default_db_path() -> String {
    format!("{}/parley.db", parley_home())
}
fn default_store_path() -> String {
    format!("{}/coordination.db", parley_home())
}

fn parley_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley", home)
}

impl ParleyConfig {
    /// Load config from a TOML file with PARLEY_* env var overrides.
    ///
    /// Nested keys use a double underscore: `PARLEY_COORDINATION__DEBOUNCE_MS=1500`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ParleyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PARLEY_").split("__"))
            .extract()
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject timing combinations the engine cannot honour.
    pub fn validate(&self) -> crate::error::Result<()> {
        let c = &self.coordination;
        if c.debounce_ms == 0 {
            return Err(crate::error::ParleyError::Config(
                "coordination.debounce_ms must be > 0".to_string(),
            ));
        }
        if c.max_wait_ms < c.debounce_ms {
            return Err(crate::error::ParleyError::Config(format!(
                "coordination.max_wait_ms ({}) must be >= debounce_ms ({})",
                c.max_wait_ms, c.debounce_ms
            )));
        }
        if c.buffer_ttl_secs * 1000 <= c.lock_ttl_secs * 1000 + c.max_wait_ms {
            return Err(crate::error::ParleyError::Config(format!(
                "coordination.buffer_ttl_secs ({}) must exceed lock_ttl_secs ({}) plus max_wait_ms ({})",
                c.buffer_ttl_secs, c.lock_ttl_secs, c.max_wait_ms
            )));
        }
        if c.lock_ttl_secs * 1000 <= c.max_wait_ms {
            tracing::warn!(
                lock_ttl_secs = c.lock_ttl_secs,
                max_wait_ms = c.max_wait_ms,
                "lock TTL is shorter than the max buffer window"
            );
        }
        if self.agent.timeout_secs >= c.lock_ttl_secs {
            tracing::warn!(
                agent_timeout_secs = self.agent.timeout_secs,
                lock_ttl_secs = c.lock_ttl_secs,
                "agent timeout is not below the lock TTL; a slow call may outlive its lock"
            );
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    format!("{}/parley.toml", parley_home())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.coordination.debounce_ms, 2_500);
        assert_eq!(cfg.coordination.max_wait_ms, 10_000);
        assert_eq!(cfg.coordination.lock_ttl_secs, 60);
        assert_eq!(cfg.coordination.buffer_ttl_secs, 300);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert!(cfg.coordination.reset_phrases.iter().any(|p| p == "hola"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn max_wait_below_debounce_is_rejected() {
        let mut cfg = ParleyConfig::default();
        cfg.coordination.max_wait_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn buffer_ttl_must_outlive_a_stuck_lock() {
        let mut cfg = ParleyConfig::default();
        cfg.coordination.buffer_ttl_secs = 60;
        assert!(cfg.validate().is_err());

        cfg.coordination.buffer_ttl_secs = 71;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_overrides_are_applied() {
        let cfg: ParleyConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [coordination]
                debounce_ms = 1500

                [store]
                backend = "sqlite"
                path = "/tmp/coord.db"

                [channels.whatsapp]
                access_token = "t"
                phone_number_id = "123"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(cfg.coordination.debounce_ms, 1_500);
        assert_eq!(cfg.coordination.max_wait_ms, DEFAULT_MAX_WAIT_MS);
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        let wa = cfg.channels.whatsapp.unwrap();
        assert_eq!(wa.api_version, "v21.0");
    }
}

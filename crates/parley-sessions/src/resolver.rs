use std::sync::Arc;
use std::time::Duration;

use parley_core::{ActionType, Address, ThreadId};
use parley_store::TtlStore;
use tracing::{debug, info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::Result;
use crate::store::ConversationStore;
use crate::types::Conversation;

/// Punctuation ignored around and inside a reset phrase.
const IGNORED_PUNCTUATION: &[char] = &['¡', '!', '¿', '?', '.', ','];

/// How an inbound unit relates to the address's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// First contact: the conversation was just created.
    Fresh(ThreadId),
    /// The unit is a reset phrase: a new thread was minted.
    Reset(ThreadId),
    /// Ordinary turn on the current thread.
    Active(ThreadId),
}

impl Classification {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Classification::Fresh(t) | Classification::Reset(t) | Classification::Active(t) => t,
        }
    }

    /// Opening turns skip the debounce window.
    pub fn opens_session(&self) -> bool {
        !matches!(self, Classification::Active(_))
    }
}

/// Maps a channel address to its conversation thread.
///
/// The shared store holds a cache (`thread:{address}`, `action:{thread}`);
/// the [`ConversationStore`] stays the system of record, so an empty or
/// unreachable cache only costs a database read.
pub struct SessionResolver {
    conversations: Arc<ConversationStore>,
    cache: Arc<dyn TtlStore>,
    cache_ttl: Duration,
    reset_phrases: Vec<String>,
}

impl SessionResolver {
    pub fn new(
        conversations: Arc<ConversationStore>,
        cache: Arc<dyn TtlStore>,
        cache_ttl: Duration,
        reset_phrases: &[String],
    ) -> Self {
        let reset_phrases = reset_phrases
            .iter()
            .map(|p| normalize_phrase(p))
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            conversations,
            cache,
            cache_ttl,
            reset_phrases,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    /// Whether `text` is one of the configured reset phrases.
    ///
    /// Case, accents, surrounding whitespace and `¡!¿?.,` are ignored.
    pub fn is_reset_phrase(&self, text: &str) -> bool {
        let normalized = normalize_phrase(text);
        !normalized.is_empty() && self.reset_phrases.iter().any(|p| *p == normalized)
    }

    /// Decide whether a unit opens, resets, or continues the session.
    ///
    /// `text` is the free text of the unit, `None` for selections. A reset
    /// phrase always mints a new thread, even over an active session.
    pub async fn classify(&self, address: &Address, text: Option<&str>) -> Result<Classification> {
        if text.is_some_and(|t| self.is_reset_phrase(t)) {
            let conversation = self.conversations.reset(address)?;
            self.cache_thread(address, &conversation.thread_id).await;
            info!(address = %address, thread = %conversation.thread_id, "session reset");
            return Ok(Classification::Reset(conversation.thread_id));
        }

        let key = thread_key(address);
        match self.cache.get(&key).await {
            Ok(Some(thread)) => {
                debug!(address = %address, "thread cache hit");
                return Ok(Classification::Active(ThreadId(thread)));
            }
            Ok(None) => {}
            Err(e) => warn!(address = %address, error = %e, "thread cache unavailable"),
        }

        let (conversation, created) = self.conversations.get_or_create(address)?;
        self.cache_thread(address, &conversation.thread_id).await;
        if created {
            info!(address = %address, thread = %conversation.thread_id, "new conversation");
            Ok(Classification::Fresh(conversation.thread_id))
        } else {
            Ok(Classification::Active(conversation.thread_id))
        }
    }

    /// The conversation as recorded in the database, created if missing.
    pub async fn current(&self, address: &Address) -> Result<Conversation> {
        let (conversation, _) = self.conversations.get_or_create(address)?;
        Ok(conversation)
    }

    /// Record an explicit mode change for a thread.
    pub async fn set_action_type(&self, thread_id: &ThreadId, action_type: ActionType) -> Result<()> {
        self.conversations.set_action_type(thread_id, action_type)?;
        if let Err(e) = self
            .cache
            .set(&action_key(thread_id), action_type.as_str(), Some(self.cache_ttl))
            .await
        {
            warn!(thread = %thread_id, error = %e, "action cache write failed");
        }
        Ok(())
    }

    /// Current mode of a thread. Unknown threads are in the default mode.
    pub async fn action_type(&self, thread_id: &ThreadId) -> Result<ActionType> {
        match self.cache.get(&action_key(thread_id)).await {
            Ok(Some(raw)) => match raw.parse::<ActionType>() {
                Ok(mode) => return Ok(mode),
                Err(e) => warn!(thread = %thread_id, error = %e, "discarding cached action type"),
            },
            Ok(None) => {}
            Err(e) => warn!(thread = %thread_id, error = %e, "action cache unavailable"),
        }

        let mode = self
            .conversations
            .get_by_thread(thread_id)?
            .map(|c| c.action_type)
            .unwrap_or_default();
        if let Err(e) = self
            .cache
            .set(&action_key(thread_id), mode.as_str(), Some(self.cache_ttl))
            .await
        {
            warn!(thread = %thread_id, error = %e, "action cache write failed");
        }
        Ok(mode)
    }

    async fn cache_thread(&self, address: &Address, thread_id: &ThreadId) {
        if let Err(e) = self
            .cache
            .set(&thread_key(address), thread_id.as_str(), Some(self.cache_ttl))
            .await
        {
            warn!(address = %address, error = %e, "thread cache write failed");
        }
    }
}

fn thread_key(address: &Address) -> String {
    format!("thread:{address}")
}

fn action_key(thread_id: &ThreadId) -> String {
    format!("action:{thread_id}")
}

/// Lowercase, strip accents and ignored punctuation, collapse whitespace.
fn normalize_phrase(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c) && !IGNORED_PUNCTUATION.contains(c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_store::{ListPush, MemoryStore, StoreError};
    use rusqlite::Connection;

    fn phrases() -> Vec<String> {
        ["start", "/start", "hi", "hello", "hola", "buenas", "buenos dias"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn resolver_with(cache: Arc<dyn TtlStore>) -> SessionResolver {
        let conversations =
            Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());
        SessionResolver::new(conversations, cache, Duration::from_secs(60), &phrases())
    }

    fn resolver() -> SessionResolver {
        resolver_with(Arc::new(MemoryStore::new()))
    }

    fn addr() -> Address {
        Address::parse("34600111222").unwrap()
    }

    /// A cache that is always down.
    struct DownStore;

    #[async_trait]
    impl TtlStore for DownStore {
        fn backend(&self) -> &str {
            "down"
        }
        async fn get(&self, _: &str) -> parley_store::Result<Option<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> parley_store::Result<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> parley_store::Result<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_nx(&self, _: &str, _: &str, _: Duration) -> parley_store::Result<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_if_eq(&self, _: &str, _: &str) -> parley_store::Result<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_push(&self, _: &str, _: &str, _: Duration) -> parley_store::Result<ListPush> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_touch(&self, _: &str, _: Duration) -> parley_store::Result<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_take(&self, _: &str) -> parley_store::Result<Vec<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[test]
    fn reset_phrases_ignore_case_accents_and_punctuation() {
        let r = resolver();
        assert!(r.is_reset_phrase("Hola"));
        assert!(r.is_reset_phrase("  ¡HOLA!  "));
        assert!(r.is_reset_phrase("Buenos días"));
        assert!(r.is_reset_phrase("buenos   dias."));
        assert!(r.is_reset_phrase("/start"));
        assert!(!r.is_reset_phrase("hola, quiero una cita"));
        assert!(!r.is_reset_phrase("¿?"));
        assert!(!r.is_reset_phrase(""));
    }

    #[tokio::test]
    async fn first_contact_is_fresh_then_active() {
        let r = resolver();
        let first = r.classify(&addr(), Some("necesito ayuda")).await.unwrap();
        assert!(matches!(first, Classification::Fresh(_)));
        let second = r.classify(&addr(), Some("con mi cita")).await.unwrap();
        assert_eq!(second, Classification::Active(first.thread_id().clone()));
    }

    #[tokio::test]
    async fn reset_always_mints_new_thread() {
        let r = resolver();
        let first = r.classify(&addr(), Some("Hola")).await.unwrap();
        assert!(matches!(first, Classification::Reset(_)));
        let second = r.classify(&addr(), Some("hola")).await.unwrap();
        assert!(matches!(second, Classification::Reset(_)));
        assert_ne!(first.thread_id(), second.thread_id());

        let after = r.classify(&addr(), Some("gracias")).await.unwrap();
        assert_eq!(after.thread_id(), second.thread_id());
    }

    #[tokio::test]
    async fn selections_never_reset() {
        let r = resolver();
        r.classify(&addr(), Some("hola")).await.unwrap();
        let next = r.classify(&addr(), None).await.unwrap();
        assert!(matches!(next, Classification::Active(_)));
    }

    #[tokio::test]
    async fn identity_survives_empty_cache() {
        let cache = Arc::new(MemoryStore::new());
        let r = resolver_with(cache.clone());
        let first = r.classify(&addr(), Some("texto")).await.unwrap();
        cache.delete(&thread_key(&addr())).await.unwrap();
        let again = r.classify(&addr(), Some("otro")).await.unwrap();
        assert_eq!(again, Classification::Active(first.thread_id().clone()));
    }

    #[tokio::test]
    async fn unavailable_cache_falls_back_to_database() {
        let r = resolver_with(Arc::new(DownStore));
        let first = r.classify(&addr(), Some("texto")).await.unwrap();
        assert!(matches!(first, Classification::Fresh(_)));
        let second = r.classify(&addr(), Some("otro")).await.unwrap();
        assert_eq!(second, Classification::Active(first.thread_id().clone()));

        r.set_action_type(first.thread_id(), ActionType::QueryData)
            .await
            .unwrap();
        assert_eq!(
            r.action_type(first.thread_id()).await.unwrap(),
            ActionType::QueryData
        );
    }

    #[tokio::test]
    async fn action_type_defaults_and_updates() {
        let r = resolver();
        let thread = r.classify(&addr(), Some("hola")).await.unwrap();
        assert_eq!(r.action_type(thread.thread_id()).await.unwrap(), ActionType::Chat);
        r.set_action_type(thread.thread_id(), ActionType::ProcessData)
            .await
            .unwrap();
        assert_eq!(
            r.action_type(thread.thread_id()).await.unwrap(),
            ActionType::ProcessData
        );
        assert_eq!(
            r.current(&addr()).await.unwrap().action_type,
            ActionType::ProcessData
        );
    }

    #[tokio::test]
    async fn corrupt_cached_action_type_is_ignored() {
        let cache = Arc::new(MemoryStore::new());
        let r = resolver_with(cache.clone());
        let thread = r.classify(&addr(), Some("hola")).await.unwrap();
        cache
            .set(&action_key(thread.thread_id()), "bogus", None)
            .await
            .unwrap();
        assert_eq!(r.action_type(thread.thread_id()).await.unwrap(), ActionType::Chat);
    }
}

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of [`TtlStore::list_push`], read atomically with the push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPush {
    /// Length of the list after the push.
    pub len: usize,
    /// Oldest element still in the list.
    pub head: String,
}

/// Volatile key-value store with per-key expiry.
///
/// Every method is one atomic single-key operation. Expired keys behave
/// exactly like absent keys.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Backend label for logs and `/health`.
    fn backend(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a plain value. `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete any value at `key`. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Set `key` only if it is absent (or expired). Returns `true` when set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its live value equals `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    /// Append to the list at `key` and refresh its expiry to `ttl`.
    async fn list_push(&self, key: &str, item: &str, ttl: Duration) -> Result<ListPush>;

    /// Push the expiry of a live list at `key` out to `ttl` from now.
    /// Returns `false` when there is no live list to refresh.
    async fn list_touch(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove and return the whole list at `key`, oldest first.
    async fn list_take(&self, key: &str) -> Result<Vec<String>>;
}

use std::time::Duration;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{ListPush, TtlStore};

enum Value {
    Plain(String),
    List(Vec<String>),
}

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process [`TtlStore`] backed by a sharded `DashMap`.
///
/// Each operation runs under the shard lock of its key, which makes it atomic
/// with respect to every other operation on the same key. Expired slots are
/// dropped lazily on access and in bulk by [`MemoryStore::sweep_expired`].
pub struct MemoryStore {
    map: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Remove every expired slot. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, slot| slot.is_live(now));
        let dropped = before.saturating_sub(self.map.len());
        if dropped > 0 {
            debug!(dropped, "memory store sweep");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(slot) = self.map.get(key) {
            if slot.is_live(now) {
                return match &slot.value {
                    Value::Plain(v) => Ok(Some(v.clone())),
                    Value::List(_) => Err(StoreError::WrongType {
                        key: key.to_string(),
                    }),
                };
            }
        } else {
            return Ok(None);
        }
        self.map.remove_if(key, |_, slot| !slot.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.map.insert(
            key.to_string(),
            Slot {
                value: Value::Plain(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .map
            .remove(key)
            .map(|(_, slot)| slot.is_live(now))
            .unwrap_or(false))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let slot = Slot {
            value: Value::Plain(value.to_string()),
            expires_at: Some(now + ttl),
        };
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.map.remove_if(key, |_, slot| {
            slot.is_live(now) && matches!(&slot.value, Value::Plain(v) if v == expected)
        });
        Ok(removed.is_some())
    }

    async fn list_push(&self, key: &str, item: &str, ttl: Duration) -> Result<ListPush> {
        let now = Instant::now();
        let mut slot = self.map.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        if !slot.is_live(now) {
            slot.value = Value::List(Vec::new());
        }
        let push = match &mut slot.value {
            Value::List(items) => {
                items.push(item.to_string());
                ListPush {
                    len: items.len(),
                    head: items[0].clone(),
                }
            }
            Value::Plain(_) => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };
        slot.expires_at = Some(now + ttl);
        Ok(push)
    }

    async fn list_touch(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let Some(mut slot) = self.map.get_mut(key) else {
            return Ok(false);
        };
        if !slot.is_live(now) {
            return Ok(false);
        }
        if matches!(slot.value, Value::Plain(_)) {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        }
        slot.expires_at = Some(now + ttl);
        Ok(true)
    }

    async fn list_take(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let Some((_, slot)) = self
            .map
            .remove_if(key, |_, slot| matches!(slot.value, Value::List(_)))
        else {
            return match self.map.get(key) {
                Some(slot) if slot.is_live(now) => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
                _ => Ok(Vec::new()),
            };
        };
        if !slot.is_live(now) {
            return Ok(Vec::new());
        }
        match slot.value {
            Value::List(items) => Ok(items),
            Value::Plain(_) => Ok(Vec::new()),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use parley_core::{Address, GenerationId};
use parley_store::TtlStore;
use tracing::{debug, warn};

/// Result of [`GenerationLock::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// This caller owns the address until release or TTL expiry.
    Acquired(GenerationId),
    /// Another generation is in flight.
    Held,
    /// The store is unreachable; proceed unlocked under this generation.
    Degraded(GenerationId),
}

impl LockOutcome {
    pub fn generation(&self) -> Option<&GenerationId> {
        match self {
            LockOutcome::Acquired(g) | LockOutcome::Degraded(g) => Some(g),
            LockOutcome::Held => None,
        }
    }
}

/// At most one agent call in flight per address.
///
/// The lock is `generation:{address}` in the shared store, set-if-absent
/// with a TTL. The TTL is the self-heal: a holder that crashes without
/// releasing blocks the address for at most one TTL.
pub struct GenerationLock {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl GenerationLock {
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn try_acquire(&self, address: &Address) -> LockOutcome {
        let generation = GenerationId::new();
        match self
            .store
            .set_nx(&lock_key(address), generation.as_str(), self.ttl)
            .await
        {
            Ok(true) => {
                debug!(address = %address, generation = %generation, "lock acquired");
                LockOutcome::Acquired(generation)
            }
            Ok(false) => {
                debug!(address = %address, "lock held by another generation");
                LockOutcome::Held
            }
            Err(e) => {
                warn!(address = %address, error = %e, "lock store unavailable, proceeding unlocked");
                LockOutcome::Degraded(generation)
            }
        }
    }

    /// Release the lock if `generation` still owns it. A stale holder never
    /// removes a newer generation's lock.
    pub async fn release(&self, address: &Address, generation: &GenerationId) -> bool {
        match self
            .store
            .delete_if_eq(&lock_key(address), generation.as_str())
            .await
        {
            Ok(true) => {
                debug!(address = %address, generation = %generation, "lock released");
                true
            }
            Ok(false) => {
                debug!(address = %address, generation = %generation, "lock no longer owned at release");
                false
            }
            Err(e) => {
                warn!(address = %address, error = %e, "lock release failed; TTL will clear it");
                false
            }
        }
    }

    /// Whether `generation` still owns the address. Unknown (store down)
    /// counts as current.
    pub async fn is_current(&self, address: &Address, generation: &GenerationId) -> bool {
        match self.store.get(&lock_key(address)).await {
            Ok(value) => value.as_deref() == Some(generation.as_str()),
            Err(e) => {
                warn!(address = %address, error = %e, "lock check failed");
                true
            }
        }
    }
}

fn lock_key(address: &Address) -> String {
    format!("generation:{address}")
}

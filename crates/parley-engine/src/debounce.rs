use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use parley_core::Address;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::BufferWindow;

struct TimerEntry {
    epoch: u64,
    /// Start of the window the ceiling is measured from.
    window_started: Instant,
    handle: JoinHandle<()>,
}

/// Decides when a buffered address is handed off for dispatch.
///
/// Each arrival pushes the hand-off back by the debounce window; the ceiling
/// (`max_wait`, measured from the first unit of the window) caps how far it
/// can be pushed. At most one timer exists per address: arming replaces the
/// previous one. A fired timer sends its address on the hand-off channel.
///
/// The registry is owned by this scheduler and is process-local. Losing it
/// (restart, another instance) only delays a hand-off until the next arrival;
/// the shared store stays authoritative for buffers and locks.
pub struct DebounceScheduler {
    timers: Arc<DashMap<Address, TimerEntry>>,
    fired_tx: mpsc::Sender<Address>,
    debounce: Duration,
    max_wait: Duration,
    next_epoch: AtomicU64,
}

impl DebounceScheduler {
    pub fn new(debounce: Duration, max_wait: Duration, fired_tx: mpsc::Sender<Address>) -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            fired_tx,
            debounce,
            max_wait,
            next_epoch: AtomicU64::new(0),
        }
    }

    /// A unit was appended to `address`'s buffer.
    pub fn on_arrival(&self, address: &Address, window: &BufferWindow) {
        let now = Instant::now();
        let window_started = if window.is_first {
            now
        } else {
            self.timers
                .get(address)
                .map(|entry| entry.window_started)
                .unwrap_or_else(|| started_from_wall_clock(now, window.first_seen_ms))
        };

        let ceiling = window_started + self.max_wait;
        let deadline = (now + self.debounce).min(ceiling);
        if deadline <= now {
            info!(address = %address, len = window.len, "max wait reached, handing off now");
        } else {
            debug!(
                address = %address,
                len = window.len,
                wait_ms = (deadline - now).as_millis() as u64,
                "debounce armed"
            );
        }
        self.arm(address, window_started, deadline.max(now));
    }

    /// Hand `address` off immediately, replacing any armed timer.
    pub fn fire_now(&self, address: &Address) {
        let now = Instant::now();
        self.arm(address, now, now);
    }

    /// Open a fresh window for an address whose hand-off was deferred
    /// (lock held). Waits one debounce period.
    pub fn rearm(&self, address: &Address) {
        let now = Instant::now();
        debug!(address = %address, "re-arming deferred hand-off");
        self.arm(address, now, now + self.debounce);
    }

    /// Drop the armed timer for `address`. Returns whether one existed.
    pub fn cancel(&self, address: &Address) -> bool {
        match self.timers.remove(address) {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Addresses with an armed timer.
    pub fn pending(&self) -> Vec<Address> {
        self.timers.iter().map(|e| e.key().clone()).collect()
    }

    /// Abort every armed timer (shutdown).
    pub fn cancel_all(&self) {
        self.timers.retain(|_, entry| {
            entry.handle.abort();
            false
        });
    }

    fn arm(&self, address: &Address, window_started: Instant, deadline: Instant) {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        // The entry guard is held while spawning so the timer cannot look for
        // its own entry before it is inserted.
        match self.timers.entry(address.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                let handle = self.spawn_timer(address.clone(), deadline, epoch);
                occupied.insert(TimerEntry {
                    epoch,
                    window_started,
                    handle,
                });
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_timer(address.clone(), deadline, epoch);
                vacant.insert(TimerEntry {
                    epoch,
                    window_started,
                    handle,
                });
            }
        }
    }

    fn spawn_timer(&self, address: Address, deadline: Instant, epoch: u64) -> JoinHandle<()> {
        let timers = Arc::clone(&self.timers);
        let fired_tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // superseded timers lost their entry to the replacement
            if timers
                .remove_if(&address, |_, entry| entry.epoch == epoch)
                .is_none()
            {
                return;
            }
            if fired_tx.send(address.clone()).await.is_err() {
                warn!(address = %address, "hand-off loop closed, dropping fired timer");
            }
        })
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Window start for an arrival whose window was opened elsewhere (another
/// instance, or before a restart), reconstructed from the head's wall clock.
fn started_from_wall_clock(now: Instant, first_seen_ms: i64) -> Instant {
    let age_ms = (chrono::Utc::now().timestamp_millis() - first_seen_ms).max(0) as u64;
    now.checked_sub(Duration::from_millis(age_ms)).unwrap_or(now)
}

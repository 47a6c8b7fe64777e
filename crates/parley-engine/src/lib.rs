//! `parley-engine`: per-conversation message coordination.
//!
//! # Flow
//!
//! ```text
//! inbound unit ─► SessionResolver::classify
//!                   ├─ Fresh / Reset ─► buffer + fire_now ─┐
//!                   └─ Active ────────► buffer + on_arrival ┤ (debounce)
//!                                                           ▼
//!                       hand-off loop ◄── fired addresses (mpsc)
//!                           │
//!                           ▼
//!                       Dispatcher: lock ─► drain ─► combine ─► agent
//!                                   ─► persist ─► reply ─► unlock
//! ```
//!
//! Buffers and locks live in the shared [`TtlStore`](parley_store::TtlStore);
//! the in-process timers only decide when to look at them.

pub mod buffer;
pub mod combine;
pub mod debounce;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lock;
pub mod proactive;
pub mod types;

pub use buffer::{BufferWindow, MessageBuffer};
pub use combine::{combine, Turn};
pub use debounce::DebounceScheduler;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use engine::{Engine, InboundOutcome};
pub use error::{EngineError, Result};
pub use lock::{GenerationLock, LockOutcome};
pub use proactive::{
    run_proactive_worker, FieldError, ProactiveJob, ProactiveMetadata, ProactiveQueue,
    ProactiveRequest,
};
pub use types::{BufferedMessage, InboundEnvelope, InboundUnit};

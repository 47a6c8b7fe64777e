//! `parley-store`: the shared TTL key-value store behind buffers and locks.
//!
//! # Overview
//!
//! Every coordination transition (buffer append, buffer drain, lock acquire,
//! lock release) is a single atomic operation of a [`TtlStore`]. In-process
//! timers only decide *when* to look at the store; the store decides *what*
//! happens, so several gateway instances sharing one store stay correct.
//!
//! | Backend        | Sharing                                   |
//! |----------------|-------------------------------------------|
//! | `MemoryStore`  | one process (dashmap)                     |
//! | `SqliteStore`  | every process on the host (one db file)   |

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{ListPush, TtlStore};

//! Conversation identity for Parley.
//!
//! [`ConversationStore`] is the system of record (SQLite) for conversations
//! and their message history. [`SessionResolver`] sits in front of it with a
//! TTL cache in the shared store and decides whether an inbound unit opens a
//! new session, resets one, or continues the active one.

pub mod db;
pub mod error;
pub mod resolver;
pub mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use resolver::{Classification, SessionResolver};
pub use store::ConversationStore;
pub use types::{Conversation, ConversationMessage, NewMessage, Role, TurnRecord};

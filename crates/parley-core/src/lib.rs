pub mod config;
pub mod error;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use types::{ActionType, Address, GenerationId, MessageKind, ThreadId};

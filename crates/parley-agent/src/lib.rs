//! Client side of the remote agent service.
//!
//! The dispatcher only sees the [`AgentClient`] trait; [`HttpAgentClient`]
//! talks to the real service and [`NullAgent`] stands in when none is
//! configured.

pub mod client;
pub mod error;
pub mod http;
pub mod null;

pub use client::{AgentClient, AgentReply, AgentRequest};
pub use error::AgentError;
pub use http::HttpAgentClient;
pub use null::NullAgent;

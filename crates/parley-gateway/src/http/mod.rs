pub mod health;
pub mod inbound;
pub mod proactive;

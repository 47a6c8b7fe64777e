pub mod channel;
pub mod error;
pub mod log;
pub mod send;
pub mod types;
pub mod whatsapp;

pub use channel::Channel;
pub use error::ChannelError;
pub use log::LogChannel;
pub use types::{Button, OutboundBody, OutboundMessage, MAX_BUTTONS, MAX_BUTTON_TITLE_CHARS};
pub use whatsapp::WhatsAppChannel;

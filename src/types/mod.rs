//! Core data model: chats, messages, content blocks and subscriber events.

pub mod chat;
pub mod content;
pub mod event;
pub mod message;

pub use chat::*;
pub use content::*;
pub use event::*;
pub use message::*;

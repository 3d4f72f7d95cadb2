//! Tendril: streaming run engine for branching chat.
//!
//! Converts the event stream of an agent run into durable, structured
//! conversation state. Messages form a tree per chat; each run produces one
//! assistant message, streamed to a subscriber and written through to a
//! [`store::MessageStore`] as it grows. Runs can be cancelled mid-flight.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use tendril::prelude::*;
//!
//! # async fn example() -> tendril::error::Result<()> {
//! let source = ScriptedSource::new([
//!     UpstreamEvent::content("Hello"),
//!     UpstreamEvent::RunCompleted,
//! ]);
//! let service = ChatService::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(source),
//!     EngineConfig::from_env()?,
//! );
//!
//! let (sink, mut events) = channel_sink();
//! let request = RunRequest::builder()
//!     .messages(vec![InputMessage::user("Hi")])
//!     .build();
//! let run = service.stream_chat(request, sink).await?;
//! while let Some(event) = events.next().await {
//!     let done = event.is_terminal();
//!     println!("{event:?}");
//!     if done {
//!         break;
//!     }
//! }
//! run.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod chats;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod prelude;
pub mod registry;
pub mod store;
pub mod types;
pub mod upstream;

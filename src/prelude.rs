//! Convenience re-exports for common use.

pub use crate::assembler::{ContentAssembler, RunOutcome, Transition};
pub use crate::chats::{CancelRunResponse, ChatService, ChatView};
pub use crate::config::{EngineConfig, ModelSettings};
pub use crate::error::{Result, TendrilError};
pub use crate::models::ModelRef;
pub use crate::orchestrator::{
    channel_sink, ChatEventSink, ParentLeaf, RunHandle, RunRequest, RunResult, RunStatus,
    StreamOrchestrator,
};
pub use crate::registry::{CancelHandle, RunRegistry};
pub use crate::store::{FileStore, MemoryStore, MessageStore};
pub use crate::types::{
    AgentConfig, Chat, ChatEvent, ContentBlock, InputMessage, Message, MessageContent, Role,
};
pub use crate::upstream::{AgentEventSource, ScriptedSource, ToolInvocation, UpstreamEvent};

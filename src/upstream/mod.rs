//! Boundary to the agent that actually produces a run's events.
//!
//! The engine never talks to a model directly. It opens an
//! [`AgentEventSource`] with the translated conversation history and pulls
//! [`UpstreamEvent`]s from the returned stream until a terminal event, the
//! end of the stream, or cancellation.

pub mod history;
mod scripted;

pub use history::{AgentToolCall, AgentToolResult, ContentPart, ModelMessage};
pub use scripted::{ScriptStep, ScriptedSource};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::AgentConfig;

/// Tool call as reported by the upstream agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
            result: None,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Correlation key shared by the started and completed events of one call.
    pub fn match_key(&self) -> String {
        format!("{}:{}", self.name, self.args)
    }
}

/// Discriminated event produced by an agent run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamEvent {
    /// Carries the agent's own run id, used for diagnostics.
    RunStarted { run_id: String },
    ContentDelta { text: String },
    ReasoningStarted,
    ReasoningDelta { text: String },
    ReasoningCompleted,
    ToolCallStarted { tool: ToolInvocation },
    ToolCallCompleted { tool: ToolInvocation },
    RunCompleted,
    RunCancelled,
    RunError { message: String },
}

impl UpstreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::RunError {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted | Self::RunCancelled | Self::RunError { .. }
        )
    }
}

/// Everything an agent needs to produce one assistant message.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub chat_id: String,
    pub assistant_message_id: String,
    pub agent: AgentConfig,
    pub messages: Vec<ModelMessage>,
}

pub type UpstreamStream = BoxStream<'static, Result<UpstreamEvent>>;

/// Opens agent runs.
///
/// Implementations should stop producing events once `cancel` fires; the
/// engine drops the stream after the run ends either way.
#[async_trait]
pub trait AgentEventSource: Send + Sync {
    async fn open(&self, request: UpstreamRequest, cancel: CancellationToken)
        -> Result<UpstreamStream>;
}

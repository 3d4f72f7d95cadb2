//! Events delivered to a run's subscriber.

use serde::{Deserialize, Serialize};

/// Tool call payload carried by tool events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    pub id: String,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    pub is_completed: bool,
}

/// Normalized event sent over the subscriber channel, in production order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ChatEvent {
    RunStarted {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Carries the id of the assistant message being produced.
    AssistantMessageId { content: String },
    RunContent { content: String },
    ReasoningStarted,
    ReasoningStep {
        #[serde(rename = "reasoningContent")]
        reasoning_content: String,
    },
    ReasoningCompleted,
    ToolCallStarted { tool: ToolCallInfo },
    ToolCallCompleted { tool: ToolCallInfo },
    RunCompleted,
    RunCancelled,
    RunError { content: String },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted | Self::RunCancelled | Self::RunError { .. }
        )
    }
}

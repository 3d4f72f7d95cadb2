//! Content blocks: the typed units an assistant message is made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// A typed unit of assistant output.
///
/// While a run is streaming, the text or reasoning still being accumulated is
/// stored with `provisional = true`. Terminal writes never contain provisional
/// blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        provisional: bool,
    },
    Reasoning {
        content: String,
        #[serde(rename = "isCompleted", default)]
        is_completed: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        provisional: bool,
    },
    ToolCall {
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolArgs", default)]
        tool_args: serde_json::Value,
        #[serde(rename = "toolResult", default, skip_serializing_if = "Option::is_none")]
        tool_result: Option<String>,
        #[serde(rename = "isCompleted", default)]
        is_completed: bool,
    },
    Error {
        content: String,
        timestamp: DateTime<Utc>,
    },
}

impl ContentBlock {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            provisional: false,
        }
    }

    /// A finished reasoning block.
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::Reasoning {
            content: content.into(),
            is_completed: true,
            provisional: false,
        }
    }

    /// An error block stamped with the current time.
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_provisional(&self) -> bool {
        match self {
            Self::Text { provisional, .. } | Self::Reasoning { provisional, .. } => *provisional,
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    /// Turn an in-flight block into its terminal form.
    pub fn finalized(self) -> Self {
        match self {
            Self::Text { content, .. } => Self::Text {
                content,
                provisional: false,
            },
            Self::Reasoning {
                content,
                is_completed,
                provisional,
            } => Self::Reasoning {
                content,
                is_completed: is_completed || provisional,
                provisional: false,
            },
            other => other,
        }
    }
}

/// Stored message content: an ordered block list, or a legacy plain string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl MessageContent {
    /// View the content as blocks.
    ///
    /// Legacy strings holding a serialized block array are decoded; any other
    /// non-empty string becomes a single text block.
    pub fn to_blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Blocks(blocks) => blocks.clone(),
            Self::Text(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Vec::new();
                }
                if trimmed.starts_with('[') {
                    if let Ok(blocks) = serde_json::from_str::<Vec<ContentBlock>>(trimmed) {
                        return blocks;
                    }
                }
                vec![ContentBlock::text(raw.clone())]
            }
        }
    }

    /// Concatenation of all text blocks (or the legacy string itself).
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text(raw) if !raw.trim_start().starts_with('[') => raw.clone(),
            _ => self
                .to_blocks()
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { content, .. } => Some(content.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Blocks(blocks) => blocks.is_empty(),
            Self::Text(raw) => raw.is_empty(),
        }
    }
}

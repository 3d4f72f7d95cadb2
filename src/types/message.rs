//! Stored message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::content::MessageContent;

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One node in a chat's message tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    /// Position among siblings sharing `(chat_id, parent_message_id)`, from 1.
    #[serde(default = "default_sequence")]
    pub sequence: u32,
    #[serde(default = "default_complete")]
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

fn default_sequence() -> u32 {
    1
}

fn default_complete() -> bool {
    true
}

/// A conversation turn supplied by the caller when starting a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

impl InputMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Input for [`MessageStore::append_message`](crate::store::MessageStore::append_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Caller-chosen id; a fresh UUID is generated when `None`.
    pub id: Option<String>,
    pub chat_id: String,
    pub parent_id: Option<String>,
    pub role: Role,
    pub content: MessageContent,
    pub model_used: Option<String>,
}

impl NewMessage {
    pub fn new(chat_id: impl Into<String>, role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: None,
            chat_id: chat_id.into(),
            parent_id: None,
            role,
            content: content.into(),
            model_used: None,
        }
    }

    pub fn user(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(chat_id, Role::User, MessageContent::Text(text.into()))
    }

    /// An empty, incomplete assistant placeholder.
    pub fn assistant_placeholder(chat_id: impl Into<String>) -> Self {
        Self::new(chat_id, Role::Assistant, MessageContent::default())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_model_used(mut self, model_used: Option<String>) -> Self {
        self.model_used = model_used;
        self
    }
}

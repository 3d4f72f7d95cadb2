//! Chat and per-chat agent configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ModelRef;

/// Agent configuration attached to a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub tool_ids: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AgentConfig {
    pub fn for_model(model: &ModelRef, tool_ids: Vec<String>) -> Self {
        Self {
            provider: model.provider.clone(),
            model_id: model.model_id.clone(),
            tool_ids,
            ..Default::default()
        }
    }

    pub fn model(&self) -> ModelRef {
        ModelRef::new(self.provider.clone(), self.model_id.clone())
    }

    /// The `modelUsed` stamp for assistant messages, if a model is set.
    pub fn model_used(&self) -> Option<String> {
        let model = self.model();
        (!model.model_id.is_empty()).then(|| model.to_string())
    }
}

/// A conversation thread with its own message tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub agent_config: Option<AgentConfig>,
    #[serde(default)]
    pub active_leaf_message_id: Option<String>,
}

/// Input for creating a chat in a store.
#[derive(Debug, Clone, Default)]
pub struct NewChat {
    pub id: Option<String>,
    pub title: String,
    pub model: Option<String>,
    pub agent_config: Option<AgentConfig>,
}

/// Partial chat update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ChatUpdate {
    pub title: Option<String>,
    pub model: Option<String>,
}

//! Chat management commands.
//!
//! [`ChatService`] is the surface a desktop shell calls into: chat CRUD,
//! per-chat agent configuration, branch navigation and the streaming
//! commands, which are delegated to the [`StreamOrchestrator`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assembler::parse_think_tags;
use crate::config::EngineConfig;
use crate::error::{Result, TendrilError};
use crate::models::ModelRef;
use crate::orchestrator::{ChatEventSink, RunHandle, RunRequest, StreamOrchestrator};
use crate::registry::RunRegistry;
use crate::store::MessageStore;
use crate::types::{
    AgentConfig, Chat, ChatUpdate, ContentBlock, Message, MessageContent, NewChat, NewMessage,
    Role,
};
use crate::upstream::AgentEventSource;

const DEFAULT_TITLE: &str = "New Chat";

/// Reply to a cancellation request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelRunResponse {
    pub cancelled: bool,
}

/// A chat together with its active branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: Chat,
    pub messages: Vec<Message>,
}

/// Make sure `chat_id` names a chat with an agent configuration.
///
/// Without an id a fresh chat is created. For an existing chat a missing
/// configuration is filled in from defaults; otherwise only provider and
/// model are updated, and only when `model` differs from what is stored.
pub async fn ensure_chat_initialized(
    store: &dyn MessageStore,
    config: &EngineConfig,
    chat_id: Option<&str>,
    model: Option<&str>,
) -> Result<Chat> {
    let selected = model.map(ModelRef::parse).filter(|m| !m.is_empty());

    let existing = match chat_id {
        Some(id) => store.get_chat(id).await?,
        None => None,
    };
    let Some(mut chat) = existing else {
        let agent = agent_for(config, selected.as_ref());
        let chat = store
            .create_chat(NewChat {
                id: chat_id.map(str::to_string),
                title: DEFAULT_TITLE.to_string(),
                model: model.map(str::to_string),
                agent_config: Some(agent),
            })
            .await?;
        tracing::debug!(chat_id = %chat.id, "created chat");
        return Ok(chat);
    };

    let updated = match (chat.agent_config.clone(), selected) {
        (None, selected) => Some(agent_for(config, selected.as_ref())),
        (Some(mut agent), Some(selected)) => {
            let provider_changed =
                !selected.provider.is_empty() && selected.provider != agent.provider;
            let model_changed = !selected.model_id.is_empty() && selected.model_id != agent.model_id;
            if provider_changed {
                agent.provider = selected.provider;
            }
            if model_changed {
                agent.model_id = selected.model_id;
            }
            (provider_changed || model_changed).then_some(agent)
        }
        (Some(_), None) => None,
    };
    if let Some(agent) = updated {
        store.set_agent_config(&chat.id, agent.clone()).await?;
        chat.agent_config = Some(agent);
    }
    Ok(chat)
}

fn agent_for(config: &EngineConfig, selected: Option<&ModelRef>) -> AgentConfig {
    match selected {
        Some(model) => AgentConfig::for_model(model, config.default_tool_ids.clone()),
        None => config.default_agent_config(),
    }
}

pub struct ChatService {
    store: Arc<dyn MessageStore>,
    orchestrator: StreamOrchestrator,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        source: Arc<dyn AgentEventSource>,
        config: EngineConfig,
    ) -> Self {
        let orchestrator = StreamOrchestrator::new(store.clone(), source, RunRegistry::new(), config);
        Self {
            store,
            orchestrator,
        }
    }

    pub fn from_orchestrator(orchestrator: StreamOrchestrator) -> Self {
        Self {
            store: orchestrator.store().clone(),
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &StreamOrchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &RunRegistry {
        self.orchestrator.registry()
    }

    fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }

    pub async fn ensure_chat_initialized(
        &self,
        chat_id: Option<&str>,
        model: Option<&str>,
    ) -> Result<String> {
        ensure_chat_initialized(self.store.as_ref(), self.config(), chat_id, model)
            .await
            .map(|chat| chat.id)
    }

    pub async fn create_chat(
        &self,
        title: Option<&str>,
        model: Option<&str>,
        agent_config: Option<AgentConfig>,
    ) -> Result<Chat> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE);
        self.store
            .create_chat(NewChat {
                id: None,
                title: title.to_string(),
                model: model.map(str::to_string),
                agent_config: Some(agent_config.unwrap_or_else(|| self.config().default_agent_config())),
            })
            .await
    }

    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        self.store.list_chats().await
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<ChatView> {
        let chat = self.require_chat(chat_id).await?;
        let messages = self.store.get_active_branch(chat_id).await?;
        Ok(ChatView { chat, messages })
    }

    pub async fn update_chat(&self, chat_id: &str, update: ChatUpdate) -> Result<Chat> {
        self.store
            .update_chat(chat_id, update)
            .await?
            .ok_or_else(|| TendrilError::chat_not_found(chat_id))
    }

    /// Delete a chat, asking any of its active runs to stop first.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let cancelled = self.registry().cancel_chat(chat_id);
        let deleted = self.store.delete_chat(chat_id).await?;
        if deleted {
            tracing::info!(chat_id = %chat_id, cancelled_runs = cancelled, "deleted chat");
        }
        Ok(deleted)
    }

    /// Stored configuration, or defaults when the chat has none.
    pub async fn agent_config(&self, chat_id: &str) -> Result<AgentConfig> {
        let chat = self.require_chat(chat_id).await?;
        Ok(chat
            .agent_config
            .unwrap_or_else(|| self.config().default_agent_config()))
    }

    pub async fn set_chat_tools(&self, chat_id: &str, tool_ids: Vec<String>) -> Result<AgentConfig> {
        let mut agent = self.agent_config(chat_id).await?;
        agent.tool_ids = tool_ids;
        self.store.set_agent_config(chat_id, agent.clone()).await?;
        Ok(agent)
    }

    pub async fn set_chat_model(&self, chat_id: &str, selector: &str) -> Result<AgentConfig> {
        let model: ModelRef = selector.parse()?;
        let mut agent = self.agent_config(chat_id).await?;
        agent.provider = model.provider;
        agent.model_id = model.model_id;
        self.store.set_agent_config(chat_id, agent.clone()).await?;
        Ok(agent)
    }

    /// Make the branch through `message_id` active, descending to its
    /// first-child leaf, and return that branch.
    pub async fn switch_branch(&self, chat_id: &str, message_id: &str) -> Result<Vec<Message>> {
        let leaf = self.store.get_leaf_descendant(message_id, chat_id).await?;
        self.store.set_active_leaf(chat_id, &leaf).await?;
        self.store.get_path(&leaf).await
    }

    /// The message and its siblings, ordered by sequence.
    pub async fn siblings(&self, message_id: &str) -> Result<Vec<Message>> {
        let message = self.require_message(message_id).await?;
        self.store
            .get_children(message.parent_message_id.as_deref(), &message.chat_id)
            .await
    }

    /// Store an edited copy of a user message as its newest sibling and make
    /// it the active leaf. Returns the new message id.
    ///
    /// Only user messages can be edited; assistant replies are regenerated
    /// by a run instead.
    pub async fn edit_message(&self, message_id: &str, content: impl Into<MessageContent>) -> Result<String> {
        let original = self.require_message(message_id).await?;
        if original.role != Role::User {
            return Err(TendrilError::InvalidArgument(format!(
                "message {message_id} is a {} message; only user messages can be edited",
                original.role
            )));
        }
        let id = self
            .store
            .append_message(
                NewMessage::new(&original.chat_id, Role::User, content)
                    .with_parent(original.parent_message_id.clone()),
            )
            .await?;
        self.store.set_active_leaf(&original.chat_id, &id).await?;
        Ok(id)
    }

    /// Re-split a stored message's text on `<think>` tags.
    ///
    /// Returns `false` when the text contains no think tag.
    pub async fn reprocess_think_tags(&self, message_id: &str) -> Result<bool> {
        let message = self.require_message(message_id).await?;
        let text = message.content.plain_text();
        if !text.contains(crate::assembler::think_tags::OPEN_TAG) {
            return Ok(false);
        }
        let blocks: Vec<ContentBlock> = parse_think_tags(&text);
        self.store
            .update_content(message_id, MessageContent::Blocks(blocks))
            .await
    }

    pub async fn stream_chat(&self, request: RunRequest, sink: ChatEventSink) -> Result<RunHandle> {
        self.orchestrator.start_run(request, sink).await
    }

    pub fn cancel_run(&self, message_id: &str) -> CancelRunResponse {
        CancelRunResponse {
            cancelled: self.orchestrator.cancel_run(message_id),
        }
    }

    async fn require_chat(&self, chat_id: &str) -> Result<Chat> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| TendrilError::chat_not_found(chat_id))
    }

    async fn require_message(&self, message_id: &str) -> Result<Message> {
        self.store
            .get_message(message_id)
            .await?
            .ok_or_else(|| TendrilError::message_not_found(message_id))
    }
}

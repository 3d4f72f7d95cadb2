use async_trait::async_trait;
use tokio::sync::RwLock;

use super::state::StoreState;
use super::MessageStore;
use crate::error::Result;
use crate::types::{AgentConfig, Chat, ChatUpdate, Message, MessageContent, NewChat, NewMessage};

/// Process-local store. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        self.state.write().await.create_chat(chat)
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.state.read().await.chat(chat_id))
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        Ok(self.state.read().await.list_chats())
    }

    async fn update_chat(&self, chat_id: &str, update: ChatUpdate) -> Result<Option<Chat>> {
        Ok(self.state.write().await.update_chat(chat_id, update))
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        Ok(self.state.write().await.delete_chat(chat_id))
    }

    async fn set_agent_config(&self, chat_id: &str, config: AgentConfig) -> Result<()> {
        self.state.write().await.set_agent_config(chat_id, config)
    }

    async fn append_message(&self, message: NewMessage) -> Result<String> {
        self.state.write().await.append_message(message)
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        Ok(self.state.read().await.message(message_id))
    }

    async fn update_content(&self, message_id: &str, content: MessageContent) -> Result<bool> {
        Ok(self.state.write().await.update_content(message_id, content))
    }

    async fn mark_complete(&self, message_id: &str) -> Result<bool> {
        Ok(self.state.write().await.mark_complete(message_id))
    }

    async fn set_active_leaf(&self, chat_id: &str, message_id: &str) -> Result<()> {
        self.state.write().await.set_active_leaf(chat_id, message_id)
    }

    async fn get_path(&self, leaf_id: &str) -> Result<Vec<Message>> {
        self.state.read().await.path(leaf_id)
    }

    async fn get_children(&self, parent_id: Option<&str>, chat_id: &str) -> Result<Vec<Message>> {
        Ok(self.state.read().await.children(parent_id, chat_id))
    }

    async fn get_leaf_descendant(&self, message_id: &str, chat_id: &str) -> Result<String> {
        self.state.read().await.leaf_descendant(message_id, chat_id)
    }

    async fn get_active_branch(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.state.read().await.active_branch(chat_id)
    }
}

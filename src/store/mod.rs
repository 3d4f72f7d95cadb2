//! Durable message tree storage.
//!
//! A chat owns a tree of messages: each message points at its parent and
//! carries a 1-based `sequence` among its siblings. The chat remembers one
//! active leaf; the active branch is the root-to-leaf path ending there.

mod file;
mod memory;
mod state;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AgentConfig, Chat, ChatUpdate, Message, MessageContent, NewChat, NewMessage};

/// Persistence for chats and their message trees.
///
/// Every operation is atomic with respect to the others. Tree walks are
/// bounded by the chat's message count and fail with
/// [`TendrilError::CorruptTree`](crate::error::TendrilError::CorruptTree)
/// instead of looping on a cyclic parent chain.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat>;

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>>;

    /// Most recently updated first.
    async fn list_chats(&self) -> Result<Vec<Chat>>;

    async fn update_chat(&self, chat_id: &str, update: ChatUpdate) -> Result<Option<Chat>>;

    /// Delete a chat and every message in it. Returns `false` if absent.
    async fn delete_chat(&self, chat_id: &str) -> Result<bool>;

    async fn set_agent_config(&self, chat_id: &str, config: AgentConfig) -> Result<()>;

    /// Insert a message as the next sibling under its parent and return its id.
    ///
    /// Assistant messages start incomplete; user and tool messages are
    /// complete on insert.
    async fn append_message(&self, message: NewMessage) -> Result<String>;

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>>;

    /// Replace a message's content. No-op (returns `false`) if absent.
    async fn update_content(&self, message_id: &str, content: MessageContent) -> Result<bool>;

    /// Returns `false` if the message is absent or already complete.
    async fn mark_complete(&self, message_id: &str) -> Result<bool>;

    async fn set_active_leaf(&self, chat_id: &str, message_id: &str) -> Result<()>;

    /// Ordered root-to-leaf path. Unknown leaves yield an empty path.
    async fn get_path(&self, leaf_id: &str) -> Result<Vec<Message>>;

    /// Children of `parent_id` (roots when `None`), ascending by sequence.
    async fn get_children(&self, parent_id: Option<&str>, chat_id: &str) -> Result<Vec<Message>>;

    /// Descend through first children until reaching a leaf.
    async fn get_leaf_descendant(&self, message_id: &str, chat_id: &str) -> Result<String>;

    /// Path to the active leaf, or every message by creation time when the
    /// chat has no active leaf.
    async fn get_active_branch(&self, chat_id: &str) -> Result<Vec<Message>>;
}

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::state::{StoreFile, StoreState};
use super::MessageStore;
use crate::config::EngineConfig;
use crate::error::{Result, TendrilError};
use crate::types::{AgentConfig, Chat, ChatUpdate, Message, MessageContent, NewChat, NewMessage};

/// JSON-file backed store.
///
/// The whole tree is kept in memory and written through to disk after every
/// mutation. A mutation is applied to a copy of the tree, the copy is written
/// to a sibling temp file and renamed into place, and only then does it
/// replace the in-memory tree. A failed write leaves both the file and the
/// store as they were.
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl FileStore {
    /// Open (or start) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let file: StoreFile = serde_json::from_str(&raw)?;
                tracing::debug!(
                    path = %path.display(),
                    chats = file.chats.len(),
                    messages = file.messages.len(),
                    "loaded chat store"
                );
                StoreState::from_file(file)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => StoreState::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Open the store at the configured data directory.
    pub async fn open_default(config: &EngineConfig) -> Result<Self> {
        Self::open(config.store_path()).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against a copy of the tree and commit it once it is on disk.
    ///
    /// `op` returns its value and whether anything changed; unchanged trees
    /// are not written. The write lock is held throughout, so flushes land in
    /// mutation order.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut StoreState) -> Result<(T, bool)>,
    ) -> Result<T> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let (value, changed) = op(&mut next)?;
        if changed {
            self.write_file(&next.to_file()).await?;
            *state = next;
        }
        Ok(value)
    }

    async fn write_file(&self, file: &StoreFile) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(file)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TendrilError::Storage(format!("create {}: {e}", parent.display()))
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| TendrilError::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| TendrilError::Storage(format!("replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        self.mutate(|state| state.create_chat(chat).map(|chat| (chat, true)))
            .await
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.state.read().await.chat(chat_id))
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        Ok(self.state.read().await.list_chats())
    }

    async fn update_chat(&self, chat_id: &str, update: ChatUpdate) -> Result<Option<Chat>> {
        self.mutate(|state| {
            let chat = state.update_chat(chat_id, update);
            let changed = chat.is_some();
            Ok((chat, changed))
        })
        .await
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        self.mutate(|state| {
            let deleted = state.delete_chat(chat_id);
            Ok((deleted, deleted))
        })
        .await
    }

    async fn set_agent_config(&self, chat_id: &str, config: AgentConfig) -> Result<()> {
        self.mutate(|state| state.set_agent_config(chat_id, config).map(|()| ((), true)))
            .await
    }

    async fn append_message(&self, message: NewMessage) -> Result<String> {
        self.mutate(|state| state.append_message(message).map(|id| (id, true)))
            .await
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        Ok(self.state.read().await.message(message_id))
    }

    async fn update_content(&self, message_id: &str, content: MessageContent) -> Result<bool> {
        self.mutate(|state| {
            let updated = state.update_content(message_id, content);
            Ok((updated, updated))
        })
        .await
    }

    async fn mark_complete(&self, message_id: &str) -> Result<bool> {
        self.mutate(|state| {
            let changed = state.mark_complete(message_id);
            Ok((changed, changed))
        })
        .await
    }

    async fn set_active_leaf(&self, chat_id: &str, message_id: &str) -> Result<()> {
        self.mutate(|state| state.set_active_leaf(chat_id, message_id).map(|()| ((), true)))
            .await
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

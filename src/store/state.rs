//! In-memory tree bookkeeping shared by every store backend.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TendrilError};
use crate::types::{
    AgentConfig, Chat, ChatUpdate, Message, MessageContent, NewChat, NewMessage, Role,
};

const STORE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Message>,
    /// Message ids per chat, in creation order.
    chat_messages: HashMap<String, Vec<String>>,
}

impl StoreState {
    pub(crate) fn create_chat(&mut self, input: NewChat) -> Result<Chat> {
        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.chats.contains_key(&id) {
            return Err(TendrilError::AlreadyExists { kind: "chat", id });
        }
        let now = Utc::now();
        let chat = Chat {
            id: id.clone(),
            title: input.title,
            model: input.model,
            created_at: now,
            updated_at: now,
            agent_config: input.agent_config,
            active_leaf_message_id: None,
        };
        self.chats.insert(id.clone(), chat.clone());
        self.chat_messages.insert(id, Vec::new());
        Ok(chat)
    }

    pub(crate) fn chat(&self, chat_id: &str) -> Option<Chat> {
        self.chats.get(chat_id).cloned()
    }

    pub(crate) fn list_chats(&self) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self.chats.values().cloned().collect();
        chats.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        chats
    }

    pub(crate) fn update_chat(&mut self, chat_id: &str, update: ChatUpdate) -> Option<Chat> {
        let chat = self.chats.get_mut(chat_id)?;
        if let Some(title) = update.title {
            chat.title = title;
        }
        if let Some(model) = update.model {
            chat.model = Some(model);
        }
        chat.updated_at = Utc::now();
        Some(chat.clone())
    }

    /// Removes the chat and all of its messages.
    pub(crate) fn delete_chat(&mut self, chat_id: &str) -> bool {
        if self.chats.remove(chat_id).is_none() {
            return false;
        }
        for id in self.chat_messages.remove(chat_id).unwrap_or_default() {
            self.messages.remove(&id);
        }
        true
    }

    pub(crate) fn set_agent_config(&mut self, chat_id: &str, config: AgentConfig) -> Result<()> {
        let chat = self
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| TendrilError::chat_not_found(chat_id))?;
        chat.agent_config = Some(config);
        Ok(())
    }

    fn next_sibling_sequence(&self, parent_id: Option<&str>, chat_id: &str) -> u32 {
        self.siblings_of(parent_id, chat_id)
            .map(|m| m.sequence)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub(crate) fn append_message(&mut self, input: NewMessage) -> Result<String> {
        if !self.chats.contains_key(&input.chat_id) {
            return Err(TendrilError::chat_not_found(&input.chat_id));
        }
        if let Some(parent_id) = input.parent_id.as_deref() {
            match self.messages.get(parent_id) {
                Some(parent) if parent.chat_id == input.chat_id => {}
                Some(_) => {
                    return Err(TendrilError::InvalidArgument(format!(
                        "parent message {parent_id} belongs to another chat"
                    )))
                }
                None => return Err(TendrilError::message_not_found(parent_id)),
            }
        }
        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.messages.contains_key(&id) {
            return Err(TendrilError::AlreadyExists { kind: "message", id });
        }

        let sequence = self.next_sibling_sequence(input.parent_id.as_deref(), &input.chat_id);
        let now = Utc::now();
        let message = Message {
            id: id.clone(),
            chat_id: input.chat_id.clone(),
            role: input.role,
            content: input.content,
            parent_message_id: input.parent_id,
            sequence,
            is_complete: input.role != Role::Assistant,
            created_at: now,
            model_used: input.model_used,
        };
        self.messages.insert(id.clone(), message);
        self.chat_messages
            .entry(input.chat_id.clone())
            .or_default()
            .push(id.clone());
        if let Some(chat) = self.chats.get_mut(&input.chat_id) {
            chat.updated_at = now;
        }
        Ok(id)
    }

    pub(crate) fn message(&self, message_id: &str) -> Option<Message> {
        self.messages.get(message_id).cloned()
    }

    pub(crate) fn update_content(&mut self, message_id: &str, content: MessageContent) -> bool {
        match self.messages.get_mut(message_id) {
            Some(message) => {
                message.content = content;
                true
            }
            None => false,
        }
    }

    /// Returns `true` only when the flag actually flipped.
    pub(crate) fn mark_complete(&mut self, message_id: &str) -> bool {
        match self.messages.get_mut(message_id) {
            Some(message) if !message.is_complete => {
                message.is_complete = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_active_leaf(&mut self, chat_id: &str, message_id: &str) -> Result<()> {
        match self.messages.get(message_id) {
            Some(message) if message.chat_id == chat_id => {}
            _ => {
                return Err(TendrilError::InvalidArgument(format!(
                    "message {message_id} is not part of chat {chat_id}"
                )))
            }
        }
        let chat = self
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| TendrilError::chat_not_found(chat_id))?;
        chat.active_leaf_message_id = Some(message_id.to_string());
        Ok(())
    }

    fn walk_limit(&self, chat_id: &str) -> usize {
        self.chat_messages.get(chat_id).map_or(0, Vec::len) + 1
    }

    /// Root-to-leaf path ending at `leaf_id`; empty if the leaf is unknown.
    pub(crate) fn path(&self, leaf_id: &str) -> Result<Vec<Message>> {
        let Some(leaf) = self.messages.get(leaf_id) else {
            return Ok(Vec::new());
        };
        let limit = self.walk_limit(&leaf.chat_id);
        let mut path = Vec::new();
        let mut current = Some(leaf_id);
        while let Some(id) = current {
            if path.len() >= limit {
                return Err(TendrilError::CorruptTree {
                    message_id: leaf_id.to_string(),
                    limit,
                });
            }
            let Some(message) = self.messages.get(id) else {
                break;
            };
            path.push(message.clone());
            current = message.parent_message_id.as_deref();
        }
        path.reverse();
        Ok(path)
    }

    fn siblings_of<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        chat_id: &'a str,
    ) -> impl Iterator<Item = &'a Message> + 'a {
        self.chat_messages
            .get(chat_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.messages.get(id))
            .filter(move |m| m.parent_message_id.as_deref() == parent_id)
    }

    pub(crate) fn children(&self, parent_id: Option<&str>, chat_id: &str) -> Vec<Message> {
        let mut children: Vec<Message> = self.siblings_of(parent_id, chat_id).cloned().collect();
        children.sort_by_key(|m| m.sequence);
        children
    }

    /// Follow first children down to a leaf.
    pub(crate) fn leaf_descendant(&self, message_id: &str, chat_id: &str) -> Result<String> {
        let limit = self.walk_limit(chat_id);
        let mut current = message_id.to_string();
        for _ in 0..limit {
            match self.children(Some(&current), chat_id).into_iter().next() {
                Some(child) => current = child.id,
                None => return Ok(current),
            }
        }
        Err(TendrilError::CorruptTree {
            message_id: message_id.to_string(),
            limit,
        })
    }

    pub(crate) fn active_branch(&self, chat_id: &str) -> Result<Vec<Message>> {
        let chat = self
            .chats
            .get(chat_id)
            .ok_or_else(|| TendrilError::chat_not_found(chat_id))?;
        if let Some(leaf) = chat.active_leaf_message_id.as_deref() {
            return self.path(leaf);
        }
        // Ungraphed chats: plain creation order.
        let mut messages: Vec<Message> = self
            .chat_messages
            .get(chat_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.messages.get(id).cloned())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    pub(crate) fn to_file(&self) -> StoreFile {
        let mut chats: Vec<Chat> = self.chats.values().cloned().collect();
        chats.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let messages = chats
            .iter()
            .flat_map(|chat| self.chat_messages.get(&chat.id).into_iter().flatten())
            .filter_map(|id| self.messages.get(id).cloned())
            .collect();
        StoreFile {
            version: STORE_FILE_VERSION,
            saved_at: Utc::now(),
            chats,
            messages,
        }
    }

    pub(crate) fn from_file(file: StoreFile) -> Self {
        let mut state = Self::default();
        for chat in file.chats {
            state.chat_messages.insert(chat.id.clone(), Vec::new());
            state.chats.insert(chat.id.clone(), chat);
        }
        for message in file.messages {
            let Some(ids) = state.chat_messages.get_mut(&message.chat_id) else {
                tracing::warn!(
                    message_id = %message.id,
                    chat_id = %message.chat_id,
                    "dropping stored message for unknown chat"
                );
                continue;
            };
            ids.push(message.id.clone());
            state.messages.insert(message.id.clone(), message);
        }
        state
    }
}

/// On-disk envelope written by the file store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreFile {
    pub(crate) version: u32,
    pub(crate) saved_at: DateTime<Utc>,
    #[serde(default)]
    pub(crate) chats: Vec<Chat>,
    #[serde(default)]
    pub(crate) messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_chat() -> (StoreState, String) {
        let mut state = StoreState::default();
        let chat = state
            .create_chat(NewChat {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap();
        (state, chat.id)
    }

    #[test]
    fn cyclic_parent_links_are_reported_not_looped() {
        let (mut state, chat) = state_with_chat();
        let a = state.append_message(NewMessage::user(&chat, "a")).unwrap();
        let b = state
            .append_message(NewMessage::user(&chat, "b").with_parent(Some(a.clone())))
            .unwrap();
        state.messages.get_mut(&a).unwrap().parent_message_id = Some(b.clone());

        let err = state.path(&b).unwrap_err();
        assert!(matches!(err, TendrilError::CorruptTree { limit: 3, .. }));
    }

    #[test]
    fn self_parented_children_do_not_hang_leaf_search() {
        let (mut state, chat) = state_with_chat();
        let a = state.append_message(NewMessage::user(&chat, "a")).unwrap();
        state.messages.get_mut(&a).unwrap().parent_message_id = Some(a.clone());

        let err = state.leaf_descendant(&a, &chat).unwrap_err();
        assert!(matches!(err, TendrilError::CorruptTree { .. }));
    }

    #[test]
    fn file_round_trip_keeps_creation_order() {
        let (mut state, chat) = state_with_chat();
        let a = state.append_message(NewMessage::user(&chat, "a")).unwrap();
        let b = state
            .append_message(NewMessage::user(&chat, "b").with_parent(Some(a.clone())))
            .unwrap();

        let restored = StoreState::from_file(state.to_file());
        assert_eq!(restored.chat_messages[&chat], vec![a, b.clone()]);
        assert_eq!(restored.path(&b).unwrap().len(), 2);
    }

    #[test]
    fn orphaned_messages_are_dropped_on_load() {
        let (mut state, chat) = state_with_chat();
        state.append_message(NewMessage::user(&chat, "a")).unwrap();
        let mut file = state.to_file();
        file.chats.clear();

        let restored = StoreState::from_file(file);
        assert!(restored.messages.is_empty());
    }
}

//! Shared test helpers: queued upstream sources, a failing store, and event
//! collection.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use tendril::prelude::*;
use tendril::store::MessageStore;
use tendril::types::{ChatUpdate, NewChat, NewMessage};
use tendril::upstream::{UpstreamRequest, UpstreamStream};

/// Hands out one scripted source per `open` call, in order.
#[derive(Default)]
pub struct QueuedSource {
    scripts: Mutex<VecDeque<ScriptedSource>>,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl QueuedSource {
    pub fn new(scripts: impl IntoIterator<Item = ScriptedSource>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentEventSource for QueuedSource {
    async fn open(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedSource::new([UpstreamEvent::RunCompleted]));
        script.open(request, cancel).await
    }
}

/// Source whose `open` never resolves, like a hung connection.
#[derive(Default)]
pub struct StalledSource;

#[async_trait]
impl AgentEventSource for StalledSource {
    async fn open(
        &self,
        _request: UpstreamRequest,
        _cancel: CancellationToken,
    ) -> Result<UpstreamStream> {
        std::future::pending().await
    }
}

/// Memory store whose content writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_content_writes: AtomicBool,
}

impl FlakyStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_content_writes.store(true, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        self.inner.create_chat(chat).await
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        self.inner.get_chat(chat_id).await
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        self.inner.list_chats().await
    }

    async fn update_chat(&self, chat_id: &str, update: ChatUpdate) -> Result<Option<Chat>> {
        self.inner.update_chat(chat_id, update).await
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        self.inner.delete_chat(chat_id).await
    }

    async fn set_agent_config(&self, chat_id: &str, config: AgentConfig) -> Result<()> {
        self.inner.set_agent_config(chat_id, config).await
    }

    async fn append_message(&self, message: NewMessage) -> Result<String> {
        self.inner.append_message(message).await
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        self.inner.get_message(message_id).await
    }

    async fn update_content(&self, message_id: &str, content: MessageContent) -> Result<bool> {
        if self.fail_content_writes.load(Ordering::SeqCst) {
            return Err(TendrilError::Storage("disk full".into()));
        }
        self.inner.update_content(message_id, content).await
    }

    async fn mark_complete(&self, message_id: &str) -> Result<bool> {
        self.inner.mark_complete(message_id).await
    }

    async fn set_active_leaf(&self, chat_id: &str, message_id: &str) -> Result<()> {
        self.inner.set_active_leaf(chat_id, message_id).await
    }

    async fn get_path(&self, leaf_id: &str) -> Result<Vec<Message>> {
        self.inner.get_path(leaf_id).await
    }

    async fn get_children(&self, parent_id: Option<&str>, chat_id: &str) -> Result<Vec<Message>> {
        self.inner.get_children(parent_id, chat_id).await
    }

    async fn get_leaf_descendant(&self, message_id: &str, chat_id: &str) -> Result<String> {
        self.inner.get_leaf_descendant(message_id, chat_id).await
    }

    async fn get_active_branch(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.inner.get_active_branch(chat_id).await
    }
}

pub fn service_with(source: impl AgentEventSource + 'static) -> (ChatService, Arc<MemoryStore>) {
    service_with_config(source, EngineConfig::new())
}

pub fn service_with_config(
    source: impl AgentEventSource + 'static,
    config: EngineConfig,
) -> (ChatService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ChatService::new(store.clone(), Arc::new(source), config);
    (service, store)
}

pub fn user_turn(text: &str) -> RunRequest {
    RunRequest::builder()
        .messages(vec![InputMessage::user(text)])
        .build()
}

pub fn user_turn_in(chat_id: &str, text: &str) -> RunRequest {
    RunRequest::builder()
        .chat_id(chat_id.to_string())
        .messages(vec![InputMessage::user(text)])
        .build()
}

/// Drain events up to and including the first terminal one.
pub async fn until_terminal(events: &mut UnboundedReceiverStream<ChatEvent>) -> Vec<ChatEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        let done = event.is_terminal();
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}

/// Drain events until one matches `pred`.
pub async fn until(
    events: &mut UnboundedReceiverStream<ChatEvent>,
    pred: impl Fn(&ChatEvent) -> bool,
) -> Vec<ChatEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        let hit = pred(&event);
        seen.push(event);
        if hit {
            break;
        }
    }
    seen
}

/// Run one request to completion and return its events and result.
pub async fn run_to_end(service: &ChatService, request: RunRequest) -> (Vec<ChatEvent>, RunResult, String) {
    let (sink, mut events) = channel_sink();
    let handle = service.stream_chat(request, sink).await.unwrap();
    let id = handle.assistant_message_id().to_string();
    let result = handle.wait().await;
    let seen = until_terminal(&mut events).await;
    (seen, result, id)
}

/// A chat holding a single root-to-leaf chain of `depth` user messages.
pub async fn chain(store: &dyn MessageStore, depth: usize) -> (String, Vec<String>) {
    let chat = store
        .create_chat(NewChat {
            title: "chain".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut ids: Vec<String> = Vec::with_capacity(depth);
    for i in 0..depth {
        let id = store
            .append_message(
                NewMessage::user(&chat.id, format!("m{i}")).with_parent(ids.last().cloned()),
            )
            .await
            .unwrap();
        ids.push(id);
    }
    (chat.id, ids)
}

pub fn text_of(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

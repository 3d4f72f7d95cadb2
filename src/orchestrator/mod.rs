//! Drives one run end to end.
//!
//! [`StreamOrchestrator::start_run`] records the user turn and an assistant
//! placeholder, registers the run for cancellation, then spawns a task that
//! pulls upstream events through a [`ContentAssembler`], forwards the
//! resulting [`ChatEvent`]s to the subscriber and writes snapshots through
//! the store. The terminal event is delivered only once the final write has
//! been acknowledged.

mod persist;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::persist::PersistWriter;
use crate::assembler::{ContentAssembler, RunOutcome, Transition};
use crate::chats::ensure_chat_initialized;
use crate::config::EngineConfig;
use crate::error::{Result, TendrilError};
use crate::registry::{CancelHandle, RunRegistry};
use crate::store::MessageStore;
use crate::types::{
    ChatEvent, ContentBlock, InputMessage, Message, MessageContent, NewMessage, Role,
};
use crate::upstream::{history, AgentEventSource, UpstreamEvent, UpstreamRequest, UpstreamStream};

/// Callback receiving a run's events in order.
pub type ChatEventSink = Arc<dyn Fn(ChatEvent) + Send + Sync>;

/// A sink backed by an unbounded channel, plus the stream draining it.
pub fn channel_sink() -> (ChatEventSink, UnboundedReceiverStream<ChatEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: ChatEventSink = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (sink, UnboundedReceiverStream::new(rx))
}

/// Where a new user turn is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentLeaf {
    /// The chat's current active leaf.
    #[default]
    ActiveLeaf,
    /// Start a new root branch.
    Root,
    Message(String),
}

/// Request to start a run.
///
/// ```
/// use tendril::orchestrator::RunRequest;
/// use tendril::types::InputMessage;
///
/// let request = RunRequest::builder()
///     .chat_id("chat-1".to_string())
///     .messages(vec![InputMessage::user("hello")])
///     .build();
/// assert!(request.continue_message_id.is_none());
/// ```
#[derive(Debug, Clone, Default, Builder)]
pub struct RunRequest {
    /// Existing chat, or `None` to create one.
    pub chat_id: Option<String>,
    /// `provider:model` selector to apply to the chat before running.
    pub model: Option<String>,
    /// Conversation as the caller sees it. A trailing user turn is stored as
    /// a new message; when empty, history is read from the store.
    #[builder(default)]
    pub messages: Vec<InputMessage>,
    #[builder(default)]
    pub parent: ParentLeaf,
    /// Id for the assistant message; generated when absent.
    pub assistant_message_id: Option<String>,
    /// Resume this incomplete assistant message instead of creating one.
    pub continue_message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// How a run finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the final content reached the store.
    pub durable: bool,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            error: None,
            durable: true,
            finished_at: Utc::now(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            error: None,
            durable: true,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>, durable: bool) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error.into()),
            durable,
            finished_at: Utc::now(),
        }
    }

    fn from_outcome(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => Self::completed(),
            RunOutcome::Cancelled => Self::cancelled(),
            RunOutcome::Failed(message) => Self::failed(message.clone(), true),
        }
    }
}

/// Handle to a spawned run.
pub struct RunHandle {
    chat_id: String,
    assistant_message_id: String,
    cancel: CancelHandle,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn assistant_message_id(&self) -> &str {
        &self.assistant_message_id
    }

    /// Request cancellation; the run finishes on its own task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> RunResult {
        self.task
            .await
            .unwrap_or_else(|err| RunResult::failed(format!("run task failed: {err}"), false))
    }
}

/// Everything the drive task needs, prepared before it is spawned.
struct PreparedRun {
    chat_id: String,
    assistant_id: String,
    assembler: ContentAssembler,
    upstream: UpstreamRequest,
}

#[derive(Clone)]
pub struct StreamOrchestrator {
    store: Arc<dyn MessageStore>,
    source: Arc<dyn AgentEventSource>,
    registry: RunRegistry,
    config: Arc<EngineConfig>,
}

impl StreamOrchestrator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        source: Arc<dyn AgentEventSource>,
        registry: RunRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            source,
            registry,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Request cancellation of the run producing `message_id`.
    pub fn cancel_run(&self, message_id: &str) -> bool {
        let cancelled = self.registry.cancel(message_id);
        if cancelled {
            tracing::info!(message_id = %message_id, "run cancellation requested");
        } else {
            tracing::warn!(message_id = %message_id, "no active run to cancel");
        }
        cancelled
    }

    /// Start a run and return once its messages exist and it is registered.
    ///
    /// Fails with [`TendrilError::DuplicateRun`] when a run for the same
    /// assistant message is already active; nothing is written in that case.
    pub async fn start_run(&self, request: RunRequest, sink: ChatEventSink) -> Result<RunHandle> {
        let chat = ensure_chat_initialized(
            self.store.as_ref(),
            &self.config,
            request.chat_id.as_deref(),
            request.model.as_deref(),
        )
        .await?;

        let assistant_id = request
            .continue_message_id
            .clone()
            .or_else(|| request.assistant_message_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let cancel = CancelHandle::new();
        self.registry
            .register(assistant_id.clone(), chat.id.clone(), cancel.clone())?;

        let mut started = false;
        let prepared = match self
            .prepare(&chat.id, &assistant_id, request, &sink, &mut started)
            .await
        {
            Ok(prepared) => prepared,
            Err(err) => {
                self.registry.remove(&assistant_id);
                if started {
                    sink(ChatEvent::RunError {
                        content: err.to_string(),
                    });
                }
                return Err(err);
            }
        };

        tracing::debug!(
            chat_id = %prepared.chat_id,
            message_id = %prepared.assistant_id,
            model = %prepared.upstream.agent.model(),
            "run start"
        );

        let run = DriveRun {
            store: self.store.clone(),
            source: self.source.clone(),
            registry: self.registry.clone(),
            sink,
            token: cancel.token(),
            idle_timeout: self.config.stream_idle_timeout(),
        };
        let handle_chat_id = prepared.chat_id.clone();
        let task = tokio::spawn(run.drive(prepared));

        Ok(RunHandle {
            chat_id: handle_chat_id,
            assistant_message_id: assistant_id,
            cancel,
            task,
        })
    }

    async fn prepare(
        &self,
        chat_id: &str,
        assistant_id: &str,
        request: RunRequest,
        sink: &ChatEventSink,
        started: &mut bool,
    ) -> Result<PreparedRun> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| TendrilError::chat_not_found(chat_id))?;
        let agent = chat
            .agent_config
            .clone()
            .unwrap_or_else(|| self.config.default_agent_config());

        let (assembler, history_leaf) = match request.continue_message_id.as_deref() {
            Some(message_id) => {
                let message = self.continuable(chat_id, message_id).await?;
                self.store.set_active_leaf(chat_id, message_id).await?;
                *started = true;
                sink(ChatEvent::RunStarted {
                    session_id: chat_id.to_string(),
                });
                sink(ChatEvent::AssistantMessageId {
                    content: message_id.to_string(),
                });
                let parse = self.config.parse_think_tags(message.model_used.as_deref());
                let assembler =
                    ContentAssembler::resume(message_id, parse, message.content.to_blocks());
                (assembler, Some(message_id.to_string()))
            }
            None => {
                let mut parent = match &request.parent {
                    ParentLeaf::ActiveLeaf => chat.active_leaf_message_id.clone(),
                    ParentLeaf::Root => None,
                    ParentLeaf::Message(id) => Some(id.clone()),
                };

                if let Some(input) = request.messages.last().filter(|m| m.role == Role::User) {
                    let mut message = NewMessage::new(chat_id, Role::User, input.content.clone())
                        .with_parent(parent.clone());
                    if let Some(id) = &input.id {
                        message = message.with_id(id.clone());
                    }
                    let user_id = self.store.append_message(message).await?;
                    self.store.set_active_leaf(chat_id, &user_id).await?;
                    parent = Some(user_id);
                }

                *started = true;
                sink(ChatEvent::RunStarted {
                    session_id: chat_id.to_string(),
                });

                let model_used = agent.model_used();
                let placeholder = NewMessage::assistant_placeholder(chat_id)
                    .with_id(assistant_id)
                    .with_parent(parent.clone())
                    .with_model_used(model_used.clone());
                self.store.append_message(placeholder).await?;
                self.store.set_active_leaf(chat_id, assistant_id).await?;
                sink(ChatEvent::AssistantMessageId {
                    content: assistant_id.to_string(),
                });

                let parse = self.config.parse_think_tags(model_used.as_deref());
                (ContentAssembler::new(assistant_id, parse), parent)
            }
        };

        let messages = if request.messages.is_empty() {
            match history_leaf {
                Some(leaf) => history::from_stored(&self.store.get_path(&leaf).await?),
                None => Vec::new(),
            }
        } else {
            history::from_inputs(&request.messages)
        };

        Ok(PreparedRun {
            chat_id: chat_id.to_string(),
            assistant_id: assistant_id.to_string(),
            assembler,
            upstream: UpstreamRequest {
                chat_id: chat_id.to_string(),
                assistant_message_id: assistant_id.to_string(),
                agent,
                messages,
            },
        })
    }

    async fn continuable(&self, chat_id: &str, message_id: &str) -> Result<Message> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .filter(|m| m.chat_id == chat_id)
            .ok_or_else(|| TendrilError::message_not_found(message_id))?;
        if message.role != Role::Assistant || message.is_complete {
            return Err(TendrilError::InvalidState(format!(
                "message {message_id} is not an incomplete assistant message"
            )));
        }
        Ok(message)
    }
}

struct DriveRun {
    store: Arc<dyn MessageStore>,
    source: Arc<dyn AgentEventSource>,
    registry: RunRegistry,
    sink: ChatEventSink,
    token: CancellationToken,
    idle_timeout: Option<Duration>,
}

impl DriveRun {
    async fn drive(self, prepared: PreparedRun) -> RunResult {
        let PreparedRun {
            chat_id,
            assistant_id,
            mut assembler,
            upstream,
        } = prepared;

        let mut idle: Option<Pin<Box<Sleep>>> = self.idle_timeout.map(|d| Box::pin(time::sleep(d)));

        let mut stream: UpstreamStream = tokio::select! {
            biased;
            // Nothing to read; the loop's cancel arm ends the run.
            _ = self.token.cancelled() => futures::stream::empty().boxed(),
            _ = idle_elapsed(&mut idle) => {
                return self.fail_before_stream(&chat_id, &assistant_id, self.idle_error()).await;
            }
            opened = self.source.open(upstream, self.token.clone()) => match opened {
                Ok(stream) => stream,
                Err(err) => return self.fail_before_stream(&chat_id, &assistant_id, err).await,
            },
        };
        self.reset_idle(&mut idle);

        let writer = PersistWriter::spawn(self.store.clone(), assistant_id.clone());

        let (events, outcome, blocks) = loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => UpstreamEvent::RunCancelled,
                _ = idle_elapsed(&mut idle) => UpstreamEvent::error(self.idle_error().to_string()),
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        self.reset_idle(&mut idle);
                        event
                    }
                    Some(Err(err)) => UpstreamEvent::error(err.to_string()),
                    None => UpstreamEvent::RunCompleted,
                },
            };

            if let UpstreamEvent::RunStarted { run_id } = &event {
                tracing::debug!(message_id = %assistant_id, run_id = %run_id, "captured upstream run id");
                self.registry.set_run_id(&assistant_id, run_id.clone());
            }

            match assembler.apply(event) {
                Transition::Continue { events, snapshot } => {
                    for event in events {
                        (self.sink)(event);
                    }
                    if let Some(blocks) = snapshot {
                        writer.snapshot(blocks);
                    }
                }
                Transition::Terminal {
                    events,
                    outcome,
                    blocks,
                } => break (events, outcome, blocks),
                Transition::Ignored => {}
            }
        };
        drop(stream);

        for event in events {
            (self.sink)(event);
        }

        let (terminal, result) = match writer.finish(blocks, outcome.marks_complete()).await {
            Ok(()) => (outcome.terminal_event(), RunResult::from_outcome(&outcome)),
            Err(err) => {
                tracing::warn!(
                    chat_id = %chat_id,
                    message_id = %assistant_id,
                    error = %err,
                    "run finished but its content was not saved"
                );
                let message = format!("failed to save message {assistant_id}: {err}");
                (
                    ChatEvent::RunError {
                        content: message.clone(),
                    },
                    RunResult::failed(message, false),
                )
            }
        };

        self.registry.remove(&assistant_id);
        tracing::debug!(
            chat_id = %chat_id,
            message_id = %assistant_id,
            status = %result.status,
            durable = result.durable,
            "run finished"
        );
        (self.sink)(terminal);
        result
    }

    fn idle_error(&self) -> TendrilError {
        let ms = self
            .idle_timeout
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        TendrilError::Timeout(ms)
    }

    fn reset_idle(&self, idle: &mut Option<Pin<Box<Sleep>>>) {
        if let (Some(sleep), Some(timeout)) = (idle.as_mut(), self.idle_timeout) {
            sleep.as_mut().reset(time::Instant::now() + timeout);
        }
    }

    /// The upstream never produced a stream: append an error block to
    /// whatever the message already holds and report the failure.
    async fn fail_before_stream(
        &self,
        chat_id: &str,
        assistant_id: &str,
        err: TendrilError,
    ) -> RunResult {
        let message = err.to_string();
        tracing::warn!(chat_id = %chat_id, message_id = %assistant_id, error = %message, "upstream failed to start");

        let durable = match self.append_error_block(assistant_id, &message).await {
            Ok(()) => true,
            Err(write_err) => {
                tracing::warn!(message_id = %assistant_id, error = %write_err, "failed to record upstream error");
                false
            }
        };

        self.registry.remove(assistant_id);
        (self.sink)(ChatEvent::RunError {
            content: message.clone(),
        });
        RunResult::failed(message, durable)
    }

    async fn append_error_block(&self, message_id: &str, error: &str) -> Result<()> {
        let mut blocks: Vec<ContentBlock> = self
            .store
            .get_message(message_id)
            .await?
            .map(|m| m.content.to_blocks())
            .unwrap_or_default();
        blocks.push(ContentBlock::error(error));
        self.store
            .update_content(message_id, MessageContent::Blocks(blocks))
            .await?;
        Ok(())
    }
}

async fn idle_elapsed(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

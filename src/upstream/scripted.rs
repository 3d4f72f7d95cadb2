use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AgentEventSource, UpstreamEvent, UpstreamRequest, UpstreamStream};
use crate::error::{Result, TendrilError};

/// One step of a [`ScriptedSource`] run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(UpstreamEvent),
    /// Yield a transport error instead of an event.
    Fail(String),
    Delay(Duration),
}

impl From<UpstreamEvent> for ScriptStep {
    fn from(event: UpstreamEvent) -> Self {
        Self::Event(event)
    }
}

/// Agent source that replays a fixed script.
///
/// Useful for tests and demos. After the script runs out the stream ends,
/// unless [`hold_open`](Self::hold_open) was set, in which case it idles
/// until cancelled. Cancellation is honoured between steps and answered with
/// an upstream `RunCancelled`.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
    hold_open: bool,
    open_error: Option<String>,
    requests: Arc<Mutex<Vec<UpstreamRequest>>>,
}

impl ScriptedSource {
    pub fn new(events: impl IntoIterator<Item = UpstreamEvent>) -> Self {
        Self::from_steps(events.into_iter().map(ScriptStep::Event))
    }

    pub fn from_steps(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Make every `open` call fail with an upstream error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AgentEventSource for ScriptedSource {
    async fn open(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamStream> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        if let Some(message) = &self.open_error {
            return Err(TendrilError::Upstream(message.clone()));
        }

        let steps = self.steps.clone();
        let hold_open = self.hold_open;
        let stream = async_stream::stream! {
            for step in steps {
                if cancel.is_cancelled() {
                    yield Ok(UpstreamEvent::RunCancelled);
                    return;
                }
                match step {
                    ScriptStep::Event(event) => yield Ok(event),
                    ScriptStep::Fail(message) => yield Err(TendrilError::Upstream(message)),
                    ScriptStep::Delay(duration) => {
                        let cancelled = tokio::select! {
                            _ = tokio::time::sleep(duration) => false,
                            _ = cancel.cancelled() => true,
                        };
                        if cancelled {
                            yield Ok(UpstreamEvent::RunCancelled);
                            return;
                        }
                    }
                }
            }
            if hold_open {
                cancel.cancelled().await;
                yield Ok(UpstreamEvent::RunCancelled);
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentConfig;
    use futures::StreamExt;

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            chat_id: "c".into(),
            assistant_message_id: "a".into(),
            agent: AgentConfig::default(),
            messages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replays_script_then_ends() {
        let source = ScriptedSource::new([UpstreamEvent::content("hi"), UpstreamEvent::RunCompleted]);
        let events: Vec<_> = source
            .open(request(), CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn held_stream_answers_cancellation() {
        let source = ScriptedSource::new([UpstreamEvent::content("Hel")]).hold_open();
        let token = CancellationToken::new();
        let mut stream = source.open(request(), token.clone()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), UpstreamEvent::content("Hel"));
        token.cancel();
        assert_eq!(stream.next().await.unwrap().unwrap(), UpstreamEvent::RunCancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn failing_source_rejects_open() {
        let source = ScriptedSource::failing("connection refused");
        let err = source.open(request(), CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, TendrilError::Upstream(_)));
    }
}

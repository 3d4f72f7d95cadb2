//! Turns upstream events into content blocks and subscriber events.
//!
//! The assembler is a synchronous state machine: every [`UpstreamEvent`] is
//! fed through [`ContentAssembler::apply`], which returns the events to
//! forward and, when stored content changed, a snapshot to persist. It does
//! no I/O of its own.

pub mod think_tags;

pub use think_tags::{parse_think_tags, Segment, ThinkTagScanner};

use std::collections::HashMap;

use crate::types::{ChatEvent, ContentBlock, ToolCallInfo};
use crate::upstream::{ToolInvocation, UpstreamEvent};

/// Lifecycle of one assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Streaming,
    /// Streaming, currently inside a `<think>` span.
    InsideReasoningTag,
    Completed,
    Errored,
    Cancelled,
}

impl AssemblerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    pub fn terminal_event(&self) -> ChatEvent {
        match self {
            Self::Completed => ChatEvent::RunCompleted,
            Self::Cancelled => ChatEvent::RunCancelled,
            Self::Failed(message) => ChatEvent::RunError {
                content: message.clone(),
            },
        }
    }

    /// Errored messages stay incomplete so they can be continued.
    pub fn marks_complete(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Result of feeding one event to the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Continue {
        events: Vec<ChatEvent>,
        /// Block list to write, provisional buffers included.
        snapshot: Option<Vec<ContentBlock>>,
    },
    /// The run is over. `events` precede the terminal event, which the caller
    /// emits once `blocks` are stored.
    Terminal {
        events: Vec<ChatEvent>,
        outcome: RunOutcome,
        blocks: Vec<ContentBlock>,
    },
    /// Arrived after the run already ended.
    Ignored,
}

pub struct ContentAssembler {
    assistant_id: String,
    blocks: Vec<ContentBlock>,
    text: String,
    reasoning: String,
    scanner: Option<ThinkTagScanner>,
    tool_counter: usize,
    tool_ids: HashMap<String, String>,
    last_tool_id: Option<String>,
    state: AssemblerState,
}

impl ContentAssembler {
    pub fn new(assistant_id: impl Into<String>, parse_think_tags: bool) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            blocks: Vec::new(),
            text: String::new(),
            reasoning: String::new(),
            scanner: parse_think_tags.then(ThinkTagScanner::new),
            tool_counter: 0,
            tool_ids: HashMap::new(),
            last_tool_id: None,
            state: AssemblerState::Idle,
        }
    }

    /// Continue an existing message. Trailing error blocks from a failed
    /// attempt are dropped and tool ids resume after the stored tool calls.
    pub fn resume(
        assistant_id: impl Into<String>,
        parse_think_tags: bool,
        mut blocks: Vec<ContentBlock>,
    ) -> Self {
        while blocks.last().is_some_and(ContentBlock::is_error) {
            blocks.pop();
        }
        let mut assembler = Self::new(assistant_id, parse_think_tags);
        assembler.tool_counter = blocks.iter().filter(|b| b.is_tool_call()).count();
        assembler.blocks = blocks.into_iter().map(ContentBlock::finalized).collect();
        assembler
    }

    pub fn state(&self) -> AssemblerState {
        match self.state {
            AssemblerState::Streaming if self.scanner.as_ref().is_some_and(|s| s.is_inside()) => {
                AssemblerState::InsideReasoningTag
            }
            state => state,
        }
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    /// Flushed blocks plus provisional buffers. Bytes held back by the
    /// think-tag scanner are not included.
    pub fn snapshot(&self) -> Vec<ContentBlock> {
        let mut blocks = self.blocks.clone();
        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text {
                content: self.text.clone(),
                provisional: true,
            });
        }
        if !self.reasoning.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                content: self.reasoning.clone(),
                is_completed: false,
                provisional: true,
            });
        }
        blocks
    }

    pub fn apply(&mut self, event: UpstreamEvent) -> Transition {
        if self.state.is_terminal() {
            return Transition::Ignored;
        }
        self.state = AssemblerState::Streaming;

        let mut events = Vec::new();
        let changed = match event {
            UpstreamEvent::RunStarted { .. } => false,
            UpstreamEvent::ContentDelta { text } => self.on_content(&text, &mut events),
            UpstreamEvent::ReasoningStarted => {
                self.drain_scanner(&mut events);
                self.flush_text();
                events.push(ChatEvent::ReasoningStarted);
                false
            }
            UpstreamEvent::ReasoningDelta { text } => {
                if text.is_empty() {
                    false
                } else {
                    self.drain_scanner(&mut events);
                    self.flush_text();
                    self.reasoning.push_str(&text);
                    events.push(ChatEvent::ReasoningStep {
                        reasoning_content: text,
                    });
                    true
                }
            }
            UpstreamEvent::ReasoningCompleted => {
                self.drain_scanner(&mut events);
                self.flush_reasoning();
                events.push(ChatEvent::ReasoningCompleted);
                true
            }
            UpstreamEvent::ToolCallStarted { tool } => {
                self.drain_scanner(&mut events);
                self.flush_buffers();
                let id = self.next_tool_id();
                self.tool_ids.insert(tool.match_key(), id.clone());
                self.last_tool_id = Some(id.clone());
                events.push(ChatEvent::ToolCallStarted {
                    tool: tool_info(id, tool, false),
                });
                true
            }
            UpstreamEvent::ToolCallCompleted { tool } => {
                self.drain_scanner(&mut events);
                self.flush_buffers();
                let id = match self.tool_ids.remove(&tool.match_key()) {
                    Some(id) => id,
                    None => match self.last_tool_id.clone() {
                        Some(id) => id,
                        None => self.next_tool_id(),
                    },
                };
                let info = tool_info(id, tool, true);
                self.blocks.push(ContentBlock::ToolCall {
                    id: info.id.clone(),
                    tool_name: info.tool_name.clone(),
                    tool_args: info.tool_args.clone(),
                    tool_result: info.tool_result.clone(),
                    is_completed: true,
                });
                events.push(ChatEvent::ToolCallCompleted { tool: info });
                true
            }
            UpstreamEvent::RunCompleted => {
                return self.terminate(events, AssemblerState::Completed, RunOutcome::Completed)
            }
            UpstreamEvent::RunCancelled => {
                return self.terminate(events, AssemblerState::Cancelled, RunOutcome::Cancelled)
            }
            UpstreamEvent::RunError { message } => {
                return self.terminate(events, AssemblerState::Errored, RunOutcome::Failed(message))
            }
        };

        Transition::Continue {
            events,
            snapshot: changed.then(|| self.snapshot()),
        }
    }

    fn on_content(&mut self, text: &str, events: &mut Vec<ChatEvent>) -> bool {
        if text.is_empty() {
            return false;
        }
        match self.scanner.as_mut().map(|scanner| scanner.push(text)) {
            Some(segments) => {
                let changed = !segments.is_empty();
                for segment in segments {
                    self.on_segment(segment, events);
                }
                changed
            }
            None => {
                self.flush_reasoning();
                self.text.push_str(text);
                events.push(ChatEvent::RunContent {
                    content: text.to_string(),
                });
                true
            }
        }
    }

    fn on_segment(&mut self, segment: Segment, events: &mut Vec<ChatEvent>) {
        match segment {
            Segment::Text(chunk) => {
                self.flush_reasoning();
                self.text.push_str(&chunk);
                events.push(ChatEvent::RunContent { content: chunk });
            }
            Segment::EnterReasoning => {
                self.flush_text();
                events.push(ChatEvent::ReasoningStarted);
            }
            Segment::Reasoning(chunk) => {
                self.reasoning.push_str(&chunk);
                events.push(ChatEvent::ReasoningStep {
                    reasoning_content: chunk,
                });
            }
            Segment::ExitReasoning => {
                self.flush_reasoning();
                events.push(ChatEvent::ReasoningCompleted);
            }
        }
    }

    fn drain_scanner(&mut self, events: &mut Vec<ChatEvent>) {
        if let Some(segment) = self.scanner.as_mut().and_then(ThinkTagScanner::drain_pending) {
            self.on_segment(segment, events);
        }
    }

    fn terminate(
        &mut self,
        mut events: Vec<ChatEvent>,
        state: AssemblerState,
        outcome: RunOutcome,
    ) -> Transition {
        let tail = self
            .scanner
            .as_mut()
            .map(ThinkTagScanner::finish)
            .unwrap_or_default();
        for segment in tail {
            self.on_segment(segment, &mut events);
        }
        self.flush_buffers();
        if let RunOutcome::Failed(message) = &outcome {
            self.blocks.push(ContentBlock::error(message.clone()));
        }
        self.state = state;
        Transition::Terminal {
            events,
            outcome,
            blocks: self.blocks.clone(),
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.blocks.push(ContentBlock::text(std::mem::take(&mut self.text)));
        }
    }

    fn flush_reasoning(&mut self) {
        if !self.reasoning.is_empty() {
            self.blocks
                .push(ContentBlock::reasoning(std::mem::take(&mut self.reasoning)));
        }
    }

    fn flush_buffers(&mut self) {
        self.flush_text();
        self.flush_reasoning();
    }

    fn next_tool_id(&mut self) -> String {
        let id = format!("{}-tool-{}", self.assistant_id, self.tool_counter);
        self.tool_counter += 1;
        id
    }
}

fn tool_info(id: String, tool: ToolInvocation, is_completed: bool) -> ToolCallInfo {
    ToolCallInfo {
        id,
        tool_name: tool.name,
        tool_args: tool.args,
        tool_result: if is_completed { tool.result } else { None },
        is_completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn feed(assembler: &mut ContentAssembler, events: Vec<UpstreamEvent>) -> Vec<Transition> {
        events.into_iter().map(|e| assembler.apply(e)).collect()
    }

    fn final_blocks(transitions: &[Transition]) -> Vec<ContentBlock> {
        match transitions.last() {
            Some(Transition::Terminal { blocks, .. }) => blocks.clone(),
            other => panic!("expected terminal transition, got {other:?}"),
        }
    }

    #[test]
    fn text_and_reasoning_alternate_into_blocks() {
        let mut assembler = ContentAssembler::new("m", false);
        let transitions = feed(
            &mut assembler,
            vec![
                UpstreamEvent::reasoning("think"),
                UpstreamEvent::content("Hel"),
                UpstreamEvent::content("lo"),
                UpstreamEvent::RunCompleted,
            ],
        );
        assert_eq!(
            final_blocks(&transitions),
            vec![ContentBlock::reasoning("think"), ContentBlock::text("Hello")]
        );
        assert_eq!(assembler.state(), AssemblerState::Completed);
    }

    #[test]
    fn snapshots_mark_in_flight_buffers_provisional() {
        let mut assembler = ContentAssembler::new("m", false);
        let transition = assembler.apply(UpstreamEvent::content("Hel"));
        assert_eq!(
            transition,
            Transition::Continue {
                events: vec![ChatEvent::RunContent {
                    content: "Hel".into()
                }],
                snapshot: Some(vec![ContentBlock::Text {
                    content: "Hel".into(),
                    provisional: true,
                }]),
            }
        );
    }

    #[test]
    fn tool_calls_are_matched_by_name_and_args() {
        let mut assembler = ContentAssembler::new("m", false);
        let call = ToolInvocation::new("calc", json!({"a": 1}));
        let transitions = feed(
            &mut assembler,
            vec![
                UpstreamEvent::ToolCallStarted { tool: call.clone() },
                UpstreamEvent::ToolCallCompleted {
                    tool: call.with_result("2"),
                },
                UpstreamEvent::RunCompleted,
            ],
        );
        assert_eq!(
            final_blocks(&transitions),
            vec![ContentBlock::ToolCall {
                id: "m-tool-0".into(),
                tool_name: "calc".into(),
                tool_args: json!({"a": 1}),
                tool_result: Some("2".into()),
                is_completed: true,
            }]
        );
    }

    #[test]
    fn unmatched_completion_falls_back_to_last_id() {
        let mut assembler = ContentAssembler::new("m", false);
        assembler.apply(UpstreamEvent::ToolCallStarted {
            tool: ToolInvocation::new("search", json!({"q": "a"})),
        });
        assembler.apply(UpstreamEvent::ToolCallStarted {
            tool: ToolInvocation::new("search", json!({"q": "b"})),
        });
        let transition = assembler.apply(UpstreamEvent::ToolCallCompleted {
            tool: ToolInvocation::new("search", json!({"q": "rewritten"})),
        });
        let Transition::Continue { events, .. } = transition else {
            panic!("expected continue");
        };
        assert!(matches!(
            &events[0],
            ChatEvent::ToolCallCompleted { tool } if tool.id == "m-tool-1"
        ));
    }

    #[test]
    fn think_tags_split_across_chunks() {
        let mut assembler = ContentAssembler::new("m", true);
        let transitions = feed(
            &mut assembler,
            vec![
                UpstreamEvent::content("<thi"),
                UpstreamEvent::content("nk>X</think>Y"),
                UpstreamEvent::RunCompleted,
            ],
        );
        assert_eq!(
            final_blocks(&transitions),
            vec![ContentBlock::reasoning("X"), ContentBlock::text("Y")]
        );
        // The first chunk is fully held back, so nothing is written for it.
        assert_eq!(
            transitions[0],
            Transition::Continue {
                events: vec![],
                snapshot: None
            }
        );
    }

    #[test]
    fn stream_ending_inside_a_tag_closes_reasoning() {
        let mut assembler = ContentAssembler::new("m", true);
        assembler.apply(UpstreamEvent::content("<think>pondering"));
        assert_eq!(assembler.state(), AssemblerState::InsideReasoningTag);
        let Transition::Terminal { events, blocks, .. } = assembler.apply(UpstreamEvent::RunCompleted)
        else {
            panic!("expected terminal");
        };
        assert_eq!(events.last(), Some(&ChatEvent::ReasoningCompleted));
        assert_eq!(blocks, vec![ContentBlock::reasoning("pondering")]);
    }

    #[test]
    fn errors_append_an_error_block_and_leave_message_open() {
        let mut assembler = ContentAssembler::new("m", false);
        assembler.apply(UpstreamEvent::content("partial"));
        let Transition::Terminal { outcome, blocks, .. } =
            assembler.apply(UpstreamEvent::error("rate limited"))
        else {
            panic!("expected terminal");
        };
        assert!(!outcome.marks_complete());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], ContentBlock::text("partial"));
        assert!(matches!(&blocks[1], ContentBlock::Error { content, .. } if content == "rate limited"));
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut assembler = ContentAssembler::new("m", false);
        assembler.apply(UpstreamEvent::RunCancelled);
        assert_eq!(assembler.apply(UpstreamEvent::RunCompleted), Transition::Ignored);
        assert_eq!(assembler.apply(UpstreamEvent::content("late")), Transition::Ignored);
    }

    #[test]
    fn resume_drops_trailing_errors_and_continues_tool_ids() {
        let stored = vec![
            ContentBlock::ToolCall {
                id: "m-tool-0".into(),
                tool_name: "calc".into(),
                tool_args: json!({}),
                tool_result: None,
                is_completed: true,
            },
            ContentBlock::Text {
                content: "so far".into(),
                provisional: true,
            },
            ContentBlock::error("boom"),
        ];
        let mut assembler = ContentAssembler::resume("m", false, stored);
        let Transition::Continue { events, .. } = assembler.apply(UpstreamEvent::ToolCallStarted {
            tool: ToolInvocation::new("calc", json!({})),
        }) else {
            panic!("expected continue");
        };
        assert!(matches!(&events[0], ChatEvent::ToolCallStarted { tool } if tool.id == "m-tool-1"));
        assert_eq!(assembler.snapshot()[1], ContentBlock::text("so far"));
    }
}

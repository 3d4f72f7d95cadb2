//! Conversation history in the shape agents consume.

use serde::{Deserialize, Serialize};

use crate::types::{ContentBlock, InputMessage, Message, MessageContent, Role};

/// A message in a conversation sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ModelMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Assistant turn requesting a tool, optionally preceded by text.
    pub fn tool_call(text: Option<String>, call: AgentToolCall) -> Self {
        let mut content = Vec::with_capacity(2);
        if let Some(text) = text {
            content.push(ContentPart::Text { text });
        }
        content.push(ContentPart::ToolCall(call));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult(AgentToolResult {
                tool_call_id: tool_call_id.into(),
                result: result.into(),
            })],
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> Vec<&AgentToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall(AgentToolCall),
    ToolResult(AgentToolResult),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentToolResult {
    pub tool_call_id: String,
    pub result: String,
}

/// Translate one stored turn into upstream messages.
///
/// User turns become a single text message. Assistant block lists are split
/// at each tool call: text accumulated so far (joined by spaces) rides on the
/// tool-call message, and a tool-result message follows when a result was
/// recorded. Reasoning and error blocks stay local. Tool-role turns are not
/// forwarded.
pub fn translate(role: Role, content: &MessageContent) -> Vec<ModelMessage> {
    match role {
        Role::User => vec![ModelMessage::user(content.plain_text())],
        Role::Assistant => translate_assistant(content.to_blocks()),
        Role::Tool => Vec::new(),
    }
}

fn translate_assistant(blocks: Vec<ContentBlock>) -> Vec<ModelMessage> {
    let mut messages = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { content, .. } => text_parts.push(content),
            ContentBlock::ToolCall {
                id,
                tool_name,
                tool_args,
                tool_result,
                ..
            } => {
                let text = (!text_parts.is_empty()).then(|| text_parts.join(" "));
                text_parts.clear();
                messages.push(ModelMessage::tool_call(
                    text,
                    AgentToolCall {
                        id: id.clone(),
                        name: tool_name,
                        arguments: tool_args,
                    },
                ));
                if let Some(result) = tool_result.filter(|r| !r.is_empty()) {
                    messages.push(ModelMessage::tool_result(id, result));
                }
            }
            ContentBlock::Reasoning { .. } | ContentBlock::Error { .. } => {}
        }
    }

    if !text_parts.is_empty() {
        messages.push(ModelMessage::assistant(text_parts.join(" ")));
    }
    if messages.is_empty() {
        messages.push(ModelMessage::assistant(""));
    }
    messages
}

pub fn from_inputs(inputs: &[InputMessage]) -> Vec<ModelMessage> {
    inputs
        .iter()
        .flat_map(|m| translate(m.role, &m.content))
        .collect()
}

pub fn from_stored(messages: &[Message]) -> Vec<ModelMessage> {
    messages
        .iter()
        .flat_map(|m| translate(m.role, &m.content))
        .collect()
}

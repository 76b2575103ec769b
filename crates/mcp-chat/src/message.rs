//! Conversation messages as exchanged with chat clients, and their conversion
//! into the flat history a model provider consumes.
use mcp_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a single tool invocation inside an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    PartialCall,
    Call,
    Result,
}

/// Coarse call state used for presentation: a result is either present or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    pub fn call(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            state: ToolInvocationState::Call,
            result: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.state = ToolInvocationState::Result;
        self.result = Some(result);
        self
    }

    pub fn call_state(&self) -> CallState {
        match self.state {
            ToolInvocationState::Result => CallState::Completed,
            ToolInvocationState::PartialCall | ToolInvocationState::Call => CallState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        reasoning: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolInvocation {
        tool_invocation: ToolInvocation,
    },
    StepStart,
    /// Parts this server does not interpret (sources, files, ...) are accepted and ignored.
    #[serde(other)]
    Unknown,
}

/// A conversation turn. The id is assigned once by whoever appends the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            content: String::new(),
            parts: Vec::new(),
        }
    }

    /// A user turn carrying plain text, both as content and as a single text part.
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            role: Role::User,
            content: text.clone(),
            parts: vec![MessagePart::Text { text }],
        }
    }

    pub fn assistant(id: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.content.push_str(&text);
        self.parts.push(MessagePart::Text { text });
        self
    }

    pub fn with_tool_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.parts.push(MessagePart::ToolInvocation {
            tool_invocation: invocation,
        });
        self
    }

    /// Parts as the rest of the system sees them. Clients that only send `content`
    /// get a single synthesized text part.
    pub fn effective_parts(&self) -> Vec<MessagePart> {
        if self.parts.is_empty() && !self.content.is_empty() {
            vec![MessagePart::Text {
                text: self.content.clone(),
            }]
        } else {
            self.parts.clone()
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.effective_parts()
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::ToolInvocation { tool_invocation } => Some(tool_invocation),
            _ => None,
        })
    }

    pub fn tool_invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts.iter_mut().find_map(|part| match part {
            MessagePart::ToolInvocation { tool_invocation }
                if tool_invocation.tool_call_id == tool_call_id =>
            {
                Some(tool_invocation)
            }
            _ => None,
        })
    }
}

/// A tool call as requested by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Provider-facing history entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    System(String),
    User(String),
    Assistant {
        text: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// Flatten client messages into model history.
///
/// Assistant turns are split at tool boundaries: each batch of completed tool
/// invocations becomes an assistant entry with its calls followed by one tool entry
/// per result. Invocations that never produced a result are dropped, since a call
/// without a matching result is rejected by providers.
pub fn to_model_messages(messages: &[Message]) -> Vec<ModelMessage> {
    let mut history = Vec::new();

    for message in messages {
        match message.role {
            Role::System => history.push(ModelMessage::System(message.text())),
            Role::User => history.push(ModelMessage::User(message.text())),
            Role::Assistant => {
                let mut text = String::new();
                let mut calls = Vec::new();
                let mut results = Vec::new();

                for part in message.effective_parts() {
                    match part {
                        MessagePart::Text { text: fragment } => {
                            if !calls.is_empty() {
                                flush_assistant(&mut history, &mut text, &mut calls, &mut results);
                            }
                            text.push_str(&fragment);
                        }
                        MessagePart::ToolInvocation { tool_invocation } => {
                            let Some(result) = tool_invocation.result.as_ref() else {
                                continue;
                            };
                            if tool_invocation.state != ToolInvocationState::Result {
                                continue;
                            }
                            results.push(ModelMessage::Tool {
                                tool_call_id: tool_invocation.tool_call_id.clone(),
                                content: tool_result_text(result),
                            });
                            calls.push(ToolCallRequest {
                                id: tool_invocation.tool_call_id,
                                name: tool_invocation.tool_name,
                                arguments: tool_invocation.args,
                            });
                        }
                        MessagePart::Reasoning { .. }
                        | MessagePart::StepStart
                        | MessagePart::Unknown => {}
                    }
                }
                flush_assistant(&mut history, &mut text, &mut calls, &mut results);
            }
        }
    }

    history
}

fn flush_assistant(
    history: &mut Vec<ModelMessage>,
    text: &mut String,
    calls: &mut Vec<ToolCallRequest>,
    results: &mut Vec<ModelMessage>,
) {
    if text.is_empty() && calls.is_empty() {
        return;
    }
    history.push(ModelMessage::Assistant {
        text: std::mem::take(text),
        tool_calls: std::mem::take(calls),
    });
    history.append(results);
}

/// Text a model sees for a tool result. MCP results contribute their text items;
/// anything else is passed through as JSON.
pub fn tool_result_text(result: &Value) -> String {
    if let Some(items) = result.get("content").and_then(Value::as_array) {
        let texts: Vec<&str> = items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

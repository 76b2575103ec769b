use crate::diagnostics::SharedDiagnostics;
use crate::message::{Message, MessagePart, ToolInvocation};
use crate::session::ChatEvent;

use super::conversation::ChatStatus;

/// Folds a session's event stream into the assistant message a client shows,
/// tracking the chat status along the way.
pub struct AssistantMessageBuilder {
    message: Message,
    status: ChatStatus,
    diagnostics: SharedDiagnostics,
}

impl AssistantMessageBuilder {
    /// Start a builder for a freshly submitted request.
    pub fn new(diagnostics: SharedDiagnostics) -> Self {
        Self {
            message: Message::assistant(String::new()),
            status: ChatStatus::Submitted,
            diagnostics,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    /// Apply one event. Returns the invocation it touched, if any.
    pub fn apply(&mut self, event: ChatEvent) -> Option<&ToolInvocation> {
        if self.status == ChatStatus::Submitted {
            self.status = ChatStatus::Streaming;
        }

        match event {
            ChatEvent::StepStart { message_id } => {
                if self.message.id.is_empty() {
                    self.message.id = message_id;
                }
                self.message.parts.push(MessagePart::StepStart);
                None
            }
            ChatEvent::TextDelta(delta) => {
                self.message.content.push_str(&delta);
                match self.message.parts.last_mut() {
                    Some(MessagePart::Text { text }) => text.push_str(&delta),
                    _ => self.message.parts.push(MessagePart::Text { text: delta }),
                }
                None
            }
            ChatEvent::ReasoningDelta(delta) => {
                match self.message.parts.last_mut() {
                    Some(MessagePart::Reasoning { reasoning }) => reasoning.push_str(&delta),
                    _ => self
                        .message
                        .parts
                        .push(MessagePart::Reasoning { reasoning: delta }),
                }
                None
            }
            ChatEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => {
                let id = tool_call_id.clone();
                self.message.parts.push(MessagePart::ToolInvocation {
                    tool_invocation: ToolInvocation::call(tool_call_id, tool_name, args),
                });
                self.message.tool_invocation_mut(&id).map(|i| &*i)
            }
            ChatEvent::ToolResult {
                tool_call_id,
                result,
            } => match self.message.tool_invocation_mut(&tool_call_id) {
                Some(invocation) => {
                    *invocation = invocation.clone().with_result(result);
                    Some(&*invocation)
                }
                None => {
                    self.diagnostics.warn(
                        "stream",
                        &format!("result for unknown tool call '{}'", tool_call_id),
                    );
                    None
                }
            },
            ChatEvent::Error(message) => {
                self.diagnostics.warn("stream", &message);
                self.status = ChatStatus::Error;
                None
            }
            ChatEvent::StepFinish { .. } => None,
            ChatEvent::Finish { .. } => {
                if self.status != ChatStatus::Error {
                    self.status = ChatStatus::Ready;
                }
                None
            }
        }
    }
}

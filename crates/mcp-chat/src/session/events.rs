use serde_json::Value;

use crate::providers::{FinishReason, Usage};

/// What a session streams to its client, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A generation step begins; every step of a session carries the same message id
    StepStart { message_id: String },
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult { tool_call_id: String, result: Value },
    /// Advisory text only; details go to diagnostics
    Error(String),
    StepFinish {
        reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },
    Finish { reason: FinishReason, usage: Usage },
}

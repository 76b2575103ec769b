//! Line-oriented data stream protocol spoken to chat clients.
//!
//! Every event is one line: a single-character type code, a colon, a JSON
//! value and a newline.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::providers::{FinishReason, Usage};
use crate::session::ChatEvent;

/// Header announcing the protocol on streaming responses.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Missing type prefix in line: {0}")]
    MissingPrefix(String),

    #[error("Unknown part type '{0}'")]
    UnknownType(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStepPayload {
    message_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallPayload {
    tool_call_id: String,
    tool_name: String,
    args: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultPayload {
    tool_call_id: String,
    result: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishStepPayload {
    finish_reason: FinishReason,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    is_continued: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishMessagePayload {
    finish_reason: FinishReason,
    #[serde(default)]
    usage: Usage,
}

fn line<T: Serialize>(code: char, payload: &T) -> String {
    // Serializing these payloads cannot fail: they hold strings and JSON values only
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    format!("{}:{}\n", code, json)
}

/// Encode an event as one protocol line, newline included.
pub fn encode(event: &ChatEvent) -> String {
    match event {
        ChatEvent::StepStart { message_id } => line(
            'f',
            &StartStepPayload {
                message_id: message_id.clone(),
            },
        ),
        ChatEvent::TextDelta(text) => line('0', text),
        ChatEvent::ReasoningDelta(text) => line('g', text),
        ChatEvent::ToolCall {
            tool_call_id,
            tool_name,
            args,
        } => line(
            '9',
            &ToolCallPayload {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
            },
        ),
        ChatEvent::ToolResult {
            tool_call_id,
            result,
        } => line(
            'a',
            &ToolResultPayload {
                tool_call_id: tool_call_id.clone(),
                result: result.clone(),
            },
        ),
        ChatEvent::Error(message) => line('3', message),
        ChatEvent::StepFinish {
            reason,
            usage,
            is_continued,
        } => line(
            'e',
            &FinishStepPayload {
                finish_reason: *reason,
                usage: *usage,
                is_continued: *is_continued,
            },
        ),
        ChatEvent::Finish { reason, usage } => line(
            'd',
            &FinishMessagePayload {
                finish_reason: *reason,
                usage: *usage,
            },
        ),
    }
}

/// Decode one protocol line (with or without its trailing newline).
pub fn decode(line: &str) -> Result<ChatEvent, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (code, payload) = line
        .split_once(':')
        .ok_or_else(|| DecodeError::MissingPrefix(line.to_string()))?;

    let event = match code {
        "f" => {
            let p: StartStepPayload = serde_json::from_str(payload)?;
            ChatEvent::StepStart {
                message_id: p.message_id,
            }
        }
        "0" => ChatEvent::TextDelta(serde_json::from_str(payload)?),
        "g" => ChatEvent::ReasoningDelta(serde_json::from_str(payload)?),
        "9" => {
            let p: ToolCallPayload = serde_json::from_str(payload)?;
            ChatEvent::ToolCall {
                tool_call_id: p.tool_call_id,
                tool_name: p.tool_name,
                args: p.args,
            }
        }
        "a" => {
            let p: ToolResultPayload = serde_json::from_str(payload)?;
            ChatEvent::ToolResult {
                tool_call_id: p.tool_call_id,
                result: p.result,
            }
        }
        "3" => ChatEvent::Error(serde_json::from_str(payload)?),
        "e" => {
            let p: FinishStepPayload = serde_json::from_str(payload)?;
            ChatEvent::StepFinish {
                reason: p.finish_reason,
                usage: p.usage,
                is_continued: p.is_continued,
            }
        }
        "d" => {
            let p: FinishMessagePayload = serde_json::from_str(payload)?;
            ChatEvent::Finish {
                reason: p.finish_reason,
                usage: p.usage,
            }
        }
        other => return Err(DecodeError::UnknownType(other.to_string())),
    };
    Ok(event)
}

/// Decode a whole response body, skipping blank lines.
pub fn decode_all(body: &str) -> Result<Vec<ChatEvent>, DecodeError> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_wire_format() {
        assert_eq!(
            encode(&ChatEvent::TextDelta("Hello \"world\"\n".into())),
            "0:\"Hello \\\"world\\\"\\n\"\n"
        );
        assert_eq!(
            encode(&ChatEvent::Error("An error occurred.".into())),
            "3:\"An error occurred.\"\n"
        );
        assert_eq!(
            encode(&ChatEvent::StepStart {
                message_id: "msg-1".into()
            }),
            "f:{\"messageId\":\"msg-1\"}\n"
        );
        assert_eq!(
            encode(&ChatEvent::Finish {
                reason: FinishReason::Stop,
                usage: Usage::new(Some(3), Some(4)),
            }),
            "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":3,\"completionTokens\":4}}\n"
        );
    }

    #[test]
    fn test_tool_parts_use_camel_case() {
        let encoded = encode(&ChatEvent::ToolCall {
            tool_call_id: "c1".into(),
            tool_name: "weather".into(),
            args: json!({"city": "Rome"}),
        });
        let payload: Value = serde_json::from_str(encoded.trim_end().strip_prefix("9:").unwrap()).unwrap();
        assert_eq!(
            payload,
            json!({"toolCallId": "c1", "toolName": "weather", "args": {"city": "Rome"}})
        );
    }

    #[test]
    fn test_decode_reads_what_encode_writes() {
        let events = vec![
            ChatEvent::StepStart {
                message_id: "m".into(),
            },
            ChatEvent::ReasoningDelta("hmm".into()),
            ChatEvent::ToolResult {
                tool_call_id: "c1".into(),
                result: json!({"content": [], "isError": true}),
            },
            ChatEvent::StepFinish {
                reason: FinishReason::ToolCalls,
                usage: Usage::default(),
                is_continued: false,
            },
        ];
        let body: String = events.iter().map(encode).collect();
        assert_eq!(decode_all(&body).unwrap(), events);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(matches!(decode("z:1"), Err(DecodeError::UnknownType(_))));
        assert!(matches!(decode("no prefix"), Err(DecodeError::MissingPrefix(_))));
    }
}

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mcp_core::Tool;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::base::{FinishReason, GenerationChunk, GenerationStream, Provider, Usage};
use super::errors::{OpenAIError, ProviderError};
use crate::message::{ModelMessage, ToolCallRequest};
use crate::model::ModelSpec;

const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiCompatibleConfig {
    pub host: String,
    pub base_path: String,
    pub api_key: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    host: String,
    base_path: String,
    api_key: String,
    model: ModelSpec,
}

#[derive(Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(
        config: OpenAiCompatibleConfig,
        model: ModelSpec,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()?;

        Ok(Self {
            client,
            host: config.host,
            base_path: config.base_path,
            api_key: config.api_key,
            model,
        })
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let base_url = url::Url::parse(&self.host)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid base URL: {e}")))?;
        let url = base_url.join(&self.base_path).map_err(|e| {
            ProviderError::RequestFailed(format!("Failed to construct endpoint URL: {e}"))
        })?;

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        handle_response(response).await
    }

    fn create_request(&self, system: &str, messages: &[ModelMessage], tools: &[Tool]) -> Value {
        let mut formatted = vec![json!({"role": "system", "content": system})];
        formatted.extend(format_messages(messages));

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model.upstream_model));
        payload.insert("messages".to_string(), Value::Array(formatted));
        if !tools.is_empty() {
            payload.insert("tools".to_string(), Value::Array(format_tools(tools)));
        }
        payload.extend(self.model.provider_options());

        Value::Object(payload)
    }
}

/// Error codes: https://platform.openai.com/docs/guides/error-codes
async fn handle_response(response: Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if status == StatusCode::OK {
        return serde_json::from_str(&body)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid response body: {e}")));
    }
    let payload = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ProviderError::Authentication(format!(
                "Authentication failed. Status: {}. Response: {}",
                status, payload
            )))
        }
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
            tracing::debug!(%status, %payload, "provider request failed");
            if let Ok(err_resp) = serde_json::from_value::<OpenAIErrorResponse>(payload) {
                let err = err_resp.error;
                if err.is_context_length_exceeded() {
                    return Err(ProviderError::ContextLengthExceeded(
                        err.message.unwrap_or_else(|| "Unknown error".to_string()),
                    ));
                }
                return Err(ProviderError::RequestFailed(format!(
                    "{} (status {})",
                    err,
                    status.as_u16()
                )));
            }
            Err(ProviderError::RequestFailed(format!(
                "Unknown error (status {})",
                status
            )))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimitExceeded(payload.to_string())),
        s if s.is_server_error() => Err(ProviderError::ServerError(payload.to_string())),
        _ => {
            tracing::debug!(%status, %payload, "provider request failed");
            Err(ProviderError::RequestFailed(format!(
                "Request failed with status: {}",
                status
            )))
        }
    }
}

fn format_messages(messages: &[ModelMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            ModelMessage::System(text) => json!({"role": "system", "content": text}),
            ModelMessage::User(text) => json!({"role": "user", "content": text}),
            ModelMessage::Assistant { text, tool_calls } => {
                let mut converted = json!({
                    "role": "assistant",
                    "content": if text.is_empty() { Value::Null } else { json!(text) },
                });
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                converted
            }
            ModelMessage::Tool {
                tool_call_id,
                content,
            } => json!({"role": "tool", "tool_call_id": tool_call_id, "content": content}),
        })
        .collect()
}

fn format_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Split a chat completion response into generation chunks in emission order:
/// reasoning, then text, then tool calls, then the finish marker.
fn response_to_chunks(response: &Value) -> Result<Vec<GenerationChunk>, ProviderError> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::ResponseParseError("No choices in response".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ProviderError::ResponseParseError("No message in choice".into()))?;

    let mut chunks = Vec::new();

    let reasoning = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(Value::as_str);
    if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
        chunks.push(GenerationChunk::ReasoningDelta(reasoning.to_string()));
    }

    if let Some(text) = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        chunks.push(GenerationChunk::TextDelta(text.to_string()));
    }

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let raw_arguments = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let arguments = match serde_json::from_str::<Value>(raw_arguments) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(tool = %name, error = %e, "model produced invalid tool arguments");
                    json!({})
                }
            };
            chunks.push(GenerationChunk::ToolCall(ToolCallRequest {
                id,
                name,
                arguments,
            }));
        }
    }

    chunks.push(GenerationChunk::Finish {
        reason: FinishReason::from_openai(choice.get("finish_reason").and_then(Value::as_str)),
        usage: get_usage(response),
    });

    Ok(chunks)
}

fn get_usage(response: &Value) -> Usage {
    let usage = response.get("usage");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    Usage::new(count("prompt_tokens"), count("completion_tokens"))
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn model(&self) -> &ModelSpec {
        &self.model
    }

    #[tracing::instrument(skip(self, system, messages, tools), fields(model = %self.model.id))]
    async fn generate(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[Tool],
    ) -> Result<GenerationStream, ProviderError> {
        let payload = self.create_request(system, messages, tools);
        let response = self.post(payload).await?;
        let chunks = response_to_chunks(&response)?;
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderFamily;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, model: ModelSpec) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::from_config(
            OpenAiCompatibleConfig {
                host: server.uri(),
                base_path: "v1/chat/completions".to_string(),
                api_key: "test-key".to_string(),
                timeout_secs: Some(5),
            },
            model,
        )
        .unwrap()
    }

    async fn collect(stream: GenerationStream) -> Vec<GenerationChunk> {
        stream.map(|c| c.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_generate_text_and_tool_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-4.1-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "finish_reason": "tool_calls",
                    "message": {
                        "role": "assistant",
                        "content": "Let me check.",
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let spec = ModelSpec::new("gpt-4.1-mini", ProviderFamily::OpenAi, "gpt-4.1-mini");
        let tools = vec![Tool::new("weather", "Get the weather", json!({"type": "object"}))];
        let stream = provider(&server, spec)
            .generate("be brief", &[ModelMessage::User("weather?".into())], &tools)
            .await
            .unwrap();

        assert_eq!(
            collect(stream).await,
            vec![
                GenerationChunk::TextDelta("Let me check.".into()),
                GenerationChunk::ToolCall(ToolCallRequest {
                    id: "call_1".into(),
                    name: "weather".into(),
                    arguments: json!({"city": "Paris"}),
                }),
                GenerationChunk::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: Usage::new(Some(12), Some(7)),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_reasoning_model_sends_thinking_and_emits_reasoning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "thinking": {"type": "enabled", "budget_tokens": 12000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "finish_reason": "stop",
                    "message": {"content": "42", "reasoning_content": "thinking hard"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let spec = ModelSpec::new("claude", ProviderFamily::Anthropic, "claude-3-7").with_reasoning(12_000);
        let stream = provider(&server, spec)
            .generate("", &[ModelMessage::User("q".into())], &[])
            .await
            .unwrap();
        let chunks = collect(stream).await;
        assert_eq!(chunks[0], GenerationChunk::ReasoningDelta("thinking hard".into()));
        assert_eq!(chunks[1], GenerationChunk::TextDelta("42".into()));
    }

    #[tokio::test]
    async fn test_rate_limit_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"error": {"message": "too many requests"}})),
            )
            .mount(&server)
            .await;

        let spec = ModelSpec::new("gpt-4.1-mini", ProviderFamily::OpenAi, "gpt-4.1-mini");
        let err = provider(&server, spec)
            .generate("", &[ModelMessage::User("q".into())], &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::RateLimitExceeded(_)));
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn test_rate_limit_with_plain_text_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let spec = ModelSpec::new("gpt-4.1-mini", ProviderFamily::OpenAi, "gpt-4.1-mini");
        let err = provider(&server, spec)
            .generate("", &[ModelMessage::User("q".into())], &[])
            .await
            .err()
            .unwrap();
        assert!(err.is_rate_limit());
        assert_eq!(
            crate::session::advisory_message(&err),
            crate::session::RATE_LIMIT_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_server_error_with_html_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let spec = ModelSpec::new("gpt-4.1-mini", ProviderFamily::OpenAi, "gpt-4.1-mini");
        let err = provider(&server, spec)
            .generate("", &[ModelMessage::User("q".into())], &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::ServerError(ref body) if body.contains("bad gateway")));
    }

    #[tokio::test]
    async fn test_context_length_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "too long", "code": "context_length_exceeded"}
            })))
            .mount(&server)
            .await;

        let spec = ModelSpec::new("gpt-4.1-mini", ProviderFamily::OpenAi, "gpt-4.1-mini");
        let err = provider(&server, spec)
            .generate("", &[ModelMessage::User("q".into())], &[])
            .await
            .err()
            .unwrap();
        assert_eq!(err, ProviderError::ContextLengthExceeded("too long".into()));
    }

    #[test]
    fn test_format_assistant_tool_calls() {
        let formatted = format_messages(&[
            ModelMessage::Assistant {
                text: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "weather".into(),
                    arguments: json!({"city": "Oslo"}),
                }],
            },
            ModelMessage::Tool {
                tool_call_id: "c1".into(),
                content: "rain".into(),
            },
        ]);
        assert_eq!(formatted[0]["content"], Value::Null);
        assert_eq!(
            formatted[0]["tool_calls"][0]["function"]["arguments"],
            json!("{\"city\":\"Oslo\"}")
        );
        assert_eq!(formatted[1]["role"], "tool");
    }
}

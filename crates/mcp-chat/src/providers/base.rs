use std::ops::AddAssign;

use async_trait::async_trait;
use futures::stream::BoxStream;
use mcp_core::Tool;
use serde::{Deserialize, Serialize};

use super::errors::ProviderError;
use crate::message::{ModelMessage, ToolCallRequest};
use crate::model::ModelSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

impl Usage {
    pub fn new(prompt_tokens: Option<u32>, completion_tokens: Option<u32>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }
}

fn add_tokens(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens = add_tokens(self.prompt_tokens, other.prompt_tokens);
        self.completion_tokens = add_tokens(self.completion_tokens, other.completion_tokens);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
    #[serde(other)]
    Unknown,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string.
    pub fn from_openai(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") | None => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(_) => FinishReason::Other,
        }
    }
}

/// One increment of model output within a generation step.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationChunk {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall(ToolCallRequest),
    Finish { reason: FinishReason, usage: Usage },
}

pub type GenerationStream = BoxStream<'static, Result<GenerationChunk, ProviderError>>;

/// Base trait for model providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// The model this provider instance talks to
    fn model(&self) -> &ModelSpec;

    /// Run one generation step over the conversation history.
    ///
    /// # Arguments
    /// * `system` - The system prompt that guides the model's behavior
    /// * `messages` - The conversation history
    /// * `tools` - Tools the model may call during this step
    ///
    /// # Errors
    /// Failing before any output is produced is reported here; failures mid-step
    /// arrive as an `Err` item on the returned stream.
    async fn generate(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[Tool],
    ) -> Result<GenerationStream, ProviderError>;
}

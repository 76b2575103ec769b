use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mcp_core::Tool;
use serde_json::Value;

use super::base::{FinishReason, GenerationChunk, GenerationStream, Provider, Usage};
use super::errors::ProviderError;
use crate::message::{ModelMessage, ToolCallRequest};
use crate::model::{ModelSpec, ProviderFamily};

/// What one `generate` call on a [`ScriptedProvider`] produces.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Replay these items, then end the step
    Chunks(Vec<Result<GenerationChunk, ProviderError>>),
    /// Fail before producing any output
    Fail(ProviderError),
    /// Replay these chunks, then never finish
    Stall(Vec<GenerationChunk>),
}

impl ScriptedStep {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedStep::Chunks(vec![
            Ok(GenerationChunk::TextDelta(text.into())),
            Ok(finish(FinishReason::Stop)),
        ])
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ScriptedStep::Chunks(vec![
            Ok(GenerationChunk::ToolCall(ToolCallRequest {
                id: id.into(),
                name: name.into(),
                arguments,
            })),
            Ok(finish(FinishReason::ToolCalls)),
        ])
    }
}

fn finish(reason: FinishReason) -> GenerationChunk {
    GenerationChunk::Finish {
        reason,
        usage: Usage::new(Some(1), Some(1)),
    }
}

/// A provider that replays canned steps, for driving sessions deterministically.
///
/// Steps are consumed in order. Once exhausted, the `repeat` step (if any) is
/// returned for every further call, otherwise an empty step that just stops.
pub struct ScriptedProvider {
    model: ModelSpec,
    steps: Mutex<VecDeque<ScriptedStep>>,
    repeat: Option<ScriptedStep>,
    requests: Mutex<Vec<Vec<ModelMessage>>>,
    tools: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            model: ModelSpec::new("scripted", ProviderFamily::OpenAi, "scripted"),
            steps: Mutex::new(steps.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            tools: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every call with the same step.
    pub fn repeating(step: ScriptedStep) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.repeat = Some(step);
        provider
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.model = model;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// History passed to each call so far.
    pub fn requests(&self) -> Vec<Vec<ModelMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Tool names offered on each call so far.
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.tools.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn next_step(&self) -> ScriptedStep {
        let next = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        next.or_else(|| self.repeat.clone())
            .unwrap_or_else(|| ScriptedStep::Chunks(vec![Ok(finish(FinishReason::Stop))]))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn model(&self) -> &ModelSpec {
        &self.model
    }

    async fn generate(
        &self,
        _system: &str,
        messages: &[ModelMessage],
        tools: &[Tool],
    ) -> Result<GenerationStream, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        if let Ok(mut offered) = self.tools.lock() {
            offered.push(tools.iter().map(|t| t.name.clone()).collect());
        }

        match self.next_step() {
            ScriptedStep::Chunks(chunks) => Ok(stream::iter(chunks).boxed()),
            ScriptedStep::Fail(error) => Err(error),
            ScriptedStep::Stall(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }
}

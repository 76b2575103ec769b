use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use mcp_core::protocol::CallToolResult;
use mcp_core::Tool;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::cleanup::{CleanupGate, CleanupTrigger};
use super::events::ChatEvent;
use super::prompt::{render_system_prompt, today};
use super::{
    advisory_message, generate_session_id, SessionHandle, SessionState, StartError,
    DEFAULT_MAX_STEPS,
};
use crate::diagnostics::{SharedDiagnostics, TracingDiagnostics};
use crate::message::{to_model_messages, Message, ModelMessage, ToolCallRequest};
use crate::model::ModelCatalog;
use crate::providers::{
    FinishReason, GenerationChunk, Provider, ProviderError, ProviderFactory, Usage,
};
use crate::smoothing::{smooth_stream, Chunking, SmoothingConfig};
use crate::tools::{CallableTool, ToolProviderConfig, ToolResolver};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A chat request as submitted by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub selected_model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mcp_servers: Vec<ToolProviderConfig>,
}

/// An explicit `null` reads the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_steps: u32,
    pub smoothing: SmoothingConfig,
    /// Replaces the built-in system prompt; may reference `{{ date }}`
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            smoothing: SmoothingConfig {
                chunking: Chunking::Line,
                delay: std::time::Duration::from_millis(5),
            },
            system_prompt: None,
        }
    }
}

/// A started session: its id, the event stream to forward, and a handle for
/// observing or aborting it.
pub struct ChatSession {
    pub id: String,
    pub events: ReceiverStream<ChatEvent>,
    pub handle: SessionHandle,
}

/// Validates chat requests and runs each accepted one as a session.
pub struct Orchestrator {
    catalog: ModelCatalog,
    providers: Arc<dyn ProviderFactory>,
    resolver: Arc<dyn ToolResolver>,
    diagnostics: SharedDiagnostics,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        catalog: ModelCatalog,
        providers: Arc<dyn ProviderFactory>,
        resolver: Arc<dyn ToolResolver>,
    ) -> Self {
        Self {
            catalog,
            providers,
            resolver,
            diagnostics: TracingDiagnostics::shared("session"),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn system_prompt(&self) -> String {
        let date = today();
        match render_system_prompt(self.config.system_prompt.as_deref(), &date) {
            Ok(prompt) => prompt,
            Err(e) => {
                self.diagnostics.warn(
                    "session",
                    &format!("configured system prompt failed to render: {}", e),
                );
                render_system_prompt(None, &date).unwrap_or_default()
            }
        }
    }

    /// Validate `request`, resolve its tools and start generating.
    ///
    /// Validation failures have no side effects. Once tools are resolved the
    /// session owns their cleanup: it runs exactly once, when generation ends or
    /// when `cancel` fires, whichever comes first.
    #[tracing::instrument(skip_all, fields(model = %request.selected_model))]
    pub async fn start(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatSession, StartError> {
        if request.user_id.trim().is_empty() {
            return Err(StartError::MissingUser);
        }
        if request.messages.is_empty() {
            return Err(StartError::EmptyConversation);
        }
        let model = self
            .catalog
            .get(&request.selected_model)
            .cloned()
            .ok_or_else(|| StartError::InvalidModel(request.selected_model.clone()))?;

        let provider = self.providers.create(&model).map_err(|e| {
            self.diagnostics.error("provider", &e);
            StartError::from(e)
        })?;

        let id = request
            .chat_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_session_id);

        let (state, _) = watch::channel(SessionState::Starting);
        state.send_replace(SessionState::ResolvingTools);

        let resolved = self
            .resolver
            .resolve(&request.mcp_servers, cancel.clone())
            .await
            .map_err(|e| {
                self.diagnostics.error("tool-resolution", &e);
                StartError::from(e)
            })?;

        tracing::info!(
            session = %id,
            model = %model.id,
            tools = resolved.tools.len(),
            "starting chat session"
        );

        let tool_definitions = resolved.definitions();
        let handle = SessionHandle::new(
            id.clone(),
            CleanupGate::new(resolved.cleanup),
            state,
            cancel,
            Arc::clone(&self.diagnostics),
        );

        let watcher = handle.clone();
        tokio::spawn(async move {
            let token = watcher.cancellation_token();
            tokio::select! {
                _ = token.cancelled() => {
                    watcher.complete(CleanupTrigger::Cancel).await;
                }
                _ = watcher.wait_cleaned_up() => {}
            }
        });

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let run = GenerationRun {
            provider,
            system: self.system_prompt(),
            history: to_model_messages(&request.messages),
            tools: resolved.tools,
            tool_definitions,
            message_id: format!("msg-{}", nanoid::nanoid!()),
            max_steps: self.config.max_steps.max(1),
            smoothing: self.config.smoothing,
            diagnostics: Arc::clone(&self.diagnostics),
            handle: handle.clone(),
            tx,
        };

        let driver = handle.clone();
        tokio::spawn(async move {
            let mut run = run;
            let outcome = run.drive().await;
            tracing::debug!(session = %driver.id(), ?outcome, "generation ended");
            let trigger = if outcome == Outcome::Cancelled || driver.cancellation_token().is_cancelled()
            {
                CleanupTrigger::Cancel
            } else {
                CleanupTrigger::Finish
            };
            // Claim before closing the stream: a client hanging up after the
            // finish marker is not an abort
            let claimed = driver.claim(trigger);
            drop(run);
            if let Some(cleanup) = claimed {
                driver.release(cleanup).await;
            }
        });

        Ok(ChatSession {
            id,
            events: ReceiverStream::new(rx),
            handle,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed { steps: u32 },
    StepLimitReached,
    Failed,
    Cancelled,
}

enum StepResult {
    Done {
        text: String,
        calls: Vec<ToolCallRequest>,
        reason: FinishReason,
        usage: Usage,
    },
    Failed(ProviderError),
    Cancelled,
}

struct GenerationRun {
    provider: Arc<dyn Provider>,
    system: String,
    history: Vec<ModelMessage>,
    tools: HashMap<String, Arc<dyn CallableTool>>,
    tool_definitions: Vec<Tool>,
    message_id: String,
    max_steps: u32,
    smoothing: SmoothingConfig,
    diagnostics: SharedDiagnostics,
    handle: SessionHandle,
    tx: mpsc::Sender<ChatEvent>,
}

impl GenerationRun {
    /// Forward an event to the client. A closed channel means nobody is
    /// listening any more, which is treated as cancellation.
    async fn emit(&self, event: ChatEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            self.handle.cancel();
            return false;
        }
        true
    }

    async fn drive(&mut self) -> Outcome {
        let cancel = self.handle.cancellation_token();
        let mut total = Usage::default();
        let mut step = 0;

        loop {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            if step == self.max_steps {
                self.diagnostics.info(
                    "generation",
                    &format!("session {} reached the step limit of {}", self.handle.id(), self.max_steps),
                );
                let finish = ChatEvent::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: total,
                };
                return if self.emit(finish).await {
                    Outcome::StepLimitReached
                } else {
                    Outcome::Cancelled
                };
            }

            step += 1;
            self.handle.advance(SessionState::Generating { step });
            let start = ChatEvent::StepStart {
                message_id: self.message_id.clone(),
            };
            if !self.emit(start).await {
                return Outcome::Cancelled;
            }

            let (text, calls, reason, usage) = match self.run_step(&cancel).await {
                StepResult::Done {
                    text,
                    calls,
                    reason,
                    usage,
                } => (text, calls, reason, usage),
                StepResult::Cancelled => return Outcome::Cancelled,
                StepResult::Failed(error) => {
                    self.diagnostics.error("generation", &error);
                    let delivered = self
                        .emit(ChatEvent::Error(advisory_message(&error).to_string()))
                        .await
                        && self
                            .emit(ChatEvent::Finish {
                                reason: FinishReason::Error,
                                usage: total,
                            })
                            .await;
                    return if delivered {
                        Outcome::Failed
                    } else {
                        Outcome::Cancelled
                    };
                }
            };
            total += usage;

            if calls.is_empty() {
                let delivered = self
                    .emit(ChatEvent::StepFinish {
                        reason,
                        usage,
                        is_continued: false,
                    })
                    .await
                    && self.emit(ChatEvent::Finish { reason, usage: total }).await;
                return if delivered {
                    Outcome::Completed { steps: step }
                } else {
                    Outcome::Cancelled
                };
            }

            self.history.push(ModelMessage::Assistant {
                text,
                tool_calls: calls.clone(),
            });
            for call in calls {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    result = self.execute(&call) => result,
                };
                self.history.push(ModelMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content: result
                        .content
                        .iter()
                        .map(|c| c.summary())
                        .collect::<Vec<_>>()
                        .join("\n"),
                });
                let result = serde_json::to_value(&result).unwrap_or_else(|e| {
                    json!({"content": [{"type": "text", "text": format!("Error: {}", e)}], "isError": true})
                });
                let delivered = self
                    .emit(ChatEvent::ToolResult {
                        tool_call_id: call.id,
                        result,
                    })
                    .await;
                if !delivered {
                    return Outcome::Cancelled;
                }
            }

            let finish = ChatEvent::StepFinish {
                reason: FinishReason::ToolCalls,
                usage,
                is_continued: false,
            };
            if !self.emit(finish).await {
                return Outcome::Cancelled;
            }
        }
    }

    async fn run_step(&self, cancel: &CancellationToken) -> StepResult {
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StepResult::Cancelled,
            generated = self.provider.generate(&self.system, &self.history, &self.tool_definitions) => generated,
        };
        let stream = match generated {
            Ok(stream) => stream,
            Err(error) => return StepResult::Failed(error),
        };
        let mut stream = Box::pin(smooth_stream(stream, self.smoothing));

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut reason = FinishReason::Stop;
        let mut usage = Usage::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepResult::Cancelled,
                next = stream.next() => next,
            };
            let event = match next {
                None => break,
                Some(Err(error)) => return StepResult::Failed(error),
                Some(Ok(GenerationChunk::Finish {
                    reason: r,
                    usage: u,
                })) => {
                    reason = r;
                    usage = u;
                    continue;
                }
                Some(Ok(GenerationChunk::TextDelta(delta))) => {
                    text.push_str(&delta);
                    ChatEvent::TextDelta(delta)
                }
                Some(Ok(GenerationChunk::ReasoningDelta(delta))) => ChatEvent::ReasoningDelta(delta),
                Some(Ok(GenerationChunk::ToolCall(call))) => {
                    let event = ChatEvent::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args: call.arguments.clone(),
                    };
                    calls.push(call);
                    event
                }
            };
            if !self.emit(event).await {
                return StepResult::Cancelled;
            }
        }

        StepResult::Done {
            text,
            calls,
            reason,
            usage,
        }
    }

    /// Run one tool call. Failures become error results the model can read.
    async fn execute(&self, call: &ToolCallRequest) -> CallToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            self.diagnostics
                .warn("tool", &format!("model called unknown tool '{}'", call.name));
            return CallToolResult::error(format!("Error: Tool not found: {}", call.name));
        };

        match tool.call(call.arguments.clone()).await {
            Ok(result) => result,
            Err(e) => {
                self.diagnostics
                    .warn("tool", &format!("tool '{}' failed: {}", call.name, e));
                CallToolResult::error(format!("Error: {}", e))
            }
        }
    }
}

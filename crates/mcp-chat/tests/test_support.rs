#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mcp_chat::diagnostics::MemoryDiagnostics;
use mcp_chat::message::Message;
use mcp_chat::model::ModelCatalog;
use mcp_chat::providers::testprovider::{ScriptedProvider, ScriptedStep};
use mcp_chat::providers::StaticProviderFactory;
use mcp_chat::session::{ChatEvent, ChatRequest, ChatSession, Orchestrator, OrchestratorConfig};
use mcp_chat::smoothing::{Chunking, SmoothingConfig};
use mcp_chat::tools::{
    CallableTool, Cleanup, FnTool, ResolveError, ResolvedTools, ToolProviderConfig, ToolResolver,
};
use mcp_core::protocol::CallToolResult;
use mcp_core::{Content, ResourceContents, Tool};
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const MODEL: &str = "gpt-4.1-mini";

/// Hands out a fixed tool set and counts how often its cleanup runs.
pub struct StaticToolResolver {
    tools: Vec<Arc<dyn CallableTool>>,
    fail: bool,
    resolutions: AtomicUsize,
    cleanups: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl StaticToolResolver {
    pub fn new(tools: Vec<Arc<dyn CallableTool>>) -> Self {
        Self {
            tools,
            fail: false,
            resolutions: AtomicUsize::new(0),
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolResolver for StaticToolResolver {
    async fn resolve(
        &self,
        _configs: &[ToolProviderConfig],
        _cancel: CancellationToken,
    ) -> Result<ResolvedTools, ResolveError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ResolveError::InvalidConfig {
                name: "broken".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let tools: HashMap<String, Arc<dyn CallableTool>> = self
            .tools
            .iter()
            .map(|t| (t.definition().name.clone(), Arc::clone(t)))
            .collect();
        let cleanups = Arc::clone(&self.cleanups);
        Ok(ResolvedTools {
            tools,
            cleanup: Cleanup::new(move || async move {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        })
    }
}

/// A tool whose result embeds one HTML resource.
#[allow(dead_code)]
pub fn widget_tool() -> Arc<dyn CallableTool> {
    Arc::new(FnTool::new(
        Tool::new("show_widget", "Render a widget", json!({"type": "object"})),
        |_args| async {
            Ok(CallToolResult::success(vec![
                Content::resource(ResourceContents::text(
                    "ui://widget/1",
                    Some("text/html"),
                    "<p>widget</p>",
                )),
                Content::text("rendered widget"),
            ]))
        },
    ))
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub provider: Arc<ScriptedProvider>,
    pub resolver: Arc<StaticToolResolver>,
    pub diagnostics: Arc<MemoryDiagnostics>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(steps: Vec<ScriptedStep>, resolver: StaticToolResolver) -> Self {
        Self::with_provider(ScriptedProvider::new(steps), resolver, 20)
    }

    pub fn with_provider(provider: ScriptedProvider, resolver: StaticToolResolver, max_steps: u32) -> Self {
        let provider = Arc::new(provider);
        let resolver = Arc::new(resolver);
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let orchestrator = Orchestrator::new(
            ModelCatalog::builtin(),
            Arc::new(StaticProviderFactory::new(provider.clone())),
            resolver.clone(),
        )
        .with_diagnostics(diagnostics.clone())
        .with_config(OrchestratorConfig {
            max_steps,
            smoothing: SmoothingConfig {
                chunking: Chunking::Line,
                delay: Duration::ZERO,
            },
            system_prompt: None,
        });

        Self {
            orchestrator,
            provider,
            resolver,
            diagnostics,
        }
    }
}

pub fn request(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![Message::user("u1", text)],
        chat_id: None,
        selected_model: MODEL.to_string(),
        user_id: "user-1".to_string(),
        mcp_servers: Vec::new(),
    }
}

/// Drain a session's events, failing the test if it does not end promptly.
#[allow(dead_code)]
pub async fn collect(session: ChatSession) -> (Vec<ChatEvent>, ChatSession) {
    let ChatSession {
        id,
        mut events,
        handle,
    } = session;
    let mut collected = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            collected.push(event);
        }
    })
    .await
    .expect("session did not finish");
    (collected, ChatSession { id, events, handle })
}

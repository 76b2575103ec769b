//! Tool providers: where a session's callable tools come from, and how their
//! connections are released.
mod mcp;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use mcp_core::protocol::CallToolResult;
use mcp_core::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use mcp::McpToolResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTransport {
    #[default]
    Sse,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A remote tool provider as described by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProviderConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub transport: ToolTransport,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
}

impl ToolProviderConfig {
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            name: None,
            transport: ToolTransport::Sse,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: ToolTransport::Http,
            ..Self::sse(url)
        }
    }

    /// Name used in logs and errors: the configured name, else the url.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    pub fn header_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter(|h| !h.key.is_empty())
            .map(|h| (h.key.clone(), h.value.clone()))
            .collect()
    }
}

/// A tool the model may call during a session.
#[async_trait]
pub trait CallableTool: Send + Sync {
    fn definition(&self) -> &Tool;

    async fn call(&self, arguments: Value) -> ToolResult<CallToolResult>;
}

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Releases whatever a resolution acquired. Consumed by running it.
pub struct Cleanup(Option<CleanupFn>);

impl Cleanup {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Some(Box::new(move || Box::pin(f()))))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        match self.0 {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cleanup")
            .field(&if self.0.is_some() { "pending" } else { "noop" })
            .finish()
    }
}

pub struct ResolvedTools {
    pub tools: HashMap<String, Arc<dyn CallableTool>>,
    pub cleanup: Cleanup,
}

impl ResolvedTools {
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
            cleanup: Cleanup::noop(),
        }
    }

    /// Definitions offered to the model, ordered by name.
    pub fn definitions(&self) -> Vec<Tool> {
        let mut definitions: Vec<Tool> =
            self.tools.values().map(|t| t.definition().clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to connect to tool provider '{name}': {source}")]
    Connect {
        name: String,
        #[source]
        source: mcp_client::Error,
    },

    #[error("Invalid tool provider '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Tool resolution cancelled")]
    Cancelled,
}

/// Turns the client's tool provider list into callable tools.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(
        &self,
        configs: &[ToolProviderConfig],
        cancel: CancellationToken,
    ) -> Result<ResolvedTools, ResolveError>;
}

/// A tool backed by a plain async function, for local tools and tests.
pub struct FnTool<F> {
    definition: Tool,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ToolResult<CallToolResult>> + Send,
{
    pub fn new(definition: Tool, handler: F) -> Self {
        Self {
            definition,
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> CallableTool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ToolResult<CallToolResult>> + Send,
{
    fn definition(&self) -> &Tool {
        &self.definition
    }

    async fn call(&self, arguments: Value) -> ToolResult<CallToolResult> {
        (self.handler)(arguments).await
    }
}

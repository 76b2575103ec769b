use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use mcp_client::{
    ClientCapabilities, ClientInfo, McpClient, McpClientTrait, SseTransport,
    StreamableHttpTransport, Transport,
};
use mcp_core::protocol::CallToolResult;
use mcp_core::{Tool, ToolError, ToolResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    CallableTool, Cleanup, ResolveError, ResolvedTools, ToolProviderConfig, ToolResolver,
    ToolTransport,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOOL_PAGES: usize = 100;

/// Open transport of one connected provider, kept for closing.
enum OpenTransport {
    Sse(SseTransport),
    Http(StreamableHttpTransport),
}

impl OpenTransport {
    async fn close(&self) -> Result<(), mcp_client::transport::Error> {
        match self {
            OpenTransport::Sse(t) => t.close().await,
            OpenTransport::Http(t) => t.close().await,
        }
    }
}

struct Connection {
    name: String,
    transport: OpenTransport,
    client: Arc<dyn McpClientTrait>,
    tools: Vec<Tool>,
}

struct McpTool {
    definition: Tool,
    client: Arc<dyn McpClientTrait>,
}

#[async_trait]
impl CallableTool for McpTool {
    fn definition(&self) -> &Tool {
        &self.definition
    }

    async fn call(&self, arguments: Value) -> ToolResult<CallToolResult> {
        self.client
            .call_tool(&self.definition.name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

/// Resolves tool providers by connecting to them as MCP servers.
///
/// Resolution is all-or-nothing: if any provider fails, every connection opened
/// so far is closed and the whole resolution fails.
pub struct McpToolResolver {
    client_info: (String, String),
    request_timeout: Duration,
}

impl Default for McpToolResolver {
    fn default() -> Self {
        Self {
            client_info: (
                env!("CARGO_PKG_NAME").to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            ),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl McpToolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_info.0.clone(),
            version: self.client_info.1.clone(),
        }
    }

    async fn establish<T>(
        &self,
        transport: &T,
    ) -> Result<(Box<dyn McpClientTrait>, Vec<Tool>), mcp_client::Error>
    where
        T: Transport + Sync,
    {
        let handle = transport.start().await?;
        let mut client = McpClient::connect(handle, self.request_timeout).await?;
        client
            .initialize(self.client_info(), ClientCapabilities::default())
            .await?;

        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = None;
        for _ in 0..MAX_TOOL_PAGES {
            let page = client.list_tools(cursor).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    tracing::warn!(cursor = %next, "tool listing repeated a cursor, stopping");
                    break;
                }
                None => break,
            }
        }
        let client: Box<dyn McpClientTrait> = Box::new(client);
        Ok((client, tools))
    }

    async fn connect(
        &self,
        config: &ToolProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<Connection, ResolveError> {
        let name = config.display_name().to_string();
        let url = url::Url::parse(&config.url).map_err(|e| ResolveError::InvalidConfig {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        let headers = config.header_map();

        let transport = match config.transport {
            ToolTransport::Sse => OpenTransport::Sse(SseTransport::new(url.as_str(), headers)),
            ToolTransport::Http => {
                OpenTransport::Http(StreamableHttpTransport::new(url.as_str(), headers))
            }
        };

        let established = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = async {
                match &transport {
                    OpenTransport::Sse(t) => self.establish(t).await,
                    OpenTransport::Http(t) => self.establish(t).await,
                }
            } => result.map_err(|source| ResolveError::Connect { name: name.clone(), source }),
        };

        match established {
            Ok((client, tools)) => {
                tracing::info!(provider = %name, tools = tools.len(), "connected to tool provider");
                Ok(Connection {
                    name,
                    transport,
                    client: Arc::from(client),
                    tools,
                })
            }
            Err(e) => {
                close_quietly(&name, &transport).await;
                Err(e)
            }
        }
    }

    async fn connect_all(
        &self,
        configs: &[ToolProviderConfig],
        cancel: &CancellationToken,
    ) -> Result<Vec<Connection>, ResolveError> {
        let results = join_all(configs.iter().map(|config| self.connect(config, cancel))).await;

        let mut connections = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(connection) => connections.push(connection),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::warn!(error = %e, "additional tool provider failure"),
            }
        }

        if let Some(error) = first_error {
            close_all(connections).await;
            return Err(error);
        }
        Ok(connections)
    }
}

async fn close_quietly(name: &str, transport: &OpenTransport) {
    if let Err(e) = transport.close().await {
        tracing::warn!(provider = %name, error = %e, "failed to close tool provider");
    }
}

async fn close_all(connections: Vec<Connection>) {
    join_all(
        connections
            .iter()
            .map(|c| close_quietly(&c.name, &c.transport)),
    )
    .await;
}

#[async_trait]
impl ToolResolver for McpToolResolver {
    async fn resolve(
        &self,
        configs: &[ToolProviderConfig],
        cancel: CancellationToken,
    ) -> Result<ResolvedTools, ResolveError> {
        if configs.is_empty() {
            return Ok(ResolvedTools::empty());
        }

        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let connections = self.connect_all(configs, &cancel).await?;

        let mut tools: HashMap<String, Arc<dyn CallableTool>> = HashMap::new();
        for connection in &connections {
            for tool in &connection.tools {
                if tools.contains_key(&tool.name) {
                    tracing::warn!(
                        provider = %connection.name,
                        tool = %tool.name,
                        "duplicate tool name, keeping the first provider's tool"
                    );
                    continue;
                }
                tools.insert(
                    tool.name.clone(),
                    Arc::new(McpTool {
                        definition: tool.clone(),
                        client: Arc::clone(&connection.client),
                    }),
                );
            }
        }

        let cleanup = Cleanup::new(move || async move {
            close_all(connections).await;
            Ok(())
        });

        Ok(ResolvedTools { tools, cleanup })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_core::protocol::PROTOCOL_VERSION;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_provider(server: &MockServer, tools: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "widgets", "version": "1.0.0"}
                }
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": tools}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_http_provider() {
        let server = MockServer::start().await;
        mount_provider(
            &server,
            json!([{"name": "show_widget", "description": "Render a widget", "inputSchema": {"type": "object"}}]),
        )
        .await;

        let resolver = McpToolResolver::new().with_request_timeout(Duration::from_secs(5));
        let resolved = resolver
            .resolve(
                &[ToolProviderConfig::http(server.uri())],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(resolved.tools.len(), 1);
        assert_eq!(
            resolved.tools["show_widget"].definition().description,
            "Render a widget"
        );
        resolved.cleanup.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops_tool_listing() {
        let server = MockServer::start().await;
        // Same page forever, always pointing at the same cursor.
        let tools_page = |request: &wiremock::Request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": {
                    "tools": [{"name": "loop_tool", "description": "looping"}],
                    "nextCursor": "again"
                }
            }))
        };
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "loop", "version": "1.0.0"}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(tools_page)
            .expect(2)
            .mount(&server)
            .await;

        let resolved = tokio::time::timeout(
            Duration::from_secs(5),
            McpToolResolver::new()
                .with_request_timeout(Duration::from_secs(5))
                .resolve(&[ToolProviderConfig::http(server.uri())], CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(resolved.tools.contains_key("loop_tool"));
        resolved.cleanup.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_tool_names_keep_first_provider() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        mount_provider(&first, json!([{"name": "search", "description": "first"}])).await;
        mount_provider(&second, json!([{"name": "search", "description": "second"}])).await;

        let resolved = McpToolResolver::new()
            .resolve(
                &[
                    ToolProviderConfig::http(first.uri()),
                    ToolProviderConfig::http(second.uri()),
                ],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(resolved.tools.len(), 1);
        assert_eq!(resolved.tools["search"].definition().description, "first");
        resolved.cleanup.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_failing_provider_fails_resolution() {
        let good = MockServer::start().await;
        mount_provider(&good, json!([{"name": "search"}])).await;
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&bad)
            .await;

        let result = McpToolResolver::new()
            .with_request_timeout(Duration::from_secs(5))
            .resolve(
                &[
                    ToolProviderConfig::http(good.uri()),
                    ToolProviderConfig::http(bad.uri()),
                ],
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ResolveError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = McpToolResolver::new()
            .resolve(
                &[ToolProviderConfig::sse("not a url")],
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ResolveError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = McpToolResolver::new()
            .resolve(&[ToolProviderConfig::sse("http://127.0.0.1:9/sse")], cancel)
            .await;
        assert!(matches!(result, Err(ResolveError::Cancelled)));
    }
}

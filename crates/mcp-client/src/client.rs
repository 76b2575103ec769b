use mcp_core::protocol::{
    CallToolResult, Implementation, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities, METHOD_NOT_FOUND,
    PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::transport::TransportHandle;

/// Error type for MCP client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] super::transport::Error),

    #[error("RPC error: code={code}, message={message}")]
    RpcError { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response from server: {0}")]
    UnexpectedResponse(String),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Request timed out")]
    Timeout,

    #[error("Call to '{server}' failed for '{method}'. {message}")]
    McpServerError {
        method: String,
        server: String,
        message: String,
    },
}

#[derive(Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    // Add fields as needed. For now, empty capabilities are fine.
}

#[derive(Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[async_trait::async_trait]
pub trait McpClientTrait: Send + Sync {
    async fn initialize(
        &mut self,
        info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error>;

    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error>;
}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<JsonRpcResponse, Error>>>>>;

/// The MCP client is the interface for MCP operations.
pub struct McpClient<T>
where
    T: TransportHandle + Send + Sync + 'static,
{
    transport: T,
    pending: PendingRequests,
    timeout: Duration,
    next_id_counter: AtomicU64,
    server_capabilities: Option<ServerCapabilities>,
    server_info: Option<Implementation>,
}

impl<T> McpClient<T>
where
    T: TransportHandle + Send + Sync + 'static,
{
    pub async fn connect(transport: T, timeout: Duration) -> Result<Self, Error> {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let pending_ptr = Arc::clone(&pending);
        let receiver = transport.clone();

        tokio::spawn(async move {
            loop {
                match receiver.receive().await {
                    Ok(message) => {
                        tracing::debug!("Received message: {:?}", message);
                        match message {
                            JsonRpcMessage::Response(response) => {
                                let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
                                    continue;
                                };
                                if let Some(tx) = pending_ptr.lock().await.remove(&id) {
                                    let _ = tx.send(Ok(response));
                                }
                            }
                            // Server notifications and requests are not surfaced to chat sessions
                            other => tracing::trace!("Ignoring server message: {:?}", other),
                        }
                    }
                    Err(e) => {
                        tracing::debug!("MCP transport closed: {}", e);
                        for (_, tx) in pending_ptr.lock().await.drain() {
                            let _ = tx.send(Err(Error::Transport(
                                crate::transport::Error::ChannelClosed,
                            )));
                        }
                        break;
                    }
                }
            }
        });

        Ok(Self {
            transport,
            pending,
            timeout,
            next_id_counter: AtomicU64::new(1),
            server_capabilities: None,
            server_info: None,
        })
    }

    fn server_name(&self) -> String {
        self.server_info
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    /// Send a JSON-RPC request and check we don't get an error response.
    async fn send_request<R>(&self, method: &str, params: Value) -> Result<R, Error>
    where
        R: for<'de> Deserialize<'de>,
    {
        let id = self.next_id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, Some(params)));
        if let Err(e) = self.transport.send(request).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::McpServerError {
                server: self.server_name(),
                method: method.to_string(),
                message: e.to_string(),
            });
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => {
                return Err(Error::UnexpectedResponse(
                    "response channel dropped".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Timeout);
            }
        };

        if let Some(error) = response.error {
            return Err(Error::RpcError {
                code: error.code,
                message: error.message,
            });
        }

        let result = response.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Send a JSON-RPC notification.
    async fn send_notification(&self, method: &str, params: Value) -> Result<(), Error> {
        let notification = JsonRpcMessage::Notification(JsonRpcNotification::new(
            method,
            Some(params),
        ));

        self.transport
            .send(notification)
            .await
            .map_err(|e| Error::McpServerError {
                server: self.server_name(),
                method: method.to_string(),
                message: e.to_string(),
            })
    }

    // Check if the client has completed initialization
    fn completed_initialization(&self) -> bool {
        self.server_capabilities.is_some()
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }
}

#[async_trait::async_trait]
impl<T> McpClientTrait for McpClient<T>
where
    T: TransportHandle + Send + Sync + 'static,
{
    async fn initialize(
        &mut self,
        info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: info,
            capabilities,
        };
        let result: InitializeResult = self
            .send_request("initialize", serde_json::to_value(params)?)
            .await?;

        self.send_notification("notifications/initialized", serde_json::json!({}))
            .await?;

        self.server_capabilities = Some(result.capabilities.clone());
        self.server_info = Some(result.server_info.clone());

        Ok(result)
    }

    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error> {
        let Some(capabilities) = self.server_capabilities.as_ref() else {
            return Err(Error::NotInitialized);
        };
        // If tools is not supported, return an empty list
        if capabilities.tools.is_none() {
            return Ok(ListToolsResult {
                tools: vec![],
                next_cursor: None,
            });
        }

        let payload = next_cursor
            .map(|cursor| serde_json::json!({"cursor": cursor}))
            .unwrap_or_else(|| serde_json::json!({}));

        self.send_request("tools/list", payload).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        if !self.completed_initialization() {
            return Err(Error::NotInitialized);
        }
        if self
            .server_capabilities
            .as_ref()
            .is_some_and(|c| c.tools.is_none())
        {
            return Err(Error::RpcError {
                code: METHOD_NOT_FOUND,
                message: "Server does not support 'tools' capability".to_string(),
            });
        }

        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.send_request("tools/call", params).await
    }
}

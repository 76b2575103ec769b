use async_trait::async_trait;
use mcp_core::protocol::JsonRpcMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures moving JSON-RPC messages to and from an MCP server.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SSE connection error: {0}")]
    SseConnection(String),

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Streamable HTTP error: {0}")]
    StreamableHttpError(String),

    #[error("Session error: {0}")]
    SessionError(String),
}

/// A connection to one MCP server. `start` opens it and hands out a cloneable
/// handle; `close` tears down background tasks and any server side session.
#[async_trait]
pub trait Transport {
    type Handle: TransportHandle;

    async fn start(&self) -> Result<Self::Handle, Error>;

    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
pub trait TransportHandle: Send + Sync + Clone + 'static {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), Error>;
    async fn receive(&self) -> Result<JsonRpcMessage, Error>;
}

/// Queue `message` for a transport's writer task.
pub async fn serialize_and_send(
    sender: &mpsc::Sender<String>,
    message: JsonRpcMessage,
) -> Result<(), Error> {
    let line = serde_json::to_string(&message)?;
    sender.send(line).await.map_err(|_| Error::ChannelClosed)
}

pub mod sse;
pub use sse::SseTransport;

pub mod streamable_http;
pub use streamable_http::StreamableHttpTransport;

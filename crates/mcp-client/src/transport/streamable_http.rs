use crate::transport::Error;
use async_trait::async_trait;
use mcp_core::protocol::JsonRpcMessage;
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{serialize_and_send, Transport, TransportHandle};

// Default timeout for HTTP requests
const HTTP_TIMEOUT_SECS: u64 = 30;
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// The Streamable HTTP transport actor that handles:
/// - HTTP POST requests to send messages to the server
/// - JSON or event-stream replies carrying one or more messages
/// - Session management with session IDs
pub struct StreamableHttpActor {
    /// Receives messages (requests/notifications) from the handle
    receiver: mpsc::Receiver<String>,
    /// Sends messages (responses) back to the handle
    sender: mpsc::Sender<JsonRpcMessage>,
    /// MCP endpoint URL
    mcp_endpoint: String,
    /// HTTP client for sending requests
    http_client: HttpClient,
    /// Optional session ID for stateful connections
    session_id: Arc<RwLock<Option<String>>>,
    /// Custom headers to include in requests
    headers: HashMap<String, String>,
    shutdown: CancellationToken,
}

impl StreamableHttpActor {
    pub fn new(
        receiver: mpsc::Receiver<String>,
        sender: mpsc::Sender<JsonRpcMessage>,
        mcp_endpoint: String,
        http_client: HttpClient,
        session_id: Arc<RwLock<Option<String>>>,
        headers: HashMap<String, String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            sender,
            mcp_endpoint,
            http_client,
            session_id,
            headers,
            shutdown,
        }
    }

    /// Main entry point for the actor
    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        loop {
            let message_str = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(message_str) => message_str,
                    None => break,
                },
            };
            if let Err(e) = self.send_request(&message_str).await {
                error!("Error handling outgoing message: {}", e);
                break;
            }
        }

        debug!("StreamableHttpActor shut down");
    }

    /// Send an HTTP request to the MCP endpoint and forward every message in the reply
    async fn send_request(&mut self, message_str: &str) -> Result<(), Error> {
        debug!("Sending message to MCP endpoint: {}", message_str);

        let mut request = self
            .http_client
            .post(&self.mcp_endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message_str.to_string());

        if let Some(session_id) = self.session_id.read().await.as_ref() {
            request = request.header(SESSION_HEADER, session_id);
        }

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::StreamableHttpError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            if status.as_u16() == 404 {
                *self.session_id.write().await = None;
                return Err(Error::SessionError(
                    "Session expired or not found".to_string(),
                ));
            }
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::HttpError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        if let Some(session_id_header) = response.headers().get(SESSION_HEADER) {
            if let Ok(session_id) = session_id_header.to_str() {
                debug!("Received session ID: {}", session_id);
                *self.session_id.write().await = Some(session_id.to_string());
            }
        }

        let is_event_stream = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response
            .text()
            .await
            .map_err(|e| Error::StreamableHttpError(format!("Failed to read response: {}", e)))?;

        let payloads = if is_event_stream {
            event_stream_data(&body)
        } else if body.trim().is_empty() {
            // 202 Accepted for notifications carries no body
            Vec::new()
        } else {
            vec![body]
        };

        for payload in payloads {
            match serde_json::from_str::<JsonRpcMessage>(&payload) {
                Ok(message) => {
                    self.sender
                        .send(message)
                        .await
                        .map_err(|_| Error::ChannelClosed)?;
                }
                Err(e) => warn!("Failed to parse MCP reply: {}", e),
            }
        }

        Ok(())
    }
}

/// Collects the `data:` payload of every event in an event-stream body.
/// Multi-line data fields are joined with newlines.
fn event_stream_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }

    events
}

#[derive(Clone)]
pub struct StreamableHttpTransportHandle {
    sender: mpsc::Sender<String>,
    receiver: Arc<Mutex<mpsc::Receiver<JsonRpcMessage>>>,
}

#[async_trait]
impl TransportHandle for StreamableHttpTransportHandle {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), Error> {
        serialize_and_send(&self.sender, message).await
    }

    async fn receive(&self) -> Result<JsonRpcMessage, Error> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.ok_or(Error::ChannelClosed)
    }
}

#[derive(Clone)]
pub struct StreamableHttpTransport {
    mcp_endpoint: String,
    headers: HashMap<String, String>,
    http_client: HttpClient,
    session_id: Arc<RwLock<Option<String>>>,
    shutdown: CancellationToken,
}

impl StreamableHttpTransport {
    pub fn new<S: Into<String>>(mcp_endpoint: S, headers: HashMap<String, String>) -> Self {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            mcp_endpoint: mcp_endpoint.into(),
            headers,
            http_client,
            session_id: Arc::new(RwLock::new(None)),
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    type Handle = StreamableHttpTransportHandle;

    async fn start(&self) -> Result<Self::Handle, Error> {
        let (tx, rx) = mpsc::channel(32);
        let (otx, orx) = mpsc::channel(32);

        let actor = StreamableHttpActor::new(
            rx,
            otx,
            self.mcp_endpoint.clone(),
            self.http_client.clone(),
            Arc::clone(&self.session_id),
            self.headers.clone(),
            self.shutdown.clone(),
        );
        tokio::spawn(actor.run());

        Ok(StreamableHttpTransportHandle {
            sender: tx,
            receiver: Arc::new(Mutex::new(orx)),
        })
    }

    async fn close(&self) -> Result<(), Error> {
        self.shutdown.cancel();

        // Servers that issued a session expect it to be terminated explicitly
        let Some(session_id) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let mut request = self
            .http_client
            .delete(&self.mcp_endpoint)
            .header(SESSION_HEADER, session_id);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        match request.send().await {
            Ok(resp) if !resp.status().is_success() && resp.status().as_u16() != 405 => {
                warn!("Session termination returned {}", resp.status());
            }
            Err(e) => warn!("Session termination failed: {}", e),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_stream_data_splits_events() {
        let body = "event: message\ndata: {\"a\":1}\n\ndata: {\"b\":\ndata: 2}\n\n";
        assert_eq!(
            event_stream_data(body),
            vec!["{\"a\":1}".to_string(), "{\"b\":\n2}".to_string()]
        );
    }

    #[test]
    fn test_event_stream_data_without_trailing_blank_line() {
        assert_eq!(event_stream_data("data: x"), vec!["x".to_string()]);
        assert!(event_stream_data(": keep-alive\n\n").is_empty());
    }
}

use crate::transport::Error;
use async_trait::async_trait;
use eventsource_client::{Client, SSE};
use futures::TryStreamExt;
use mcp_core::protocol::JsonRpcMessage;
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use super::{serialize_and_send, Transport, TransportHandle};

// Timeout for the endpoint discovery
const ENDPOINT_TIMEOUT_SECS: u64 = 5;

/// The SSE-based actor that continuously:
/// - Reads incoming events from the SSE stream.
/// - Sends outgoing messages via HTTP POST (once the post endpoint is known).
pub struct SseActor {
    /// Receives messages (requests/notifications) from the handle
    receiver: mpsc::Receiver<String>,
    /// Sends messages (responses) back to the handle
    sender: mpsc::Sender<JsonRpcMessage>,
    /// Base SSE URL
    sse_url: String,
    /// Extra headers sent on the event stream and on every POST
    headers: HashMap<String, String>,
    /// For sending HTTP POST requests
    http_client: HttpClient,
    /// The discovered endpoint for POST requests (once "endpoint" SSE event arrives)
    post_endpoint: Arc<RwLock<Option<String>>>,
    shutdown: CancellationToken,
}

impl SseActor {
    pub fn new(
        receiver: mpsc::Receiver<String>,
        sender: mpsc::Sender<JsonRpcMessage>,
        sse_url: String,
        headers: HashMap<String, String>,
        post_endpoint: Arc<RwLock<Option<String>>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            sender,
            sse_url,
            headers,
            http_client: HttpClient::new(),
            post_endpoint,
            shutdown,
        }
    }

    /// Runs the incoming (SSE events) and outgoing (HTTP POST) loops until the
    /// stream ends or the transport is closed.
    pub async fn run(self) {
        let SseActor {
            receiver,
            sender,
            sse_url,
            headers,
            http_client,
            post_endpoint,
            shutdown,
        } = self;

        let loops = async move {
            tokio::join!(
                Self::handle_incoming_messages(
                    sender,
                    sse_url,
                    headers.clone(),
                    Arc::clone(&post_endpoint)
                ),
                Self::handle_outgoing_messages(receiver, http_client, headers, post_endpoint)
            )
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("SseActor closed by transport");
            }
            _ = loops => {}
        }
    }

    /// Continuously reads SSE events from `sse_url`.
    /// - If an `endpoint` event is received, store it in `post_endpoint`.
    /// - If a `message` event is received, parse it as `JsonRpcMessage` and
    ///   hand it to the client.
    async fn handle_incoming_messages(
        sender: mpsc::Sender<JsonRpcMessage>,
        sse_url: String,
        headers: HashMap<String, String>,
        post_endpoint: Arc<RwLock<Option<String>>>,
    ) {
        let builder = headers.iter().fold(
            eventsource_client::ClientBuilder::for_url(&sse_url),
            |builder, (key, value)| builder.and_then(|b| b.header(key, value)),
        );
        let client = match builder {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!("Failed to connect SSE client: {}", e);
                return;
            }
        };
        let mut stream = client.stream();

        // First, wait for the "endpoint" event
        while let Ok(Some(event)) = stream.try_next().await {
            match event {
                SSE::Event(e) if e.event_type == "endpoint" => {
                    let post_url = match Url::parse(&sse_url).and_then(|base| base.join(&e.data)) {
                        Ok(url) => url,
                        Err(err) => {
                            warn!("Invalid SSE endpoint '{}': {}", e.data, err);
                            return;
                        }
                    };

                    tracing::debug!("Discovered SSE POST endpoint: {}", post_url);
                    *post_endpoint.write().await = Some(post_url.to_string());
                    break;
                }
                _ => continue,
            }
        }

        loop {
            match stream.try_next().await {
                Ok(Some(SSE::Event(e))) if e.event_type == "message" => {
                    match serde_json::from_str::<JsonRpcMessage>(&e.data) {
                        Ok(message) => {
                            if sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!("Failed to parse SSE message: {err}");
                        }
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("SSE stream ended.");
                    break;
                }
                Err(e) => {
                    warn!("Error reading SSE stream: {e}");
                    break;
                }
            }
        }
    }

    async fn handle_outgoing_messages(
        mut receiver: mpsc::Receiver<String>,
        http_client: HttpClient,
        headers: HashMap<String, String>,
        post_endpoint: Arc<RwLock<Option<String>>>,
    ) {
        while let Some(message_str) = receiver.recv().await {
            let Some(post_url) = post_endpoint.read().await.clone() else {
                warn!("Dropping outgoing message, SSE endpoint not discovered yet");
                continue;
            };

            let mut request = http_client
                .post(&post_url)
                .header("Content-Type", "application/json")
                .body(message_str);
            for (key, value) in &headers {
                request = request.header(key, value);
            }

            match request.send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        // The error response itself arrives over the event stream
                        let err = Error::HttpError {
                            status: resp.status().as_u16(),
                            message: resp.status().to_string(),
                        };
                        warn!("HTTP request returned error: {err}");
                    }
                }
                Err(e) => {
                    warn!("HTTP POST failed: {e}");
                }
            }
        }

        tracing::info!("SseActor shut down.");
    }
}

#[derive(Clone)]
pub struct SseTransportHandle {
    sender: mpsc::Sender<String>,
    receiver: Arc<Mutex<mpsc::Receiver<JsonRpcMessage>>>,
}

#[async_trait::async_trait]
impl TransportHandle for SseTransportHandle {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), Error> {
        serialize_and_send(&self.sender, message).await
    }

    async fn receive(&self) -> Result<JsonRpcMessage, Error> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.ok_or(Error::ChannelClosed)
    }
}

/// Legacy MCP transport: a long-lived event stream plus POSTs to the endpoint
/// announced on that stream.
#[derive(Clone)]
pub struct SseTransport {
    sse_url: String,
    headers: HashMap<String, String>,
    shutdown: CancellationToken,
}

impl SseTransport {
    pub fn new<S: Into<String>>(sse_url: S, headers: HashMap<String, String>) -> Self {
        Self {
            sse_url: sse_url.into(),
            headers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Waits for the endpoint to be set, checking every 100ms.
    async fn wait_for_endpoint(post_endpoint: Arc<RwLock<Option<String>>>) -> String {
        let check_interval = Duration::from_millis(100);
        loop {
            if let Some(url) = post_endpoint.read().await.clone() {
                return url;
            }
            tokio::time::sleep(check_interval).await;
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    type Handle = SseTransportHandle;

    async fn start(&self) -> Result<Self::Handle, Error> {
        let (tx, rx) = mpsc::channel(32);
        let (otx, orx) = mpsc::channel(32);

        let post_endpoint: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));
        let post_endpoint_clone = Arc::clone(&post_endpoint);

        let actor = SseActor::new(
            rx,
            otx,
            self.sse_url.clone(),
            self.headers.clone(),
            post_endpoint,
            self.shutdown.clone(),
        );
        tokio::spawn(actor.run());

        // Only hand out the handle once the server told us where to POST
        match timeout(
            Duration::from_secs(ENDPOINT_TIMEOUT_SECS),
            Self::wait_for_endpoint(post_endpoint_clone),
        )
        .await
        {
            Ok(_) => Ok(SseTransportHandle {
                sender: tx,
                receiver: Arc::new(Mutex::new(orx)),
            }),
            Err(_) => {
                self.shutdown.cancel();
                Err(Error::SseConnection(format!(
                    "No endpoint discovered at {} within {}s",
                    self.sse_url, ENDPOINT_TIMEOUT_SECS
                )))
            }
        }
    }

    async fn close(&self) -> Result<(), Error> {
        self.shutdown.cancel();
        Ok(())
    }
}

use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use mcp_chat::protocol::{self, DATA_STREAM_HEADER, DATA_STREAM_VERSION};
use mcp_chat::session::{ChatEvent, ChatRequest, ChatSession, StartError, GENERIC_ERROR_MESSAGE};
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Carries the session id, which may have been generated server side.
pub const CHAT_ID_HEADER: &str = "x-chat-id";

/// Body of a chat response, one data stream line per session event.
///
/// Dropping it (the client went away) cancels the session.
pub struct DataStreamResponse {
    chat_id: String,
    events: ReceiverStream<ChatEvent>,
    _disconnect: DropGuard,
}

impl Stream for DataStreamResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events)
            .poll_next(cx)
            .map(|opt| opt.map(|event| Ok(Bytes::from(protocol::encode(&event)))))
    }
}

impl IntoResponse for DataStreamResponse {
    fn into_response(self) -> Response {
        let chat_id = HeaderValue::from_str(&self.chat_id);
        let mut response = Body::from_stream(self).into_response();

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(DATA_STREAM_HEADER, HeaderValue::from_static(DATA_STREAM_VERSION));
        match chat_id {
            Ok(value) => {
                headers.insert(CHAT_ID_HEADER, value);
            }
            Err(_) => tracing::warn!("chat id is not a valid header value, omitting it"),
        }
        response
    }
}

/// A chat request that never got a stream.
pub enum ChatRouteError {
    Start(StartError),
    /// The task starting the session panicked or was aborted.
    Internal,
}

impl From<StartError> for ChatRouteError {
    fn from(error: StartError) -> Self {
        Self::Start(error)
    }
}

impl IntoResponse for ChatRouteError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Start(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.client_message()),
            Self::Start(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.client_message()),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_ERROR_MESSAGE.to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[tracing::instrument(skip_all, fields(model = %request.selected_model))]
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<DataStreamResponse, ChatRouteError> {
    let cancel = CancellationToken::new();
    // Armed before tool resolution so a client leaving mid-connect still
    // closes whatever the resolver opened.
    let disconnect = cancel.clone().drop_guard();

    let orchestrator = Arc::clone(&state.orchestrator);
    let started = tokio::spawn(async move { orchestrator.start(request, cancel).await })
        .await
        .map_err(|e| {
            tracing::error!("chat session start task failed: {}", e);
            ChatRouteError::Internal
        })?;

    let ChatSession { id, events, handle } = started.map_err(|e| {
        if e.is_client_error() {
            tracing::warn!("rejected chat request: {}", e);
        } else {
            tracing::error!("failed to start chat session: {}", e);
        }
        ChatRouteError::from(e)
    })?;

    let max_duration = state.max_duration;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(max_duration) => {
                tracing::warn!(session = %handle.id(), "chat exceeded {:?}, cancelling", max_duration);
                handle.cancel();
            }
            _ = handle.wait_cleaned_up() => {}
        }
    });

    Ok(DataStreamResponse {
        chat_id: id,
        events,
        _disconnect: disconnect,
    })
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .with_state(state)
}

use std::sync::Mutex;

use crate::message::Message;

/// Client-side status of the chat as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatStatus {
    /// A request was sent and no response has started yet
    Submitted,
    Streaming,
    #[default]
    Ready,
    Error,
}

/// Where new user turns are appended. Appending a turn re-submits the
/// conversation to the server.
pub trait ConversationStore: Send + Sync {
    fn append(&self, message: Message);
}

/// A conversation kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryConversation {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore for InMemoryConversation {
    fn append(&self, message: Message) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

impl ConversationStore for tokio::sync::mpsc::UnboundedSender<Message> {
    fn append(&self, message: Message) {
        if self.send(message).is_err() {
            tracing::warn!("conversation receiver dropped, turn not appended");
        }
    }
}

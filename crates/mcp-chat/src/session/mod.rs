//! Chat sessions: one request's journey from validation through tool
//! resolution and bounded generation to exactly-once resource release.
mod cleanup;
mod events;
mod orchestrator;
mod prompt;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::SharedDiagnostics;
use crate::providers::ProviderError;
use crate::tools::{Cleanup, ResolveError};

pub use cleanup::{CleanupGate, CleanupTrigger};
pub use events::ChatEvent;
pub use orchestrator::{ChatRequest, ChatSession, Orchestrator, OrchestratorConfig};
pub use prompt::render_system_prompt;

pub const DEFAULT_MAX_STEPS: u32 = 20;

pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred.";

/// Advisory text shown to clients for a generation failure.
pub fn advisory_message(error: &ProviderError) -> &'static str {
    if error.is_rate_limit() {
        RATE_LIMIT_MESSAGE
    } else {
        GENERIC_ERROR_MESSAGE
    }
}

pub fn generate_session_id() -> String {
    nanoid::nanoid!()
}

/// Rejections raised by `Orchestrator::start` before any stream exists.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("User ID is required")]
    MissingUser,

    #[error("At least one message is required")]
    EmptyConversation,

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    #[error(transparent)]
    ToolResolution(#[from] ResolveError),
}

impl StartError {
    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StartError::MissingUser | StartError::EmptyConversation | StartError::InvalidModel(_)
        )
    }

    /// Message safe to return to the client.
    pub fn client_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    ResolvingTools,
    Generating { step: u32 },
    Finishing,
    Cancelling,
    CleanedUp,
}

impl SessionState {
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Starting, ResolvingTools) => true,
            (ResolvingTools, Generating { step: 1 }) => true,
            (ResolvingTools, Cancelling) => true,
            (Generating { step }, Generating { step: next_step }) => *next_step == step + 1,
            (Generating { .. }, Finishing | Cancelling) => true,
            (Finishing | Cancelling, CleanedUp) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::CleanedUp)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::ResolvingTools => write!(f, "resolving-tools"),
            SessionState::Generating { step } => write!(f, "generating(step {})", step),
            SessionState::Finishing => write!(f, "finishing"),
            SessionState::Cancelling => write!(f, "cancelling"),
            SessionState::CleanedUp => write!(f, "cleaned-up"),
        }
    }
}

struct SessionInner {
    id: String,
    gate: CleanupGate,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    diagnostics: SharedDiagnostics,
}

/// Shared view of a running session: its state, its cancellation signal and its
/// cleanup gate.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: String,
        gate: CleanupGate,
        state: watch::Sender<SessionState>,
        cancel: CancellationToken,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                gate,
                state,
                cancel,
                diagnostics,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Abort the session. Idempotent; cleanup runs at most once overall.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn cleanup_trigger(&self) -> Option<CleanupTrigger> {
        self.inner.gate.claimed_by()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.inner.gate.is_done()
    }

    pub async fn wait_cleaned_up(&self) {
        self.inner.gate.wait_done().await;
    }

    /// Move to `next` if that is a legal transition. Illegal moves are dropped.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let inner = &self.inner;
        let mut from = None;
        let moved = inner.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = from {
            tracing::debug!(session = %inner.id, %from, to = %next, "session state");
        }
        moved
    }

    /// Claim the session's cleanup for `trigger` without running it yet.
    /// Returns `None` when another path already claimed it.
    pub(crate) fn claim(&self, trigger: CleanupTrigger) -> Option<Cleanup> {
        let inner = &self.inner;
        let Some(cleanup) = inner.gate.try_claim(trigger) else {
            tracing::debug!(session = %inner.id, ?trigger, "cleanup already claimed");
            return None;
        };

        self.advance(match trigger {
            CleanupTrigger::Finish => SessionState::Finishing,
            CleanupTrigger::Cancel => SessionState::Cancelling,
        });
        if trigger == CleanupTrigger::Cancel {
            inner
                .diagnostics
                .info("session", &format!("session {} aborted, cleaning up", inner.id));
        }
        Some(cleanup)
    }

    /// Run a claimed cleanup and mark the session cleaned up.
    pub(crate) async fn release(&self, cleanup: Cleanup) {
        let inner = &self.inner;
        if let Err(e) = cleanup.run().await {
            inner.diagnostics.error("cleanup", &e);
        }
        self.advance(SessionState::CleanedUp);
        inner.gate.mark_done();
    }

    /// Release the session's resources if nobody has yet. Returns whether this
    /// call performed the cleanup.
    pub(crate) async fn complete(&self, trigger: CleanupTrigger) -> bool {
        match self.claim(trigger) {
            Some(cleanup) => {
                self.release(cleanup).await;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

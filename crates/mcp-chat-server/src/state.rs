use mcp_chat::session::Orchestrator;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Chat responses running longer than this are cancelled
    pub max_duration: Duration,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, max_duration: Duration) -> Arc<AppState> {
        Arc::new(Self {
            orchestrator: Arc::new(orchestrator),
            max_duration,
        })
    }
}

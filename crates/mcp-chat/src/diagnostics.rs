use std::fmt;
use std::sync::{Arc, Mutex};

/// Sink for operational events raised by sessions and presentation controllers.
///
/// Every failure reported here is also what a client sees, reduced to an
/// advisory message; the sink receives the full detail.
pub trait Diagnostics: Send + Sync {
    fn error(&self, context: &str, detail: &dyn fmt::Debug);
    fn warn(&self, context: &str, message: &str);
    fn info(&self, context: &str, message: &str);
}

pub type SharedDiagnostics = Arc<dyn Diagnostics>;

/// Forwards to `tracing`, tagging every event with a component name.
#[derive(Debug, Clone)]
pub struct TracingDiagnostics {
    component: &'static str,
}

impl TracingDiagnostics {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn shared(component: &'static str) -> SharedDiagnostics {
        Arc::new(Self::new(component))
    }
}

impl Default for TracingDiagnostics {
    fn default() -> Self {
        Self::new("mcp-chat")
    }
}

impl Diagnostics for TracingDiagnostics {
    fn error(&self, context: &str, detail: &dyn fmt::Debug) {
        tracing::error!(component = self.component, context, detail = ?detail);
    }

    fn warn(&self, context: &str, message: &str) {
        tracing::warn!(component = self.component, context, "{}", message);
    }

    fn info(&self, context: &str, message: &str) {
        tracing::info!(component = self.component, context, "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub context: String,
    pub message: String,
}

/// Keeps every event in memory so callers can assert on what was reported.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    records: Mutex<Vec<Record>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: Level, context: &str, message: String) {
        if let Ok(mut records) = self.records.lock() {
            records.push(Record {
                level,
                context: context.to_string(),
                message,
            });
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self, level: Level) -> usize {
        self.records().iter().filter(|r| r.level == level).count()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|r| r.level == level && (r.message.contains(needle) || r.context.contains(needle)))
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn error(&self, context: &str, detail: &dyn fmt::Debug) {
        self.push(Level::Error, context, format!("{:?}", detail));
    }

    fn warn(&self, context: &str, message: &str) {
        self.push(Level::Warn, context, message.to_string());
    }

    fn info(&self, context: &str, message: &str) {
        self.push(Level::Info, context, message.to_string());
    }
}

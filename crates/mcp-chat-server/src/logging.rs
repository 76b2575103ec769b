use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::configuration::LoggingSettings;

const DEFAULT_DIRECTIVES: &str = "mcp_chat=info,mcp_chat_server=info,tower_http=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Sets up the global subscriber: stderr output, plus a daily rotated JSON file
/// under `settings.dir` when configured.
///
/// The returned guard flushes the file writer and must be held until exit.
pub fn setup_logging(name: Option<&str>, settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let console_layer = if settings.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![console_layer.with_filter(env_filter()).boxed()];

    let guard = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                dir,
                format!("{}.log", name.unwrap_or("mcp-chatd")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter())
                .boxed();
            layers.push(file_layer);
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .try_init()
        .context("failed to set global tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_filter_parses() {
        temp_env::with_var_unset("RUST_LOG", || {
            let filter = env_filter();
            assert!(filter.to_string().contains("mcp_chat=info"));
        });
    }
}

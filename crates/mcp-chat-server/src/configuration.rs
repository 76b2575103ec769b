use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use mcp_chat::model::{ModelCatalog, ModelSpec, ProviderFamily};
use mcp_chat::providers::factory::ProviderEndpoint;
use mcp_chat::session::{OrchestratorConfig, DEFAULT_MAX_STEPS};
use mcp_chat::smoothing::{Chunking, SmoothingConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Points at a TOML settings file; defaults to `mcp-chat.toml` in the working directory.
pub const CONFIG_PATH_ENV: &str = "MCP_CHAT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "mcp-chat.toml";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "server.host".to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct SmoothingSettings {
    #[serde(default = "default_chunking")]
    pub chunking: Chunking,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self {
            chunking: default_chunking(),
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub smoothing: SmoothingSettings,
    /// Overrides the built-in system prompt template
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Upper bound on one chat response, after which the session is cancelled
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            smoothing: SmoothingSettings::default(),
            system_prompt: None,
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingSettings {
    /// Directory for daily rotated JSON log files; file logging is off when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Emit JSON on stderr instead of human readable lines
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Endpoint overrides keyed by provider family name
    #[serde(default)]
    pub providers: HashMap<String, ProviderEndpoint>,
    /// Replaces the built-in model catalog when non-empty
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load(&path)
    }

    /// Defaults, then the TOML file at `path` if it exists, then `MCP_CHAT_*`
    /// environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("session.max_steps", default_max_steps())?
            .set_default("session.smoothing.chunking", "line")?
            .set_default("session.smoothing.delay_ms", default_delay_ms())?
            .set_default("session.max_duration_secs", default_max_duration_secs())?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("MCP_CHAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    pub fn provider_endpoints(&self) -> Result<HashMap<ProviderFamily, ProviderEndpoint>, ConfigError> {
        self.providers
            .iter()
            .map(|(name, endpoint)| {
                let family = ProviderFamily::ALL
                    .iter()
                    .find(|family| family.as_str() == name.as_str())
                    .ok_or_else(|| ConfigError::Invalid {
                        key: format!("providers.{}", name),
                        reason: format!(
                            "unknown provider family, expected one of: {}",
                            ProviderFamily::ALL
                                .iter()
                                .map(|f| f.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    })?;
                Ok((*family, endpoint.clone()))
            })
            .collect()
    }

    pub fn model_catalog(&self) -> Result<ModelCatalog, ConfigError> {
        if self.models.is_empty() {
            return Ok(ModelCatalog::builtin());
        }
        if let Some(model) = self.models.iter().find(|m| m.id.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "models".to_string(),
                reason: format!("model for '{}' has an empty id", model.upstream_model),
            });
        }
        Ok(ModelCatalog::new(self.models.clone()))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_steps: self.session.max_steps,
            smoothing: SmoothingConfig {
                chunking: self.session.smoothing.chunking,
                delay: Duration::from_millis(self.session.smoothing.delay_ms),
            },
            system_prompt: self.session.system_prompt.clone(),
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.session.max_duration_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

fn default_chunking() -> Chunking {
    Chunking::Line
}

fn default_delay_ms() -> u64 {
    5
}

fn default_max_duration_secs() -> u64 {
    60
}

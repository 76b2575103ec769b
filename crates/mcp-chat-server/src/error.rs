use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets the config key `field_path`.
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "MCP_CHAT_{}",
        field_path.replace('.', "__").to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("server.port"), "MCP_CHAT_SERVER__PORT");
        assert_eq!(
            to_env_var("providers.openai.api_key"),
            "MCP_CHAT_PROVIDERS__OPENAI__API_KEY"
        );
    }

    #[test]
    fn test_missing_env_var_message() {
        let err = ConfigError::MissingEnvVar {
            env_var: to_env_var("session.max_steps"),
        };
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: MCP_CHAT_SESSION__MAX_STEPS"
        );
    }
}

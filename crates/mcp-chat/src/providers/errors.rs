use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Invalid response: {0}")]
    ResponseParseError(String),
}

impl ProviderError {
    /// Rate limiting is recognised both by variant and by message, since some
    /// gateways report it through an ordinary error body.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimitExceeded(_))
            || self.to_string().contains("Rate limit")
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(error: anyhow::Error) -> Self {
        ProviderError::ExecutionError(error.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        ProviderError::ExecutionError(error.to_string())
    }
}

#[derive(serde::Deserialize, Debug)]
pub struct OpenAIError {
    #[serde(default, deserialize_with = "code_as_string")]
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl OpenAIError {
    pub fn is_context_length_exceeded(&self) -> bool {
        if let Some(code) = &self.code {
            code == "context_length_exceeded" || code == "string_above_max_length"
        } else {
            false
        }
    }
}

impl std::fmt::Display for OpenAIError {
    /// "Invalid API key (code: invalid_api_key, type: client_error)", or just the
    /// message when neither code nor type is present.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        match (&self.code, &self.error_type) {
            (Some(code), Some(typ)) => write!(f, " (code: {}, type: {})", code, typ),
            (Some(code), None) => write!(f, " (code: {})", code),
            (None, Some(typ)) => write!(f, " (type: {})", typ),
            (None, None) => Ok(()),
        }
    }
}

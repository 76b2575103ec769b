use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Upstream vendor a model is served by. Every family is reached through its
/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
    Groq,
    Xai,
}

impl ProviderFamily {
    pub const ALL: [ProviderFamily; 5] = [
        ProviderFamily::OpenAi,
        ProviderFamily::Anthropic,
        ProviderFamily::Google,
        ProviderFamily::Groq,
        ProviderFamily::Xai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Google => "google",
            ProviderFamily::Groq => "groq",
            ProviderFamily::Xai => "xai",
        }
    }

    pub fn default_host(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "https://api.openai.com",
            ProviderFamily::Anthropic => "https://api.anthropic.com",
            ProviderFamily::Google => "https://generativelanguage.googleapis.com",
            ProviderFamily::Groq => "https://api.groq.com",
            ProviderFamily::Xai => "https://api.x.ai",
        }
    }

    pub fn default_base_path(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi | ProviderFamily::Anthropic | ProviderFamily::Xai => {
                "v1/chat/completions"
            }
            ProviderFamily::Google => "v1beta/openai/chat/completions",
            ProviderFamily::Groq => "openai/v1/chat/completions",
        }
    }

    /// Environment variable conventionally holding this vendor's key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "OPENAI_API_KEY",
            ProviderFamily::Anthropic => "ANTHROPIC_API_KEY",
            ProviderFamily::Google => "GOOGLE_GENERATIVE_AI_API_KEY",
            ProviderFamily::Groq => "GROQ_API_KEY",
            ProviderFamily::Xai => "XAI_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extended reasoning ("thinking") enabled for a model, with its token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub budget_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Identifier clients select the model by
    pub id: String,
    pub provider: ProviderFamily,
    /// Model name sent upstream
    pub upstream_model: String,
    #[serde(default)]
    pub reasoning: Option<ReasoningConfig>,
}

impl ModelSpec {
    pub fn new(
        id: impl Into<String>,
        provider: ProviderFamily,
        upstream_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            upstream_model: upstream_model.into(),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, budget_tokens: u32) -> Self {
        self.reasoning = Some(ReasoningConfig { budget_tokens });
        self
    }

    /// Vendor specific request fields enabling reasoning, merged into the payload.
    pub fn provider_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        let Some(reasoning) = self.reasoning else {
            return options;
        };
        match self.provider {
            ProviderFamily::Anthropic => {
                options.insert(
                    "thinking".to_string(),
                    json!({"type": "enabled", "budget_tokens": reasoning.budget_tokens}),
                );
            }
            ProviderFamily::Google => {
                options.insert(
                    "extra_body".to_string(),
                    json!({"google": {"thinking_config": {
                        "thinking_budget": reasoning.budget_tokens,
                        "include_thoughts": true
                    }}}),
                );
            }
            ProviderFamily::OpenAi | ProviderFamily::Groq | ProviderFamily::Xai => {}
        }
        options
    }
}

/// The closed set of models a client may select.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ModelSpec::new("gpt-4.1-mini", ProviderFamily::OpenAi, "gpt-4.1-mini"),
            ModelSpec::new(
                "claude-3-7-sonnet",
                ProviderFamily::Anthropic,
                "claude-3-7-sonnet-20250219",
            )
            .with_reasoning(12_000),
            ModelSpec::new(
                "gemini-2.5-flash",
                ProviderFamily::Google,
                "gemini-2.5-flash-preview-04-17",
            )
            .with_reasoning(2_048),
            ModelSpec::new("qwen-qwq", ProviderFamily::Groq, "qwen-qwq-32b"),
            ModelSpec::new("grok-3-mini", ProviderFamily::Xai, "grok-3-mini-beta"),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

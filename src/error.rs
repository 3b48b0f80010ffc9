use thiserror::Error;

/// Raised at construction or entry time, before any browser is launched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no provider selected: set an OpenAI key, a Gemini key or a VertexAI project")]
    ServiceNotSelected,
    #[error("conflicting credentials: more than one provider configured ({0})")]
    ConflictingCredentials(String),
    #[error("VertexAI project given without a server location")]
    ServerLocationUndefined,
    #[error("VertexAI selected but no access token available")]
    MissingAccessToken,
    #[error("unsupported model {model}; valid models: {valid:?}")]
    UnsupportedModel { model: String, valid: Vec<String> },
    #[error("model {model} is not served by provider {provider}; valid models: {valid:?}")]
    InvalidModelForProvider {
        model: String,
        provider: String,
        valid: Vec<String>,
    },
    #[error("unknown login site {site}; available: {available:?}")]
    UnknownLoginSite { site: String, available: Vec<String> },
    #[error("no prompt given")]
    PromptNotPresent,
    #[error("use_random and low_memory cannot both be enabled")]
    RandomWithLowMemory,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("gave up after {0} attempts")]
    RetriesExhausted(u32),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("memory error: {0}")]
    Memory(String),
    #[error("other error: {0}")]
    Other(String),
}

impl AgentError {
    pub fn browser(e: impl std::fmt::Display) -> Self {
        AgentError::Browser(e.to_string())
    }
}

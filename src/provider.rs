//! Model providers.
//!
//! Every backend turns `(agent, prompt)` into a [`ProviderReply`]; the one
//! place provider-native shapes are interpreted is [`ProviderReply::decode`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Credentials;
use crate::error::{AgentError, ConfigError, ProviderError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    VertexAi,
    Gemini,
}

const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-5",
    "gpt-5-mini",
];
const GEMINI_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"];

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::VertexAi,
        ProviderKind::Gemini,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::VertexAi => "vertexai",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn models(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => OPENAI_MODELS,
            ProviderKind::VertexAi | ProviderKind::Gemini => GEMINI_MODELS,
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0]
    }

    /// Whether this provider keeps conversation state between calls.
    pub fn is_stateful(self) -> bool {
        self == ProviderKind::VertexAi
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSelection {
    pub kind: ProviderKind,
    pub model: String,
}

fn owned(models: &[&str]) -> Vec<String> {
    models.iter().map(|m| m.to_string()).collect()
}

impl Credentials {
    /// Pick exactly one provider and a model it serves.
    pub fn resolve(&self) -> Result<ProviderSelection, ConfigError> {
        let mut configured = Vec::new();
        if self.openai_api_key.is_some() {
            configured.push(ProviderKind::OpenAi);
        }
        if self.vertex_project_id.is_some() {
            configured.push(ProviderKind::VertexAi);
        }
        if self.gemini_api_key.is_some() {
            configured.push(ProviderKind::Gemini);
        }

        if configured.is_empty() {
            return Err(ConfigError::ServiceNotSelected);
        }
        if self.vertex_project_id.is_some() && self.vertex_location.is_none() {
            return Err(ConfigError::ServerLocationUndefined);
        }
        if configured.len() > 1 {
            let names: Vec<&str> = configured.iter().map(|k| k.name()).collect();
            return Err(ConfigError::ConflictingCredentials(names.join(", ")));
        }
        let kind = configured[0];
        if kind == ProviderKind::VertexAi && self.vertex_access_token.is_none() {
            return Err(ConfigError::MissingAccessToken);
        }

        let model = match self.model_name.as_deref() {
            None => kind.default_model().to_string(),
            Some(m) => {
                let known = ProviderKind::ALL.iter().any(|k| k.models().contains(&m));
                if !known {
                    let mut valid = owned(OPENAI_MODELS);
                    valid.extend(owned(GEMINI_MODELS));
                    return Err(ConfigError::UnsupportedModel {
                        model: m.to_string(),
                        valid,
                    });
                }
                if !kind.models().contains(&m) {
                    return Err(ConfigError::InvalidModelForProvider {
                        model: m.to_string(),
                        provider: kind.name().to_string(),
                        valid: owned(kind.models()),
                    });
                }
                m.to_string()
            }
        };
        Ok(ProviderSelection { kind, model })
    }
}

/// Opaque bundle the call layer hands to a backend.
#[derive(Clone, Debug)]
pub struct AgentDescriptor {
    pub name: String,
    pub model: String,
    pub system_instruction: String,
    /// JSON schema of the expected response object.
    pub response_schema: Value,
}

/// A provider response before decoding.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderReply {
    /// Structured JSON from a chat-completion style provider.
    Json(Value),
    /// The provider's own parsed object.
    Parsed(Value),
    /// Raw text that must validate against the declared schema.
    Text(String),
}

impl ProviderReply {
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ProviderError> {
        match self {
            ProviderReply::Json(v) | ProviderReply::Parsed(v) => {
                serde_json::from_value(v).map_err(|e| ProviderError::Decode(e.to_string()))
            }
            ProviderReply::Text(s) => serde_json::from_str(strip_code_fence(&s))
                .map_err(|e| ProviderError::Decode(e.to_string())),
        }
    }
}

fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// One attempt, no retry. `context_id` scopes conversation state.
    async fn send(
        &self,
        agent: &AgentDescriptor,
        prompt: &str,
        context_id: Option<&str>,
    ) -> Result<ProviderReply, ProviderError>;

    /// Drop any conversation state held for `context_id`.
    async fn end_context(&self, _context_id: Option<&str>) {}
}

async fn post_json(req: reqwest::RequestBuilder, body: &Value) -> Result<Value, ProviderError> {
    let resp = req.json(body).send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    // A 200 with an unreadable body is treated like a transport hiccup.
    serde_json::from_str(&text)
        .map_err(|e| ProviderError::Transport(format!("bad response body: {e}")))
}

fn candidate_text(v: &Value) -> Result<String, ProviderError> {
    let parts = v
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Decode("response has no candidate parts".into()))?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}

fn gemini_body(agent: &AgentDescriptor, contents: Value) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": agent.system_instruction }] },
        "contents": contents,
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseJsonSchema": agent.response_schema,
        }
    })
}

/// Chat completions with a JSON-schema response format.
#[derive(Clone)]
pub struct OpenAiBackend {
    http: Client,
    api_base: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(http: Client, api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn send(
        &self,
        agent: &AgentDescriptor,
        prompt: &str,
        _context_id: Option<&str>,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": agent.model,
            "messages": [
                { "role": "system", "content": agent.system_instruction },
                { "role": "user", "content": prompt }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": agent.name,
                    "schema": agent.response_schema,
                    "strict": false
                }
            }
        });
        let v = post_json(self.http.post(url).bearer_auth(&self.api_key), &body).await?;
        let message = v
            .pointer("/choices/0/message")
            .ok_or_else(|| ProviderError::Decode("response has no choices".into()))?;
        if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
            return Err(ProviderError::Decode(format!("model refused: {refusal}")));
        }
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Decode("message has no content".into()))?;
        let parsed =
            serde_json::from_str(content).map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(ProviderReply::Json(parsed))
    }
}

/// Schema-constrained generation; the reply is raw text.
#[derive(Clone)]
pub struct GeminiBackend {
    http: Client,
    api_base: String,
    api_key: String,
}

impl GeminiBackend {
    pub const DEFAULT_BASE: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(http: Client, api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn send(
        &self,
        agent: &AgentDescriptor,
        prompt: &str,
        _context_id: Option<&str>,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, agent.model);
        let contents = json!([{ "role": "user", "parts": [{ "text": prompt }] }]);
        let req = self.http.post(url).header("x-goog-api-key", &self.api_key);
        let v = post_json(req, &gemini_body(agent, contents)).await?;
        Ok(ProviderReply::Text(candidate_text(&v)?))
    }
}

/// Conversational generation: each agent keeps its own turns per context.
pub struct VertexBackend {
    http: Client,
    api_base: String,
    access_token: String,
    chats: Mutex<HashMap<(String, Option<String>), Vec<Value>>>,
}

impl VertexBackend {
    pub fn new(
        http: Client,
        project: &str,
        location: &str,
        access_token: impl Into<String>,
    ) -> Self {
        let api_base = format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}\
             /locations/{location}/publishers/google"
        );
        Self::with_base(http, api_base, access_token)
    }

    pub fn with_base(
        http: Client,
        api_base: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub async fn turns(&self, agent: &str, context_id: Option<&str>) -> usize {
        let chats = self.chats.lock().await;
        chats
            .get(&(agent.to_string(), context_id.map(str::to_owned)))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Backend for VertexBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::VertexAi
    }

    async fn send(
        &self,
        agent: &AgentDescriptor,
        prompt: &str,
        context_id: Option<&str>,
    ) -> Result<ProviderReply, ProviderError> {
        let key = (agent.name.clone(), context_id.map(str::to_owned));
        let user_turn = json!({ "role": "user", "parts": [{ "text": prompt }] });
        let mut contents = {
            let chats = self.chats.lock().await;
            chats.get(&key).cloned().unwrap_or_default()
        };
        contents.push(user_turn.clone());

        let url = format!("{}/models/{}:generateContent", self.api_base, agent.model);
        let req = self.http.post(url).bearer_auth(&self.access_token);
        let v = post_json(req, &gemini_body(agent, Value::Array(contents))).await?;
        let text = candidate_text(&v)?;
        let parsed: Value = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let mut chats = self.chats.lock().await;
        let turns = chats.entry(key).or_default();
        turns.push(user_turn);
        turns.push(json!({ "role": "model", "parts": [{ "text": text }] }));
        debug!(agent = %agent.name, turns = turns.len(), "vertex chat extended");
        Ok(ProviderReply::Parsed(parsed))
    }

    async fn end_context(&self, context_id: Option<&str>) {
        let mut chats = self.chats.lock().await;
        chats.retain(|(_, ctx), _| ctx.as_deref() != context_id);
    }
}

pub fn http_client() -> Result<Client, AgentError> {
    Client::builder()
        .gzip(true)
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| AgentError::Other(e.to_string()))
}

/// Build the backend for a resolved selection, sharing one HTTP client.
pub fn build_backend(
    selection: &ProviderSelection,
    creds: &Credentials,
    http: Client,
) -> Result<Arc<dyn Backend>, ConfigError> {
    let backend: Arc<dyn Backend> = match selection.kind {
        ProviderKind::OpenAi => {
            let key = creds.openai_api_key.clone().ok_or(ConfigError::ServiceNotSelected)?;
            let base = creds
                .openai_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Arc::new(OpenAiBackend::new(http, base, key))
        }
        ProviderKind::Gemini => {
            let key = creds.gemini_api_key.clone().ok_or(ConfigError::ServiceNotSelected)?;
            Arc::new(GeminiBackend::new(http, GeminiBackend::DEFAULT_BASE, key))
        }
        ProviderKind::VertexAi => {
            let project = creds
                .vertex_project_id
                .as_deref()
                .ok_or(ConfigError::ServiceNotSelected)?;
            let location = creds
                .vertex_location
                .as_deref()
                .ok_or(ConfigError::ServerLocationUndefined)?;
            let token = creds.vertex_access_token.clone().ok_or(ConfigError::MissingAccessToken)?;
            Arc::new(VertexBackend::new(http, project, location, token))
        }
    };
    Ok(backend)
}

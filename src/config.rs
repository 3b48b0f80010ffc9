use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const DEFAULT_START_URL: &str = "https://search.brave.com";

/// Reduced-footprint Chromium flags used when `low_memory` is set.
pub const LOW_MEMORY_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-extensions",
    "--disable-sync",
    "--disable-default-apps",
    "--no-default-browser-check",
    "--no-first-run",
    "--mute-audio",
    "--metrics-recording-only",
    "--disable-lcd-text",
    "--disable-component-update",
    "--single-process",
    "--js-flags=--max-old-space-size=256",
    "--disable-site-isolation-trials",
    "--disable-features=IsolateOrigins,site-per-process,Translate,BackForwardCache",
    "--disable-accelerated-2d-canvas",
    "--disable-shared-workers",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Knobs for the DOM extractor.
#[derive(Clone, Debug)]
pub struct ExtractionConfig {
    pub clickable_selectors: Vec<String>,
    /// Exact (lowercased) hrefs that never count as links.
    pub invalid_hrefs: Vec<String>,
    pub valid_button_types: Vec<String>,
    pub junk_keywords: Vec<String>,
    pub links_to_avoid: Vec<String>,
    pub valid_schemes: Vec<String>,
    pub input_valid_tags: Vec<String>,
    pub invalid_input_types: Vec<String>,
    pub clickable_cap: usize,
    /// Emit every clickable instead of the first `clickable_cap`.
    pub full_clickables: bool,
    pub max_entropy: f64,
    pub outer_html_limit: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            clickable_selectors: strings(&["a", "button", "summary", "label"]),
            invalid_hrefs: strings(&[
                "#",
                "/",
                "javascript:void(0)",
                "javascript:void(0);",
                "javascript:;",
            ]),
            valid_button_types: strings(&["submit", "button", "reset", "image"]),
            junk_keywords: strings(&[
                "cookie",
                "privacy policy",
                "terms of service",
                "advertisement",
                "sponsored",
            ]),
            links_to_avoid: strings(&["logout", "signout", "log-out", "sign-out"]),
            valid_schemes: strings(&["http", "https"]),
            input_valid_tags: strings(&["input", "textarea", "select"]),
            invalid_input_types: strings(&[
                "hidden", "submit", "button", "reset", "image", "file", "checkbox", "radio",
            ]),
            clickable_cap: 10,
            full_clickables: false,
            max_entropy: 5.0,
            outer_html_limit: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_depth: usize,
    pub max_breadth: usize,
    pub max_replans: usize,
    pub max_actions_per_step: usize,
    pub start_url: String,
    pub headless: bool,
    pub low_memory: bool,
    pub use_random: bool,
    pub enable_tracing: bool,
    pub trace_dir: PathBuf,
    pub network_idle_timeout: Duration,
    pub extraction: ExtractionConfig,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 20,
            max_breadth: 5,
            max_replans: 3,
            max_actions_per_step: 5,
            start_url: DEFAULT_START_URL.to_string(),
            headless: true,
            low_memory: false,
            use_random: false,
            enable_tracing: true,
            trace_dir: PathBuf::from("."),
            network_idle_timeout: Duration::from_secs(1),
            extraction: ExtractionConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `WEBPILOT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<usize>("WEBPILOT_MAX_DEPTH")? {
            cfg.max_depth = v;
        }
        if let Some(v) = env_flag("WEBPILOT_HEADLESS")? {
            cfg.headless = v;
        }
        if let Some(v) = env_flag("WEBPILOT_LOW_MEMORY")? {
            cfg.low_memory = v;
        }
        if let Some(v) = env_flag("WEBPILOT_USE_RANDOM")? {
            cfg.use_random = v;
        }
        if let Some(v) = env_flag("WEBPILOT_ENABLE_TRACING")? {
            cfg.enable_tracing = v;
        }
        if let Some(v) = env_string("WEBPILOT_TRACE_DIR") {
            cfg.trace_dir = PathBuf::from(v);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_random && self.low_memory {
            return Err(ConfigError::RandomWithLowMemory);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_depth".into(),
                value: "0".into(),
            });
        }
        if self.max_breadth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_breadth".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Extra Chromium flags for this configuration.
    pub fn launch_args(&self) -> Vec<String> {
        if self.low_memory {
            strings(LOW_MEMORY_ARGS)
        } else {
            Vec::new()
        }
    }
}

/// Provider credentials as supplied by the caller. Resolution into a single
/// provider happens in [`crate::provider`].
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub vertex_project_id: Option<String>,
    pub vertex_location: Option<String>,
    pub vertex_access_token: Option<String>,
    pub model_name: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_string("OPENAI_API_KEY"),
            openai_base_url: env_string("OPENAI_BASE_URL"),
            gemini_api_key: env_string("GEMINI_API_KEY"),
            vertex_project_id: env_string("VERTEXAI_PROJECT_ID"),
            vertex_location: env_string("VERTEXAI_LOCATION"),
            vertex_access_token: env_string("VERTEXAI_ACCESS_TOKEN"),
            model_name: env_string("WEBPILOT_MODEL"),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => parse_flag(&raw).map(Some).ok_or(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

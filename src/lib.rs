pub mod action;
pub mod browser;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod jitter;
pub mod llm;
pub mod login;
pub mod memory;
pub mod planner;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod step;
pub mod trace;
pub mod util;

#[cfg(test)]
mod testing;

pub use action::Action;
pub use browser::{ChromiumLauncher, Launcher, LivePage};
pub use config::{Credentials, EngineConfig, ExtractionConfig};
pub use engine::{Engine, RunOutcome};
pub use error::{AgentError, ConfigError, ProviderError};
pub use llm::{Decision, Planner, Reasoner};
pub use memory::{InMemoryStore, JsonlMemoryStore, MemoryStore};
pub use planner::{BranchResult, Explorer};
pub use provider::ProviderKind;
pub use retry::RetryPolicy;
pub use step::StepEngine;

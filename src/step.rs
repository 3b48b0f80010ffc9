//! Externally driven variant of the run-loop: `start`, any number of `step`
//! calls, then `stop`. History and the browser window live across steps.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::browser::ChromiumLauncher;
use crate::config::{Credentials, EngineConfig};
use crate::engine::{check_goal, Engine, Session};
use crate::error::AgentError;
use crate::llm::{CallLayer, LlmReasoner};
use crate::login::resolve_sites;

pub struct StepEngine {
    engine: Engine,
    max_actions: usize,
    get_output: bool,
    session: Mutex<Option<Session>>,
}

impl StepEngine {
    pub fn new(engine: Engine) -> Self {
        let max_actions = engine.config().max_actions_per_step;
        Self {
            engine,
            max_actions,
            get_output: false,
            session: Mutex::new(None),
        }
    }

    pub fn connect(cfg: EngineConfig, creds: &Credentials) -> Result<Self, AgentError> {
        cfg.validate()?;
        let (call, selection) = CallLayer::from_credentials(creds, cfg.retry.clone())?;
        let reasoner = Arc::new(LlmReasoner::stepwise(Arc::new(call), selection.model));
        let launcher = Arc::new(ChromiumLauncher::from_config(&cfg));
        Ok(Self::new(Engine::new(cfg, launcher, reasoner)?))
    }

    /// Ask the model for a summary whenever an instruction completes.
    pub fn with_output(mut self, get_output: bool) -> Self {
        self.get_output = get_output;
        self
    }

    pub fn session_id(&self) -> &str {
        self.engine.session_id()
    }

    pub async fn start<S: AsRef<str>>(&self, login_sites: &[S]) -> Result<(), AgentError> {
        let logins = resolve_sites(login_sites)?;
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(AgentError::Other("step engine already started".into()));
        }
        *slot = Some(self.engine.open_session(None, logins).await?);
        Ok(())
    }

    /// Carry out one instruction in at most `max_actions_per_step` actions.
    pub async fn step(
        &self,
        instruction: &str,
        extraction_schema: Option<Value>,
    ) -> Result<Option<String>, AgentError> {
        let goal = check_goal(instruction)?;
        let mut slot = self.session.lock().await;
        let session = slot
            .as_mut()
            .ok_or_else(|| AgentError::Other("step engine not started".into()))?;
        info!(instruction = %goal, "step");
        let schema = extraction_schema.map(Arc::new);
        Ok(self
            .engine
            .drive(session, goal, schema.as_ref(), self.max_actions, self.get_output)
            .await)
    }

    /// Rendered history so far; empty before `start`.
    pub async fn history(&self) -> Vec<String> {
        let slot = self.session.lock().await;
        slot.as_ref()
            .map(|s| s.history.lines().to_vec())
            .unwrap_or_default()
    }

    /// Close the window and flush tracing. Calling it twice is harmless.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            self.engine.close_session(&session).await;
        }
        Ok(())
    }
}

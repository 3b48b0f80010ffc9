//! The action-decision run-loop.
//!
//! One iteration: login check, decide, execute, observe, and on failure a
//! single re-decision against the fresh page. The loop ends on a final text
//! output, on a missing decision, or when the step budget runs out. Tracing
//! artifacts are flushed and the browser closed on every exit path.

use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use nanoid::nanoid;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::browser::{ChromiumLauncher, Launcher, LivePage};
use crate::config::{Credentials, EngineConfig};
use crate::dom::{DomExtractor, PageSnapshot};
use crate::error::{AgentError, ConfigError};
use crate::executor::{execute, ActionOutcome};
use crate::history::History;
use crate::jitter::{MouseJitter, ScrollJitter};
use crate::llm::{CallLayer, DecideRequest, Decision, LlmReasoner, Reasoner};
use crate::login::{resolve_sites, LoginOutcome, LoginStrategy};
use crate::memory::{now_ms, EpisodicRecord, MemoryStore, NullMemoryStore};
use crate::prompts::PreviousAction;
use crate::trace::{TraceEvent, TraceRecorder};

/// What one run-loop instance produced.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub output: Option<String>,
    pub history: History,
    pub context_id: Option<String>,
}

/// Mutable state owned by one run-loop instance.
pub(crate) struct Session {
    pub(crate) page: Arc<dyn LivePage>,
    pub(crate) history: History,
    pub(crate) snapshot: PageSnapshot,
    pub(crate) logins: Vec<Arc<dyn LoginStrategy>>,
    pub(crate) trace: TraceRecorder,
    pub(crate) context_id: Option<String>,
    previous: Option<PreviousAction>,
}

pub(crate) fn check_goal(prompt: &str) -> Result<&str, ConfigError> {
    let goal = prompt.trim();
    if goal.is_empty() {
        return Err(ConfigError::PromptNotPresent);
    }
    Ok(goal)
}

fn previous_from(outcome: &ActionOutcome) -> PreviousAction {
    PreviousAction {
        action: outcome.action.to_json(),
        succeeded: outcome.succeeded(),
        failure_reason: outcome.failure_reason.clone(),
    }
}

#[derive(Clone)]
pub struct Engine {
    cfg: Arc<EngineConfig>,
    launcher: Arc<dyn Launcher>,
    reasoner: Arc<dyn Reasoner>,
    memory: Arc<dyn MemoryStore>,
    extractor: Arc<DomExtractor>,
    session_id: String,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        launcher: Arc<dyn Launcher>,
        reasoner: Arc<dyn Reasoner>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let extractor = Arc::new(DomExtractor::new(cfg.extraction.clone()));
        Ok(Self {
            cfg: Arc::new(cfg),
            launcher,
            reasoner,
            memory: Arc::new(NullMemoryStore),
            extractor,
            session_id: nanoid!(),
        })
    }

    /// Chromium plus the provider picked from `creds`.
    pub fn connect(cfg: EngineConfig, creds: &Credentials) -> Result<Self, AgentError> {
        cfg.validate()?;
        let (call, selection) = CallLayer::from_credentials(creds, cfg.retry.clone())?;
        let reasoner = Arc::new(LlmReasoner::new(Arc::new(call), selection.model));
        let launcher = Arc::new(ChromiumLauncher::from_config(&cfg));
        Ok(Self::new(cfg, launcher, reasoner)?)
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_extractor(mut self, extractor: DomExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Run `prompt` to completion. `Ok(None)` means the budget ran out or the
    /// model gave no usable decision.
    pub async fn run<S: AsRef<str>>(
        &self,
        prompt: &str,
        login_sites: &[S],
        extraction_schema: Option<Value>,
    ) -> Result<Option<String>, AgentError> {
        let goal = check_goal(prompt)?;
        let logins = resolve_sites(login_sites)?;
        let outcome = self
            .run_goal(goal, logins, extraction_schema.map(Arc::new), None)
            .await?;
        Ok(outcome.output)
    }

    /// One full run-loop instance in its own browser window.
    pub(crate) async fn run_goal(
        &self,
        goal: &str,
        logins: Vec<Arc<dyn LoginStrategy>>,
        schema: Option<Arc<Value>>,
        context_id: Option<String>,
    ) -> Result<RunOutcome, AgentError> {
        let mut session = self.open_session(context_id, logins).await?;
        let budget = self.cfg.max_depth;
        let result = AssertUnwindSafe(self.drive(&mut session, goal, schema.as_ref(), budget, true))
            .catch_unwind()
            .await;
        self.close_session(&session).await;
        match result {
            Ok(output) => Ok(RunOutcome {
                output,
                history: session.history,
                context_id: session.context_id,
            }),
            Err(panic) => resume_unwind(panic),
        }
    }

    pub(crate) async fn open_session(
        &self,
        context_id: Option<String>,
        logins: Vec<Arc<dyn LoginStrategy>>,
    ) -> Result<Session, AgentError> {
        let page = self.launcher.launch().await?;
        let trace = TraceRecorder::new(
            &self.cfg.trace_dir,
            &self.session_id,
            context_id.as_deref(),
            self.cfg.enable_tracing,
        );
        trace
            .record(TraceEvent::Start {
                start_url: self.cfg.start_url.clone(),
            })
            .await;
        let session = Session {
            page,
            history: History::new(),
            snapshot: PageSnapshot::initial(&self.cfg.start_url),
            logins,
            trace,
            context_id,
            previous: None,
        };
        if let Err(e) = session.page.goto(&self.cfg.start_url).await {
            error!(url = %self.cfg.start_url, error = %e, "failed to open start page");
            self.close_session(&session).await;
            return Err(e);
        }
        info!(session_id = %self.session_id, context_id = ?session.context_id, "session started");
        Ok(session)
    }

    /// Best effort teardown; safe to call on an already closed page.
    pub(crate) async fn close_session(&self, session: &Session) {
        session
            .trace
            .record(TraceEvent::End {
                steps: session.history.len(),
            })
            .await;
        session.trace.finish(session.page.as_ref()).await;
        if let Err(e) = session.page.close().await {
            debug!(error = %e, "browser already closed");
        }
        self.reasoner.end_context(session.context_id.as_deref()).await;
    }

    /// Drive the loop for at most `budget` iterations.
    pub(crate) async fn drive(
        &self,
        session: &mut Session,
        goal: &str,
        schema: Option<&Arc<Value>>,
        budget: usize,
        want_output: bool,
    ) -> Option<String> {
        for step in 1..=budget {
            if !session.logins.is_empty() && self.try_login(session).await {
                continue;
            }

            let previous = session.previous.clone();
            let Some(decision) = self.decide(session, goal, previous.as_ref()).await else {
                return None;
            };
            let Some(action) = decision.action else {
                return self.finish(session, goal, want_output).await;
            };
            if decision.extract_info {
                self.spawn_extraction(session, goal, schema);
            }

            info!(step, context_id = ?session.context_id, action = %action.to_json(), "executing");
            let outcome = execute(session.page.as_ref(), &action).await;
            self.observe(session, &outcome).await;
            session.snapshot = self.refresh(session.page.as_ref()).await;
            session.previous = Some(previous_from(&outcome));
            if outcome.succeeded() {
                continue;
            }

            warn!(
                step,
                context_id = ?session.context_id,
                "action failed, re-deciding on the latest page"
            );
            let failed = session.previous.clone();
            let Some(retry) = self.decide(session, goal, failed.as_ref()).await else {
                continue;
            };
            let Some(action) = retry.action else {
                return self.finish(session, goal, want_output).await;
            };
            if retry.extract_info {
                self.spawn_extraction(session, goal, schema);
            }
            let outcome = execute(session.page.as_ref(), &action).await;
            self.observe(session, &outcome).await;
            if let Some(reason) = &outcome.failure_reason {
                error!(
                    step,
                    context_id = ?session.context_id,
                    reason = %reason,
                    "retry also failed"
                );
            }
            session.previous = Some(previous_from(&outcome));
            session.snapshot = self.refresh(session.page.as_ref()).await;
        }
        info!(budget, context_id = ?session.context_id, "step budget exhausted");
        None
    }

    async fn decide(
        &self,
        session: &Session,
        goal: &str,
        previous: Option<&PreviousAction>,
    ) -> Option<Decision> {
        let history = session.history.render();
        let req = DecideRequest {
            goal,
            snapshot: &session.snapshot,
            history: &history,
            previous,
            context_id: session.context_id.as_deref(),
        };
        match self.reasoner.decide(req).await {
            Ok(d) => Some(d),
            Err(e) => {
                error!(
                    context_id = ?session.context_id,
                    error = %e,
                    "no usable decision from the model"
                );
                None
            }
        }
    }

    async fn finish(&self, session: &Session, goal: &str, want_output: bool) -> Option<String> {
        info!(context_id = ?session.context_id, "automation completed, model returned no action");
        if !want_output {
            return None;
        }
        match self
            .reasoner
            .output(goal, &session.snapshot, session.context_id.as_deref())
            .await
        {
            Ok(text) => {
                info!(output = %text, "final output");
                session.trace.record(TraceEvent::Output { text: text.clone() }).await;
                Some(text)
            }
            Err(e) => {
                error!(error = %e, "failed to produce output");
                None
            }
        }
    }

    async fn observe(&self, session: &mut Session, outcome: &ActionOutcome) {
        let succeeded = outcome.succeeded();
        session
            .history
            .record(&outcome.action, succeeded, outcome.failure_reason.as_deref());
        let action_json = outcome.action.to_json();
        session
            .trace
            .record(TraceEvent::Action {
                step: session.history.len(),
                action: action_json.clone(),
                ok: succeeded,
                failure_reason: outcome.failure_reason.clone(),
            })
            .await;

        let page_url = session.page.url().await.unwrap_or_default();
        let record = EpisodicRecord {
            session_id: self.session_id.clone(),
            action: action_json,
            page_url,
            succeeded,
            failure_reason: outcome.failure_reason.clone(),
            context_id: session.context_id.clone(),
            recorded_at_ms: now_ms(),
        };
        if let Err(e) = self.memory.append_episodic(&record).await {
            warn!(error = %e, "episodic write failed");
        }
    }

    async fn try_login(&self, session: &mut Session) -> bool {
        let url = session.page.url().await.unwrap_or_default();
        for strategy in session.logins.clone() {
            let engine = strategy.engine_name().to_string();
            debug!(engine = %engine, "testing login engine");
            match strategy.attempt(session.page.as_ref()).await {
                LoginOutcome::NotApplicable => {}
                LoginOutcome::LoggedIn => {
                    info!(engine = %engine, url = %url, "logged in");
                    session
                        .trace
                        .record(TraceEvent::Login { url, engine, ok: true })
                        .await;
                    session.logins.clear();
                    session.snapshot = self.refresh(session.page.as_ref()).await;
                    return true;
                }
                LoginOutcome::Failed(reason) => {
                    warn!(
                        engine = %engine,
                        url = %url,
                        reason = %reason,
                        "login attempted but failed"
                    );
                    session
                        .trace
                        .record(TraceEvent::Login {
                            url: url.clone(),
                            engine,
                            ok: false,
                        })
                        .await;
                }
            }
        }
        false
    }

    /// Copies the current page text into a detached extraction task.
    fn spawn_extraction(&self, session: &Session, goal: &str, schema: Option<&Arc<Value>>) {
        let reasoner = Arc::clone(&self.reasoner);
        let memory = Arc::clone(&self.memory);
        let session_id = self.session_id.clone();
        let context_id = session.context_id.clone();
        let task = goal.to_string();
        let text = session.snapshot.visible_text.join("\n");
        let schema = schema.cloned();
        let span = info_span!("extraction", session_id = %session_id, context_id = ?context_id);
        info!("running the extractor on the current page");
        tokio::spawn(
            async move {
                let data = match reasoner
                    .extract(&task, &text, schema.as_deref(), context_id.as_deref())
                    .await
                {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "extraction failed");
                        return;
                    }
                };
                info!(data = %data, "extracted content");
                if let Err(e) = memory.append_semantic(&session_id, &data).await {
                    warn!(error = %e, "semantic write failed");
                }
            }
            .instrument(span),
        );
    }

    /// Network idle with a short timeout, plus jitter when enabled.
    async fn wait_till_loaded(&self, page: &dyn LivePage) {
        let idle = page.wait_for_network_idle(self.cfg.network_idle_timeout);
        if self.cfg.use_random {
            let mouse = MouseJitter::new(page);
            let scroll = ScrollJitter::new(page);
            let (idle, moved, scrolled) =
                tokio::join!(idle, mouse.random_movement(), scroll.apply());
            for res in [idle, moved, scrolled] {
                if let Err(e) = res {
                    debug!(error = %e, "settle step failed");
                }
            }
        } else if let Err(e) = idle.await {
            debug!(error = %e, "network idle wait failed");
        }
    }

    pub(crate) async fn refresh(&self, page: &dyn LivePage) -> PageSnapshot {
        self.wait_till_loaded(page).await;
        self.extractor.extract(page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::error::ProviderError;
    use crate::llm::Decision;
    use crate::memory::InMemoryStore;
    use crate::testing::FakePage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct OneShotLauncher(Arc<FakePage>);

    #[async_trait]
    impl Launcher for OneShotLauncher {
        async fn launch(&self) -> Result<Arc<dyn LivePage>, AgentError> {
            Ok(self.0.clone())
        }
    }

    /// Replays decisions in order, then the sentinel.
    struct Script {
        decisions: Mutex<Vec<Result<Decision, ProviderError>>>,
        extracted: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(mut decisions: Vec<Result<Decision, ProviderError>>) -> Self {
            decisions.reverse();
            Self {
                decisions: Mutex::new(decisions),
                extracted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Reasoner for Script {
        async fn decide(&self, _req: DecideRequest<'_>) -> Result<Decision, ProviderError> {
            self.decisions.lock().unwrap().pop().unwrap_or(Ok(Decision {
                action: None,
                extract_info: false,
            }))
        }

        async fn output(
            &self,
            goal: &str,
            _snapshot: &PageSnapshot,
            _context_id: Option<&str>,
        ) -> Result<String, ProviderError> {
            Ok(format!("done: {goal}"))
        }

        async fn extract(
            &self,
            _task: &str,
            page_text: &str,
            _schema: Option<&Value>,
            _context_id: Option<&str>,
        ) -> Result<Value, ProviderError> {
            self.extracted.lock().unwrap().push(page_text.to_string());
            Ok(serde_json::json!({ "text": page_text }))
        }
    }

    fn act(action: Action) -> Result<Decision, ProviderError> {
        Ok(Decision {
            action: Some(action),
            extract_info: false,
        })
    }

    fn engine(page: Arc<FakePage>, script: Arc<Script>) -> Engine {
        let cfg = EngineConfig {
            enable_tracing: false,
            ..EngineConfig::default()
        };
        Engine::new(cfg, Arc::new(OneShotLauncher(page)), script).unwrap()
    }

    #[test]
    fn blank_goal_is_rejected() {
        assert_eq!(check_goal("   "), Err(ConfigError::PromptNotPresent));
        assert_eq!(check_goal(" find it "), Ok("find it"));
    }

    #[tokio::test]
    async fn invalid_config_fails_before_launch() {
        let cfg = EngineConfig {
            use_random: true,
            low_memory: true,
            ..EngineConfig::default()
        };
        let page = Arc::new(FakePage::new("about:blank"));
        let res = Engine::new(cfg, Arc::new(OneShotLauncher(page)), Arc::new(Script::new(vec![])));
        assert!(matches!(res, Err(ConfigError::RandomWithLowMemory)));
    }

    #[tokio::test]
    async fn unknown_login_site_fails_before_launch() {
        let page = Arc::new(FakePage::new("about:blank"));
        let engine = engine(page.clone(), Arc::new(Script::new(vec![])));
        let res = engine.run("go", &["geocities"], None).await;
        assert!(matches!(
            res,
            Err(AgentError::Config(ConfigError::UnknownLoginSite { .. }))
        ));
        assert!(page.calls().is_empty());
    }

    #[tokio::test]
    async fn success_then_sentinel_yields_output() {
        let page = Arc::new(FakePage::new("about:blank"));
        let script = Arc::new(Script::new(vec![act(Action::Goto {
            url: "https://docs.rs".into(),
        })]));
        let memory = Arc::new(InMemoryStore::new());
        let engine = engine(page.clone(), script).with_memory(memory.clone());

        let out = engine.run("open docs", &[] as &[&str], None).await.unwrap();
        assert_eq!(out.as_deref(), Some("done: open docs"));
        assert_eq!(page.calls()[0], "goto https://search.brave.com");
        assert_eq!(page.calls()[1], "goto https://docs.rs");
        assert_eq!(page.closes(), 1);

        let records = memory.episodic().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page_url, "https://docs.rs");
        assert!(records[0].succeeded);
    }

    #[tokio::test]
    async fn failed_action_is_retried_once_against_the_fresh_page() {
        let page = Arc::new(FakePage::new("about:blank").failing_on("#gone"));
        let script = Arc::new(Script::new(vec![
            act(Action::Click {
                selector: "#gone".into(),
            }),
            act(Action::Click {
                selector: "#other".into(),
            }),
        ]));
        let engine = engine(page.clone(), script);
        let outcome = engine.run_goal("click it", Vec::new(), None, None).await.unwrap();

        assert_eq!(outcome.output.as_deref(), Some("done: click it"));
        assert_eq!(
            outcome.history.lines(),
            &[
                "Step 1 [FAILED]: Clicked on the element '#gone' on the page. Failure reason: browser error: element not found: #gone".to_string(),
                "Step 2 [OK]: Clicked on the element '#other' on the page".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn decode_failure_ends_without_output() {
        let page = Arc::new(FakePage::new("about:blank"));
        let script = Arc::new(Script::new(vec![Err(ProviderError::Decode(
            "missing field `actions`".into(),
        ))]));
        let engine = engine(page.clone(), script);
        let outcome = engine.run_goal("x", Vec::new(), None, None).await.unwrap();
        assert_eq!(outcome.output, None);
        assert!(outcome.history.is_empty());
        assert_eq!(page.closes(), 1);
    }

    #[tokio::test]
    async fn extraction_runs_detached_with_a_copy_of_the_page_text() {
        let page = Arc::new(
            FakePage::new("about:blank").with_page("<html></html>", "Price: 10\n\nStock: 3"),
        );
        let script = Arc::new(Script::new(vec![
            act(Action::Reload),
            Ok(Decision {
                action: Some(Action::Reload),
                extract_info: true,
            }),
        ]));
        let memory = Arc::new(InMemoryStore::new());
        let engine = engine(page, script.clone()).with_memory(memory.clone());
        engine.run("read price", &[] as &[&str], None).await.unwrap();

        for _ in 0..50 {
            if !memory.semantic().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let semantic = memory.semantic().await;
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].data["text"], "Price: 10\nStock: 3");
    }
}

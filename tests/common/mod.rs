#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use webpilot::browser::Button;
use webpilot::dom::PageSnapshot;
use webpilot::llm::DecideRequest;
use webpilot::{AgentError, Decision, Launcher, LivePage, Planner, ProviderError, Reasoner};

/// A page that records every call and fails on chosen selectors.
pub struct ScriptedPage {
    url: Mutex<String>,
    calls: Mutex<Vec<String>>,
    failing: Vec<String>,
    navigate_on_click: HashMap<String, String>,
    closes: AtomicUsize,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self {
            url: Mutex::new("about:blank".into()),
            calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
            navigate_on_click: HashMap::new(),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, selector: &str) -> Self {
        self.failing.push(selector.into());
        self
    }

    pub fn navigates(mut self, selector: &str, url: &str) -> Self {
        self.navigate_on_click.insert(selector.into(), url.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, selector: &str) -> Result<(), AgentError> {
        if self.failing.iter().any(|f| f == selector) {
            return Err(AgentError::Browser(format!("element not found: {selector}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LivePage for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<(), AgentError> {
        self.log(format!("goto {url}"));
        *self.url.lock().unwrap() = url.into();
        Ok(())
    }

    async fn url(&self) -> Result<String, AgentError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String, AgentError> {
        Ok("<html><body><p>hello</p></body></html>".into())
    }

    async fn body_text(&self) -> Result<String, AgentError> {
        Ok("hello".into())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AgentError> {
        if let Some(sel) = self.failing.iter().find(|f| script.contains(f.as_str())) {
            return Ok(json!({
                "ok": false,
                "reason": format!("no element matches selector {sel}")
            }));
        }
        if script.contains("\"valid_tags\"") {
            return Ok(json!([]));
        }
        if script.contains("\"op\"") {
            self.log("set_control".into());
            return Ok(json!({ "ok": true }));
        }
        Ok(Value::Null)
    }

    async fn click(&self, selector: &str, _button: Button, _count: u8) -> Result<(), AgentError> {
        self.check(selector)?;
        self.log(format!("click {selector}"));
        if let Some(url) = self.navigate_on_click.get(selector) {
            *self.url.lock().unwrap() = url.clone();
        }
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), AgentError> {
        self.check(selector)
    }

    async fn focus(&self, selector: &str) -> Result<(), AgentError> {
        self.check(selector)
    }

    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        self.log(format!("type {text}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AgentError> {
        self.log(format!("press {key}"));
        Ok(())
    }

    async fn upload(&self, selector: &str, _path: &str) -> Result<(), AgentError> {
        self.check(selector)
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), AgentError> {
        self.check(selector)
    }

    async fn mouse_move(&self, _x: f64, _y: f64) -> Result<(), AgentError> {
        Ok(())
    }

    async fn mouse_click(&self, _x: f64, _y: f64) -> Result<(), AgentError> {
        Ok(())
    }

    async fn new_tab(&self, _url: &str) -> Result<(), AgentError> {
        Ok(())
    }

    async fn close_tab(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn switch_tab(&self, _index: usize) -> Result<(), AgentError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), AgentError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type PageFactory = Box<dyn Fn() -> ScriptedPage + Send + Sync>;

/// Hands out a fresh page per launch and keeps them for inspection.
pub struct Pages {
    make: PageFactory,
    launched: Mutex<Vec<Arc<ScriptedPage>>>,
}

impl Pages {
    pub fn new(make: impl Fn() -> ScriptedPage + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<Arc<ScriptedPage>> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for Pages {
    async fn launch(&self) -> Result<Arc<dyn LivePage>, AgentError> {
        let page = Arc::new((self.make)());
        self.launched.lock().unwrap().push(page.clone());
        Ok(page)
    }
}

/// What the reasoner was shown on one `decide` call.
#[derive(Clone, Debug)]
pub struct Seen {
    pub goal: String,
    pub history: String,
    pub previous_ok: Option<bool>,
    pub context_id: Option<String>,
}

type DecideFn = Box<dyn Fn(&DecideRequest<'_>) -> Result<Decision, ProviderError> + Send + Sync>;

pub struct ScriptedReasoner {
    decide: DecideFn,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedReasoner {
    pub fn new(
        decide: impl Fn(&DecideRequest<'_>) -> Result<Decision, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            decide: Box::new(decide),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn decide(&self, req: DecideRequest<'_>) -> Result<Decision, ProviderError> {
        self.seen.lock().unwrap().push(Seen {
            goal: req.goal.to_string(),
            history: req.history.to_string(),
            previous_ok: req.previous.map(|p| p.succeeded),
            context_id: req.context_id.map(str::to_owned),
        });
        (self.decide)(&req)
    }

    async fn output(
        &self,
        goal: &str,
        _snapshot: &PageSnapshot,
        context_id: Option<&str>,
    ) -> Result<String, ProviderError> {
        Ok(match context_id {
            Some(ctx) => format!("done: {goal} @ {ctx}"),
            None => format!("done: {goal}"),
        })
    }

    async fn extract(
        &self,
        _task: &str,
        page_text: &str,
        _schema: Option<&Value>,
        _context_id: Option<&str>,
    ) -> Result<Value, ProviderError> {
        Ok(json!({ "text": page_text }))
    }
}

/// Fixed plans; records the `old_plan` each DFS call received.
pub struct FixedPlanner {
    pub plans: Vec<String>,
    pub old_plans: Mutex<Vec<Option<String>>>,
}

impl FixedPlanner {
    pub fn new(plans: &[&str]) -> Self {
        Self {
            plans: plans.iter().map(|p| p.to_string()).collect(),
            old_plans: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan_dfs(&self, _task: &str, old_plan: Option<&str>) -> Result<String, ProviderError> {
        let mut old = self.old_plans.lock().unwrap();
        let plan = self
            .plans
            .get(old.len())
            .cloned()
            .ok_or_else(|| ProviderError::Decode("no more plans".into()))?;
        old.push(old_plan.map(str::to_owned));
        Ok(plan)
    }

    async fn plan_bfs(&self, _task: &str, _max_plans: usize) -> Result<Vec<String>, ProviderError> {
        Ok(self.plans.clone())
    }
}

pub fn act(action: webpilot::Action) -> Result<Decision, ProviderError> {
    Ok(Decision {
        action: Some(action),
        extract_info: false,
    })
}

pub fn done() -> Result<Decision, ProviderError> {
    Ok(Decision {
        action: None,
        extract_info: false,
    })
}

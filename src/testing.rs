//! In-memory page used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::browser::{Button, LivePage};
use crate::error::AgentError;

pub(crate) struct FakePage {
    url: Mutex<String>,
    html: Mutex<String>,
    text: Mutex<String>,
    calls: Mutex<Vec<String>>,
    failing: Vec<String>,
    navigate_on_click: Mutex<HashMap<String, String>>,
    inputs: Value,
    content_fails: bool,
    text_fails: bool,
    closes: AtomicUsize,
}

impl FakePage {
    pub const PNG: &'static [u8] = b"\x89PNG\r\n\x1a\nfake";

    pub fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            html: Mutex::new("<html><body></body></html>".to_string()),
            text: Mutex::new(String::new()),
            calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
            navigate_on_click: Mutex::new(HashMap::new()),
            inputs: json!([]),
            content_fails: false,
            text_fails: false,
            closes: AtomicUsize::new(0),
        }
    }

    /// Any operation mentioning `selector` fails as if it were missing.
    pub fn failing_on(mut self, selector: &str) -> Self {
        self.failing.push(selector.to_string());
        self
    }

    pub fn with_page(self, html: &str, text: &str) -> Self {
        *self.html.lock().unwrap() = html.to_string();
        *self.text.lock().unwrap() = text.to_string();
        self
    }

    /// What the input field query returns.
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// `content()` errors as if the target crashed.
    pub fn without_content(mut self) -> Self {
        self.content_fails = true;
        self
    }

    /// `body_text()` errors as if the target crashed.
    pub fn without_text(mut self) -> Self {
        self.text_fails = true;
        self
    }

    /// Clicking `selector` moves the page to `url`.
    pub fn navigates(self, selector: &str, url: &str) -> Self {
        self.navigate_on_click
            .lock()
            .unwrap()
            .insert(selector.to_string(), url.to_string());
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
            return Err(AgentError::browser(format!("element not found: {selector}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LivePage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), AgentError> {
        self.log(format!("goto {url}"));
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn url(&self) -> Result<String, AgentError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String, AgentError> {
        if self.content_fails {
            return Err(AgentError::browser("target crashed"));
        }
        Ok(self.html.lock().unwrap().clone())
    }

    async fn body_text(&self) -> Result<String, AgentError> {
        if self.text_fails {
            return Err(AgentError::browser("target crashed"));
        }
        Ok(self.text.lock().unwrap().clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AgentError> {
        self.log(format!("evaluate {script}"));
        if let Some(sel) = self.failing.iter().find(|f| script.contains(f.as_str())) {
            return Ok(json!({
                "ok": false,
                "reason": format!("no element matches selector {sel}")
            }));
        }
        if script.contains("\"valid_tags\"") {
            return Ok(self.inputs.clone());
        }
        if script.contains("\"op\"") {
            return Ok(json!({ "ok": true }));
        }
        Ok(Value::Null)
    }

    async fn click(&self, selector: &str, button: Button, count: u8) -> Result<(), AgentError> {
        self.check(selector)?;
        self.log(format!("click {selector} {button:?} x{count}"));
        let target = self.navigate_on_click.lock().unwrap().get(selector).cloned();
        if let Some(url) = target {
            *self.url.lock().unwrap() = url;
        }
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), AgentError> {
        self.check(selector)?;
        self.log(format!("hover {selector}"));
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<(), AgentError> {
        self.check(selector)?;
        self.log(format!("focus {selector}"));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        self.log(format!("type {text}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AgentError> {
        self.log(format!("press {key}"));
        Ok(())
    }

    async fn upload(&self, selector: &str, path: &str) -> Result<(), AgentError> {
        self.check(selector)?;
        self.log(format!("upload {selector} {path}"));
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), AgentError> {
        self.check(selector)?;
        self.log(format!("wait {selector}"));
        Ok(())
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), AgentError> {
        self.log(format!("mouse_move {x} {y}"));
        Ok(())
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), AgentError> {
        self.log(format!("mouse_click {x} {y}"));
        Ok(())
    }

    async fn new_tab(&self, url: &str) -> Result<(), AgentError> {
        self.log(format!("new_tab {url}"));
        Ok(())
    }

    async fn close_tab(&self) -> Result<(), AgentError> {
        self.log("close_tab".to_string());
        Ok(())
    }

    async fn switch_tab(&self, index: usize) -> Result<(), AgentError> {
        self.log(format!("switch_tab {index}"));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        Ok(Self::PNG.to_vec())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), AgentError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

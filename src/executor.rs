//! Runs one decoded [`Action`] against a live page.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs as async_fs;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::action::Action;
use crate::browser::{Button, LivePage};
use crate::dom::call_with;
use crate::error::AgentError;
use crate::util::resolve_url;

const SET_CONTROL_JS: &str = include_str!("js/set_control.js");
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// The result of executing one action.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionOutcome {
    pub action: Action,
    /// Set when the action succeeded.
    pub value: Option<Value>,
    pub failure_reason: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Deserialize)]
struct ControlResult {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
}

async fn set_control(
    page: &dyn LivePage,
    op: &str,
    selector: &str,
    value: &str,
) -> Result<Value, AgentError> {
    let arg = json!({ "op": op, "selector": selector, "value": value });
    let raw = page.evaluate(&call_with(SET_CONTROL_JS, &arg)).await?;
    let res: ControlResult = serde_json::from_value(raw)
        .map_err(|e| AgentError::Other(format!("{op}: unexpected result: {e}")))?;
    if res.ok {
        Ok(Value::Bool(true))
    } else {
        Err(AgentError::Other(
            res.reason.unwrap_or_else(|| format!("{op} failed on {selector}")),
        ))
    }
}

fn done() -> Value {
    Value::Bool(true)
}

async fn perform(page: &dyn LivePage, action: &Action) -> Result<Value, AgentError> {
    match action {
        Action::Goto { url } => {
            let target = match page.url().await {
                Ok(current) => resolve_url(&current, url),
                Err(_) => url.clone(),
            };
            page.goto(&target).await?;
            Ok(Value::String(target))
        }
        Action::GoBack => page.evaluate("history.back()").await.map(|_| done()),
        Action::GoForward => page.evaluate("history.forward()").await.map(|_| done()),
        Action::Reload => page.evaluate("location.reload()").await.map(|_| done()),

        Action::Click { selector } => page.click(selector, Button::Left, 1).await.map(|_| done()),
        Action::DoubleClick { selector } => {
            page.click(selector, Button::Left, 2).await.map(|_| done())
        }
        Action::RightClick { selector } => {
            page.click(selector, Button::Right, 1).await.map(|_| done())
        }
        Action::Hover { selector } => page.hover(selector).await.map(|_| done()),

        Action::Fill { selector, value } => set_control(page, "fill", selector, value).await,
        Action::Type { selector, text } => {
            page.focus(selector).await?;
            page.type_text(text).await?;
            Ok(done())
        }
        Action::Dropdown { selector, value } => {
            set_control(page, "dropdown", selector, value).await
        }
        Action::Check { selector } => set_control(page, "check", selector, "").await,
        Action::Uncheck { selector } => set_control(page, "uncheck", selector, "").await,
        Action::Select { selector, value } => set_control(page, "select", selector, value).await,
        Action::Upload { selector, path } => page.upload(selector, path).await.map(|_| done()),

        Action::Press { selector, key } => {
            if let Some(selector) = selector {
                page.focus(selector).await?;
            }
            page.press_key(key).await.map(|_| done())
        }
        Action::KeyboardPress { key } => page.press_key(key).await.map(|_| done()),
        Action::KeyboardType { text } => page.type_text(text).await.map(|_| done()),
        Action::MouseMove { x, y } => page.mouse_move(*x as f64, *y as f64).await.map(|_| done()),
        Action::MouseClick { x, y } => page.mouse_click(*x as f64, *y as f64).await.map(|_| done()),
        Action::ScrollTo { x, y } => page
            .evaluate(&format!("window.scrollTo({x}, {y})"))
            .await
            .map(|_| done()),

        Action::NewTab { url } => {
            let target = if url.is_empty() { "about:blank" } else { url.as_str() };
            page.new_tab(target).await.map(|_| done())
        }
        Action::CloseTab => page.close_tab().await.map(|_| done()),
        Action::SwitchTab { index } => page.switch_tab(*index).await.map(|_| done()),

        Action::Evaluate { script } => {
            let v = page.evaluate(script).await?;
            // A script that returns nothing still ran.
            Ok(if v.is_null() { done() } else { v })
        }
        Action::WaitForSelector { selector, timeout_ms } => {
            let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_WAIT_TIMEOUT);
            page.wait_for_selector(selector, timeout).await.map(|_| done())
        }
        Action::Wait { ms } => {
            sleep(Duration::from_millis(*ms)).await;
            Ok(done())
        }
        Action::Screenshot { path } => {
            let png = page.screenshot().await?;
            async_fs::write(path, &png)
                .await
                .map_err(|e| AgentError::Other(format!("write {path}: {e}")))?;
            Ok(Value::String(path.clone()))
        }
        Action::Download { selector } => {
            page.click(selector, Button::Left, 1).await.map(|_| done())
        }
    }
}

/// Execute exactly one action. Errors become a failure reason; nothing propagates.
pub async fn execute(page: &dyn LivePage, action: &Action) -> ActionOutcome {
    debug!(kind = ?action.kind(), "executing action");
    match perform(page, action).await {
        Ok(value) => ActionOutcome {
            action: action.clone(),
            value: Some(value),
            failure_reason: None,
        },
        Err(e) => {
            warn!(kind = ?action.kind(), error = %e, "action failed");
            ActionOutcome {
                action: action.clone(),
                value: None,
                failure_reason: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[tokio::test]
    async fn click_reaches_the_page() {
        let page = FakePage::new("https://site.test/");
        let out = execute(
            &page,
            &Action::DoubleClick {
                selector: "#b".into(),
            },
        )
        .await;
        assert!(out.succeeded());
        assert_eq!(page.calls(), vec!["click #b Left x2"]);
    }

    #[tokio::test]
    async fn relative_goto_resolves_against_the_current_page() {
        let page = FakePage::new("https://site.test/docs/intro");
        let out = execute(
            &page,
            &Action::Goto {
                url: "../changelog".into(),
            },
        )
        .await;
        assert_eq!(out.value, Some(json!("https://site.test/changelog")));

        execute(
            &page,
            &Action::Goto {
                url: "https://docs.rs/".into(),
            },
        )
        .await;
        assert_eq!(
            page.calls(),
            vec!["goto https://site.test/changelog", "goto https://docs.rs/"]
        );
    }

    #[tokio::test]
    async fn missing_element_is_a_failure_not_an_error() {
        let page = FakePage::new("https://site.test/").failing_on("#submit");
        let out = execute(
            &page,
            &Action::Click {
                selector: "#submit".into(),
            },
        )
        .await;
        assert!(!out.succeeded());
        assert!(out.failure_reason.unwrap().contains("element not found"));
    }

    #[tokio::test]
    async fn fill_goes_through_the_control_script() {
        let page = FakePage::new("https://site.test/");
        let out = execute(
            &page,
            &Action::Fill {
                selector: "#q".into(),
                value: "python".into(),
            },
        )
        .await;
        assert!(out.succeeded());
        let calls = page.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("evaluate"));
        assert!(calls[0].contains(r##""selector":"#q""##));
    }

    #[tokio::test]
    async fn control_script_rejection_carries_its_reason() {
        let page = FakePage::new("https://site.test/").failing_on("#nope");
        let out = execute(
            &page,
            &Action::Check {
                selector: "#nope".into(),
            },
        )
        .await;
        assert_eq!(
            out.failure_reason.as_deref(),
            Some("other error: no element matches selector #nope")
        );
    }

    #[tokio::test]
    async fn press_focuses_its_target_first() {
        let page = FakePage::new("https://site.test/");
        execute(
            &page,
            &Action::Press {
                selector: Some("#q".into()),
                key: "Enter".into(),
            },
        )
        .await;
        assert_eq!(page.calls(), vec!["focus #q", "press Enter"]);
    }

    #[tokio::test]
    async fn screenshot_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png").to_string_lossy().into_owned();
        let page = FakePage::new("https://site.test/");
        let out = execute(&page, &Action::Screenshot { path: path.clone() }).await;
        assert_eq!(out.value, Some(Value::String(path.clone())));
        assert_eq!(std::fs::read(&path).unwrap(), FakePage::PNG.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_for_the_given_time() {
        let page = FakePage::new("https://site.test/");
        let before = tokio::time::Instant::now();
        let out = execute(&page, &Action::Wait { ms: 1500 }).await;
        assert!(out.succeeded());
        assert!(before.elapsed() >= Duration::from_millis(1500));
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use nanoid::nanoid;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
}

/// One live browser window with its tabs. Methods act on the active tab.
#[async_trait]
pub trait LivePage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), AgentError>;
    async fn url(&self) -> Result<String, AgentError>;
    async fn content(&self) -> Result<String, AgentError>;
    async fn body_text(&self) -> Result<String, AgentError>;
    /// Evaluate an expression and return its JSON value (`Null` for undefined).
    async fn evaluate(&self, script: &str) -> Result<Value, AgentError>;

    async fn click(&self, selector: &str, button: Button, count: u8) -> Result<(), AgentError>;
    async fn hover(&self, selector: &str) -> Result<(), AgentError>;
    async fn focus(&self, selector: &str) -> Result<(), AgentError>;
    /// Type into whatever is focused, one character at a time.
    async fn type_text(&self, text: &str) -> Result<(), AgentError>;
    /// Press a named key on whatever is focused.
    async fn press_key(&self, key: &str) -> Result<(), AgentError>;
    async fn upload(&self, selector: &str, path: &str) -> Result<(), AgentError>;
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AgentError>;

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), AgentError>;
    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), AgentError>;

    async fn new_tab(&self, url: &str) -> Result<(), AgentError>;
    async fn close_tab(&self) -> Result<(), AgentError>;
    async fn switch_tab(&self, index: usize) -> Result<(), AgentError>;

    /// PNG bytes of the active tab.
    async fn screenshot(&self) -> Result<Vec<u8>, AgentError>;
    /// Best effort: returns `Ok` once the page settles or `timeout` elapses.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AgentError>;
    /// Idempotent teardown of the whole window.
    async fn close(&self) -> Result<(), AgentError>;
}

/// Opens a fresh browser window per run-loop instance.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn LivePage>, AgentError>;
}

#[derive(Clone, Debug)]
pub struct ChromiumLauncher {
    pub headless: bool,
    pub args: Vec<String>,
    pub user_agent: Option<String>,
    pub viewport: (i64, i64),
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
            user_agent: None,
            viewport: (1280, 800),
        }
    }
}

impl ChromiumLauncher {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            headless: cfg.headless,
            args: cfg.launch_args(),
            ..Self::default()
        }
    }

    async fn start(&self) -> Result<ChromiumPage> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !self.headless {
            builder = builder.with_head();
        }
        // A unique profile per window avoids the ProcessSingleton lock when
        // several windows run at once.
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("webpilot-profile-{}-{}", std::process::id(), nanoid!(8)));
        std::fs::create_dir_all(&profile_dir).context("create profile dir")?;
        builder = builder
            .user_data_dir(profile_dir.clone())
            .window_size(self.viewport.0 as u32, self.viewport.1 as u32)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        for arg in &self.args {
            builder = builder.arg(arg.clone());
        }
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        let handler = tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = &self.user_agent {
            page.set_user_agent(ua.clone()).await?;
        }
        // Non-zero viewport, otherwise screenshots fail with a 0-width error.
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(self.viewport.0)
            .height(self.viewport.1)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        let _ = page.execute(metrics).await;

        Ok(ChromiumPage {
            browser: Mutex::new(Some(browser)),
            tabs: Mutex::new(Tabs {
                pages: vec![page],
                active: 0,
            }),
            handler,
            profile_dir,
        })
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn LivePage>, AgentError> {
        let page = self.start().await.map_err(AgentError::browser)?;
        Ok(Arc::new(page))
    }
}

struct Tabs {
    pages: Vec<Page>,
    active: usize,
}

pub struct ChromiumPage {
    browser: Mutex<Option<OxideBrowser>>,
    tabs: Mutex<Tabs>,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl ChromiumPage {
    async fn page(&self) -> Result<Page> {
        let tabs = self.tabs.lock().await;
        tabs.pages
            .get(tabs.active)
            .cloned()
            .ok_or_else(|| anyhow!("no open tab"))
    }

    async fn element(&self, selector: &str) -> Result<Element> {
        let page = self.page().await?;
        page.find_element(selector)
            .await
            .with_context(|| format!("element not found: {selector}"))
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        let page = self.page().await?;
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow!(e))?;
        let result = page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn dispatch_click(page: &Page, at: Point, button: MouseButton, count: i64) -> Result<()> {
        let cmd = DispatchMouseEventParams::builder()
            .x(at.x)
            .y(at.y)
            .button(button)
            .click_count(count);
        let pressed = cmd
            .clone()
            .r#type(DispatchMouseEventType::MousePressed)
            .build()
            .map_err(|e| anyhow!(e))?;
        let released = cmd
            .r#type(DispatchMouseEventType::MouseReleased)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.move_mouse(at).await?.execute(pressed).await?;
        page.execute(released).await?;
        Ok(())
    }

    async fn click_element(&self, selector: &str, button: Button, count: u8) -> Result<()> {
        let el = self.element(selector).await?;
        if button == Button::Left && count == 1 {
            el.click().await?;
            return Ok(());
        }
        el.scroll_into_view().await?;
        let at = el.clickable_point().await?;
        let page = self.page().await?;
        let btn = match button {
            Button::Left => MouseButton::Left,
            Button::Right => MouseButton::Right,
        };
        Self::dispatch_click(&page, at, btn, count as i64).await
    }

    async fn focused_element(&self) -> Result<Element> {
        let page = self.page().await?;
        match page.find_element(":focus").await {
            Ok(el) => Ok(el),
            Err(_) => Ok(page.find_element("body").await?),
        }
    }

    async fn do_upload(&self, selector: &str, path: &str) -> Result<()> {
        let el = self.element(selector).await?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.to_string()])
            .backend_node_id(el.backend_node_id)
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page().await?.execute(params).await?;
        Ok(())
    }

    async fn do_wait_for_selector(&self, selector: &str, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        loop {
            let page = self.page().await?;
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "timed out after {}ms waiting for {selector}",
                    limit.as_millis()
                ));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn open_tab(&self, url: &str) -> Result<()> {
        let target = if url.is_empty() { "about:blank" } else { url };
        let page = {
            let browser = self.browser.lock().await;
            let browser = browser.as_ref().ok_or_else(|| anyhow!("browser closed"))?;
            browser.new_page(target).await?
        };
        let mut tabs = self.tabs.lock().await;
        tabs.pages.push(page);
        tabs.active = tabs.pages.len() - 1;
        Ok(())
    }

    async fn close_active_tab(&self) -> Result<()> {
        let closing = {
            let mut tabs = self.tabs.lock().await;
            if tabs.pages.is_empty() {
                return Err(anyhow!("no open tab"));
            }
            let idx = tabs.active;
            let page = tabs.pages.remove(idx);
            tabs.active = tabs.pages.len().saturating_sub(1);
            page
        };
        closing.close().await?;
        let empty = self.tabs.lock().await.pages.is_empty();
        if empty {
            self.open_tab("about:blank").await?;
        }
        Ok(())
    }

    async fn activate_tab(&self, index: usize) -> Result<()> {
        let page = {
            let mut tabs = self.tabs.lock().await;
            let count = tabs.pages.len();
            let page = tabs
                .pages
                .get(index)
                .cloned()
                .ok_or_else(|| anyhow!("tab index {index} out of range ({count} open)"))?;
            tabs.active = index;
            page
        };
        page.bring_to_front().await?;
        Ok(())
    }

    async fn take_screenshot(&self) -> Result<Vec<u8>> {
        let page = self.page().await?;
        let bytes = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await?;
        Ok(bytes)
    }

    async fn settle(&self, limit: Duration) -> Result<()> {
        let page = self.page().await?;
        let poll = async {
            loop {
                let state = page
                    .evaluate("document.readyState")
                    .await
                    .ok()
                    .and_then(|r| r.into_value::<String>().ok());
                if state.as_deref() == Some("complete") {
                    break;
                }
                sleep(Duration::from_millis(50)).await;
            }
        };
        if timeout(limit, poll).await.is_err() {
            debug!(timeout_ms = limit.as_millis() as u64, "page did not settle in time");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            browser.close().await?;
            let _ = browser.wait().await;
        }
        self.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!(error = %e, "profile dir cleanup skipped");
        }
        Ok(())
    }
}

#[async_trait]
impl LivePage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), AgentError> {
        let page = self.page().await.map_err(AgentError::browser)?;
        page.goto(url).await.map_err(AgentError::browser)?;
        page.wait_for_navigation().await.map_err(AgentError::browser)?;
        Ok(())
    }

    async fn url(&self) -> Result<String, AgentError> {
        let page = self.page().await.map_err(AgentError::browser)?;
        Ok(page.url().await.map_err(AgentError::browser)?.unwrap_or_default())
    }

    async fn content(&self) -> Result<String, AgentError> {
        let page = self.page().await.map_err(AgentError::browser)?;
        page.content().await.map_err(AgentError::browser)
    }

    async fn body_text(&self) -> Result<String, AgentError> {
        let v = self
            .eval("document.body ? document.body.innerText : ''")
            .await
            .map_err(AgentError::browser)?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AgentError> {
        self.eval(script).await.map_err(AgentError::browser)
    }

    async fn click(&self, selector: &str, button: Button, count: u8) -> Result<(), AgentError> {
        self.click_element(selector, button, count)
            .await
            .map_err(AgentError::browser)
    }

    async fn hover(&self, selector: &str) -> Result<(), AgentError> {
        let el = self.element(selector).await.map_err(AgentError::browser)?;
        el.hover().await.map_err(AgentError::browser)?;
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<(), AgentError> {
        let el = self.element(selector).await.map_err(AgentError::browser)?;
        el.focus().await.map_err(AgentError::browser)?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        let page = self.page().await.map_err(AgentError::browser)?;
        for c in text.chars() {
            page.execute(InsertTextParams::new(c.to_string()))
                .await
                .map_err(AgentError::browser)?;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AgentError> {
        let el = self.focused_element().await.map_err(AgentError::browser)?;
        el.press_key(key).await.map_err(AgentError::browser)?;
        Ok(())
    }

    async fn upload(&self, selector: &str, path: &str) -> Result<(), AgentError> {
        self.do_upload(selector, path).await.map_err(AgentError::browser)
    }

    async fn wait_for_selector(&self, selector: &str, limit: Duration) -> Result<(), AgentError> {
        self.do_wait_for_selector(selector, limit)
            .await
            .map_err(AgentError::browser)
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), AgentError> {
        let page = self.page().await.map_err(AgentError::browser)?;
        page.move_mouse(Point { x, y }).await.map_err(AgentError::browser)?;
        Ok(())
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), AgentError> {
        let page = self.page().await.map_err(AgentError::browser)?;
        Self::dispatch_click(&page, Point { x, y }, MouseButton::Left, 1)
            .await
            .map_err(AgentError::browser)
    }

    async fn new_tab(&self, url: &str) -> Result<(), AgentError> {
        self.open_tab(url).await.map_err(AgentError::browser)
    }

    async fn close_tab(&self) -> Result<(), AgentError> {
        self.close_active_tab().await.map_err(AgentError::browser)
    }

    async fn switch_tab(&self, index: usize) -> Result<(), AgentError> {
        self.activate_tab(index).await.map_err(AgentError::browser)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        self.take_screenshot().await.map_err(AgentError::browser)
    }

    async fn wait_for_network_idle(&self, limit: Duration) -> Result<(), AgentError> {
        self.settle(limit).await.map_err(AgentError::browser)
    }

    async fn close(&self) -> Result<(), AgentError> {
        if let Err(e) = self.shutdown().await {
            warn!(error = %e, "browser shutdown reported an error");
        }
        Ok(())
    }
}

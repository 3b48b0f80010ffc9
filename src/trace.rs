use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::browser::LivePage;
use crate::error::AgentError;
use crate::memory::now_ms;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Start { start_url: String },
    Login { url: String, engine: String, ok: bool },
    Action {
        step: usize,
        action: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_reason: Option<String>,
    },
    Output { text: String },
    End { steps: usize },
}

#[derive(Serialize)]
struct Line<'a> {
    at_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_id: Option<&'a str>,
    #[serde(flatten)]
    event: &'a TraceEvent,
}

/// Per-session trace artifacts: `{name}_trace.jsonl` and `{name}_final.png`.
/// Every write is best effort.
pub struct TraceRecorder {
    dir: PathBuf,
    name: String,
    context_id: Option<String>,
    enabled: bool,
    write_lock: Mutex<()>,
}

impl TraceRecorder {
    pub fn new<P: AsRef<Path>>(
        dir: P,
        session_id: &str,
        context_id: Option<&str>,
        enabled: bool,
    ) -> Self {
        let name = match context_id {
            Some(ctx) => format!("{session_id}_{ctx}"),
            None => session_id.to_string(),
        };
        Self {
            dir: dir.as_ref().to_path_buf(),
            name,
            context_id: context_id.map(str::to_owned),
            enabled,
            write_lock: Mutex::new(()),
        }
    }

    pub fn trace_path(&self) -> PathBuf {
        self.dir.join(format!("{}_trace.jsonl", self.name))
    }

    pub fn screenshot_path(&self) -> PathBuf {
        self.dir.join(format!("{}_final.png", self.name))
    }

    pub async fn record(&self, event: TraceEvent) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.append(&event).await {
            warn!(error = %e, "trace write failed");
        }
    }

    async fn append(&self, event: &TraceEvent) -> Result<(), AgentError> {
        let line = Line {
            at_ms: now_ms(),
            context_id: self.context_id.as_deref(),
            event,
        };
        let mut text =
            serde_json::to_string(&line).map_err(|e| AgentError::Memory(format!("encode: {}", e)))?;
        text.push('\n');
        let _guard = self.write_lock.lock().await;
        async_fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Memory(format!("create_dir: {}", e)))?;
        let mut file = async_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.trace_path())
            .await
            .map_err(|e| AgentError::Memory(format!("open: {}", e)))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| AgentError::Memory(format!("write: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| AgentError::Memory(format!("flush: {}", e)))?;
        Ok(())
    }

    /// Capture the final screenshot. Failures are logged and swallowed.
    pub async fn finish(&self, page: &dyn LivePage) {
        if !self.enabled {
            return;
        }
        let png = match page.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!(error = %e, "final screenshot skipped");
                return;
            }
        };
        let path = self.screenshot_path();
        match async_fs::write(&path, &png).await {
            Ok(()) => info!(path = %path.display(), "trace saved"),
            Err(e) => warn!(error = %e, "final screenshot write failed"),
        }
    }
}

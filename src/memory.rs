use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::AgentError;

/// One executed action as persisted for later replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub session_id: String,
    /// Wire-shaped JSON of the action, unset fields omitted.
    pub action: String,
    pub page_url: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub recorded_at_ms: u128,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub session_id: String,
    pub data: Value,
    pub recorded_at_ms: u128,
}

pub(crate) fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Persistence sink for action logs and extracted data.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append_episodic(&self, record: &EpisodicRecord) -> Result<(), AgentError>;
    async fn append_semantic(&self, session_id: &str, data: &Value) -> Result<(), AgentError>;
    async fn episodic_by_session(&self, session_id: &str)
        -> Result<Vec<EpisodicRecord>, AgentError>;
}

pub struct NullMemoryStore;

#[async_trait]
impl MemoryStore for NullMemoryStore {
    async fn append_episodic(&self, _record: &EpisodicRecord) -> Result<(), AgentError> {
        Ok(())
    }

    async fn append_semantic(&self, _session_id: &str, _data: &Value) -> Result<(), AgentError> {
        Ok(())
    }

    async fn episodic_by_session(
        &self,
        _session_id: &str,
    ) -> Result<Vec<EpisodicRecord>, AgentError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    episodic: Mutex<Vec<EpisodicRecord>>,
    semantic: Mutex<Vec<SemanticRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn semantic(&self) -> Vec<SemanticRecord> {
        self.semantic.lock().await.clone()
    }

    pub async fn episodic(&self) -> Vec<EpisodicRecord> {
        self.episodic.lock().await.clone()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append_episodic(&self, record: &EpisodicRecord) -> Result<(), AgentError> {
        self.episodic.lock().await.push(record.clone());
        Ok(())
    }

    async fn append_semantic(&self, session_id: &str, data: &Value) -> Result<(), AgentError> {
        self.semantic.lock().await.push(SemanticRecord {
            session_id: session_id.to_string(),
            data: data.clone(),
            recorded_at_ms: now_ms(),
        });
        Ok(())
    }

    async fn episodic_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<EpisodicRecord>, AgentError> {
        Ok(self
            .episodic
            .lock()
            .await
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// Two append-only JSON-lines files under one directory.
pub struct JsonlMemoryStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlMemoryStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base_dir: base.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn episodic_path(&self) -> PathBuf {
        self.base_dir.join("episodic.jsonl")
    }

    fn semantic_path(&self) -> PathBuf {
        self.base_dir.join("semantic.jsonl")
    }

    async fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), AgentError> {
        let mut line =
            serde_json::to_string(value).map_err(|e| AgentError::Memory(format!("encode: {}", e)))?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        async_fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| AgentError::Memory(format!("create_dir: {}", e)))?;
        let mut file = async_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| AgentError::Memory(format!("open: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AgentError::Memory(format!("write: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| AgentError::Memory(format!("flush: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for JsonlMemoryStore {
    async fn append_episodic(&self, record: &EpisodicRecord) -> Result<(), AgentError> {
        self.append_line(&self.episodic_path(), record).await
    }

    async fn append_semantic(&self, session_id: &str, data: &Value) -> Result<(), AgentError> {
        let record = SemanticRecord {
            session_id: session_id.to_string(),
            data: data.clone(),
            recorded_at_ms: now_ms(),
        };
        self.append_line(&self.semantic_path(), &record).await
    }

    async fn episodic_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<EpisodicRecord>, AgentError> {
        let raw = match async_fs::read_to_string(self.episodic_path()).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AgentError::Memory(format!("read: {}", e))),
        };
        let mut out = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let record: EpisodicRecord = serde_json::from_str(line)
                .map_err(|e| AgentError::Memory(format!("decode: {}", e)))?;
            if record.session_id == session_id {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(session: &str, action: &str, ok: bool) -> EpisodicRecord {
        EpisodicRecord {
            session_id: session.into(),
            action: action.into(),
            page_url: "https://site.test/".into(),
            succeeded: ok,
            failure_reason: (!ok).then(|| "element not found".to_string()),
            context_id: None,
            recorded_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn in_memory_store_filters_by_session() {
        let store = InMemoryStore::new();
        store.append_episodic(&record("s1", r#"{"reload":true}"#, true)).await.unwrap();
        store.append_episodic(&record("s2", r#"{"go_back":true}"#, false)).await.unwrap();
        store.append_semantic("s1", &json!({"title": "x"})).await.unwrap();

        let s1 = store.episodic_by_session("s1").await.unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].action, r#"{"reload":true}"#);
        assert_eq!(store.semantic().await[0].data, json!({"title": "x"}));
    }

    #[tokio::test]
    async fn jsonl_store_appends_and_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMemoryStore::new(dir.path());
        assert!(store.episodic_by_session("s1").await.unwrap().is_empty());

        store.append_episodic(&record("s1", r#"{"goto":"https://a.test"}"#, true)).await.unwrap();
        store.append_episodic(&record("s2", r#"{"reload":true}"#, true)).await.unwrap();
        store.append_episodic(&record("s1", r##"{"click":"#b"}"##, false)).await.unwrap();
        store.append_semantic("s1", &json!({"k": 1})).await.unwrap();

        let s1 = store.episodic_by_session("s1").await.unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[1].failure_reason.as_deref(), Some("element not found"));

        let semantic = std::fs::read_to_string(dir.path().join("semantic.jsonl")).unwrap();
        assert_eq!(semantic.lines().count(), 1);
    }
}

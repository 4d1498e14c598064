//! Session Management
//!
//! A [`Session`] is the state of one in-flight run: the working context sent
//! to the backend, the compacted transcript that gets persisted, and the audit
//! log of tool invocations. [`SessionStore`] persists what outlives the run.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::message::Message;

/// Audit files allowed per session within one second
const MAX_AUDIT_SUFFIX: usize = 1000;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One audited tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    pub call_id: String,
    pub arguments: String,
    pub result: String,
    pub at: DateTime<Utc>,
}

/// State of a single run
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,

    /// Full working context sent to the backend
    pub messages: Vec<Message>,

    /// Compacted transcript persisted across runs
    pub histories: Vec<Message>,

    /// Audit log of every tool invocation in this run
    pub tools: Vec<ToolRecord>,
}

impl Session {
    /// Seed a run: `system`, then as much of `prior` as fits in
    /// `history_budget` tokens (most recent kept), then the user's input.
    pub fn start(
        id: SessionId,
        system: impl Into<String>,
        prior: Vec<Message>,
        input: impl Into<String>,
        history_budget: u32,
    ) -> Self {
        let input = Message::user(input);

        let mut remaining = history_budget;
        let mut window: Vec<Message> = prior
            .iter()
            .rev()
            .filter(|m| m.is_history_entry())
            .take_while(|m| {
                let cost = m.estimate_tokens();
                if cost > remaining {
                    return false;
                }
                remaining -= cost;
                true
            })
            .cloned()
            .collect();
        window.reverse();

        let mut messages = Vec::with_capacity(window.len() + 2);
        messages.push(Message::system(system));
        messages.extend(window);
        messages.push(input.clone());

        let mut histories = prior;
        histories.push(input);

        Self {
            id,
            messages,
            histories,
            tools: Vec::new(),
        }
    }

    /// Histories with system, tool and tool-call entries removed
    pub fn compacted_history(&self) -> Vec<Message> {
        self.histories
            .iter()
            .filter(|m| m.is_history_entry())
            .cloned()
            .collect()
    }

    pub fn record_tool(
        &mut self,
        name: impl Into<String>,
        call_id: impl Into<String>,
        arguments: impl Into<String>,
        result: impl Into<String>,
    ) {
        self.tools.push(ToolRecord {
            name: name.into(),
            call_id: call_id.into(),
            arguments: arguments.into(),
            result: result.into(),
            at: Utc::now(),
        });
    }
}

/// Persistence for state that outlives a run. Writes are best-effort from the
/// orchestrator's point of view: failures are logged, never fatal.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Compacted transcript, empty when the session is new
    async fn load_history(&self, id: &SessionId) -> Result<Vec<Message>>;

    async fn save_history(&self, id: &SessionId, history: &[Message]) -> Result<()>;

    async fn load_summary(&self, id: &SessionId) -> Result<Option<serde_json::Value>>;

    /// Replace the persisted summary
    async fn save_summary(&self, id: &SessionId, summary: &serde_json::Value) -> Result<()>;

    /// Append-only audit of one run's tool invocations
    async fn save_tool_audit(&self, id: &SessionId, records: &[ToolRecord]) -> Result<()>;
}

/// File-backed store:
///
/// ```text
/// <root>/<session>/history.json
/// <root>/<session>/summary.json
/// <root>/<session>/<YYYY-MM-DD>/<YYYY-MM-DD-HH-MM-SS>[-N].json
/// ```
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load_history(&self, id: &SessionId) -> Result<Vec<Message>> {
        let path = self.session_dir(id).join("history.json");
        Ok(Self::read_json(&path).await?.unwrap_or_default())
    }

    async fn save_history(&self, id: &SessionId, history: &[Message]) -> Result<()> {
        let path = self.session_dir(id).join("history.json");
        Self::write_json(&path, history).await
    }

    async fn load_summary(&self, id: &SessionId) -> Result<Option<serde_json::Value>> {
        let path = self.session_dir(id).join("summary.json");
        Self::read_json(&path).await
    }

    async fn save_summary(&self, id: &SessionId, summary: &serde_json::Value) -> Result<()> {
        let path = self.session_dir(id).join("summary.json");
        Self::write_json(&path, summary).await
    }

    async fn save_tool_audit(&self, id: &SessionId, records: &[ToolRecord]) -> Result<()> {
        let now = Local::now();
        let dir = self.session_dir(id).join(now.format("%Y-%m-%d").to_string());
        let stem = now.format("%Y-%m-%d-%H-%M-%S").to_string();
        tokio::fs::create_dir_all(&dir).await?;
        let data = serde_json::to_vec_pretty(records)?;

        // runs finishing within the same second get a numeric suffix
        for attempt in 0..MAX_AUDIT_SUFFIX {
            let name = match attempt {
                0 => format!("{}.json", stem),
                n => format!("{}-{}.json", stem, n),
            };
            let path = dir.join(name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    tracing::debug!(path = %path.display(), count = records.len(), "writing tool audit");
                    file.write_all(&data).await?;
                    file.flush().await?;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("too many tool audits at {}", stem),
        )
        .into())
    }
}

/// In-memory session store (for development/testing)
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    histories: Mutex<HashMap<SessionId, Vec<Message>>>,
    summaries: Mutex<HashMap<SessionId, serde_json::Value>>,
    audits: Mutex<HashMap<SessionId, Vec<Vec<ToolRecord>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audits saved for a session, one entry per run that used tools
    pub async fn audits(&self, id: &SessionId) -> Vec<Vec<ToolRecord>> {
        self.audits.lock().await.get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_history(&self, id: &SessionId) -> Result<Vec<Message>> {
        Ok(self.histories.lock().await.get(id).cloned().unwrap_or_default())
    }

    async fn save_history(&self, id: &SessionId, history: &[Message]) -> Result<()> {
        self.histories
            .lock()
            .await
            .insert(id.clone(), history.to_vec());
        Ok(())
    }

    async fn load_summary(&self, id: &SessionId) -> Result<Option<serde_json::Value>> {
        Ok(self.summaries.lock().await.get(id).cloned())
    }

    async fn save_summary(&self, id: &SessionId, summary: &serde_json::Value) -> Result<()> {
        self.summaries
            .lock()
            .await
            .insert(id.clone(), summary.clone());
        Ok(())
    }

    async fn save_tool_audit(&self, id: &SessionId, records: &[ToolRecord]) -> Result<()> {
        self.audits
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .push(records.to_vec());
        Ok(())
    }
}

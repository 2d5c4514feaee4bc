//! Session records and their on-disk history files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lf_domain::paths::safe_join;
use lf_domain::stream::ChatMessage;
use lf_domain::{Error, Result};

/// Compute the registry key for a session.
pub fn session_key(namespace: &str, project: &str, session_id: &str) -> String {
    format!("{namespace}:{project}:{session_id}")
}

/// Conversation state carried across turns: the history plus the active
/// model selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentState {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Config name of the model this session is pinned to, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A single tracked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub namespace: String,
    pub project: String,
    pub session_id: String,
    pub agent_state: AgentState,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub request_count: u64,
}

impl SessionRecord {
    pub fn new(namespace: &str, project: &str, session_id: &str, agent_state: AgentState) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.to_owned(),
            project: project.to_owned(),
            session_id: session_id.to_owned(),
            agent_state,
            created_at: now,
            last_used: now,
            request_count: 0,
        }
    }

    pub fn key(&self) -> String {
        session_key(&self.namespace, &self.project, &self.session_id)
    }
}

/// Persists per-session history under
/// `<project_dir>/sessions/<session_id>/history.json`.
#[derive(Debug)]
pub struct HistoryStore {
    project_dir: PathBuf,
}

impl HistoryStore {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.project_dir.join("sessions")
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        safe_join(&self.sessions_dir(), session_id)
    }

    /// Write the session's history file, creating the directory as needed.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let dir = self.session_dir(&record.session_id)?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("history.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
        Ok(())
    }

    /// Load a session record from disk, if present.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let dir = self.session_dir(session_id)?;
        let path = dir.join("history.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a session's directory.
    pub fn remove(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate an externally-supplied session id before using it in a
    /// path.
    pub fn validate_session_id(&self, session_id: &str) -> Result<()> {
        if session_id.is_empty() {
            return Err(Error::InvalidArgument("session id must not be empty".into()));
        }
        self.session_dir(session_id).map(|_| ())
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_format() {
        assert_eq!(session_key("default", "demo", "abc"), "default:demo:abc");
    }

    #[test]
    fn history_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path());

        let mut record = SessionRecord::new("default", "demo", "s1", AgentState::default());
        record.agent_state.history.push(ChatMessage::user("hello"));
        record.request_count = 3;
        store.save(&record).unwrap();

        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.request_count, 3);
        assert_eq!(loaded.agent_state.history.len(), 1);
        assert_eq!(loaded.agent_state.history[0].content, "hello");

        assert!(tmp
            .path()
            .join("sessions")
            .join("s1")
            .join("history.json")
            .exists());
    }

    #[test]
    fn load_missing_session_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path());
        assert!(store.load("ghost").unwrap().is_none());
    }

    #[test]
    fn remove_deletes_directory() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path());
        let record = SessionRecord::new("default", "demo", "s1", AgentState::default());
        store.save(&record).unwrap();

        store.remove("s1").unwrap();
        assert!(!tmp.path().join("sessions").join("s1").exists());
        // Idempotent.
        store.remove("s1").unwrap();
    }

    #[test]
    fn traversal_session_ids_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path());
        assert!(store.load("../escape").is_err());
        assert!(store.validate_session_id("..").is_err());
        assert!(store.validate_session_id("").is_err());
    }
}

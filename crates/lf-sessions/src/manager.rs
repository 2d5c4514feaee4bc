//! Process-wide session registry.
//!
//! The registry map is guarded by one short-held lock (high read, low
//! write).  Conversation history is mutated outside that lock: within a
//! session, turns are serialised by a per-session turn lock, and across
//! sessions there is no ordering.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::session::{session_key, AgentState, HistoryStore, SessionRecord};
use lf_domain::Result;

/// Registry of live sessions for one server process.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    /// Per-session turn locks: one request at a time per session.
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Locate or create a session.  With no `session_id` a fresh UUID is
    /// minted.  `factory` builds the agent state for new sessions (and for
    /// known ids with no in-memory record and no history on disk).
    ///
    /// Returns `(session_id, record, is_new)`.
    pub fn get_or_create<F>(
        &self,
        history: &HistoryStore,
        namespace: &str,
        project: &str,
        session_id: Option<&str>,
        factory: F,
    ) -> Result<(String, SessionRecord, bool)>
    where
        F: FnOnce() -> AgentState,
    {
        let session_id = match session_id {
            Some(id) => {
                history.validate_session_id(id)?;
                id.to_owned()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let key = session_key(namespace, project, &session_id);

        // Fast path: already registered.
        {
            let sessions = self.sessions.lock();
            if let Some(record) = sessions.get(&key) {
                return Ok((session_id, record.clone(), false));
            }
        }

        // Fall back to disk (a restart may have dropped the map), then to
        // the factory.
        let (record, is_new) = match history.load(&session_id)? {
            Some(record) => (record, false),
            None => (
                SessionRecord::new(namespace, project, &session_id, factory()),
                true,
            ),
        };

        let mut sessions = self.sessions.lock();
        let record = sessions.entry(key).or_insert(record).clone();
        if is_new {
            tracing::info!(
                namespace,
                project,
                session_id = %session_id,
                "session created"
            );
            history.save(&record)?;
        }
        Ok((session_id, record, is_new))
    }

    /// Acquire the turn lock for a session.  Holding the guard serialises
    /// requests within the session; drop it when the turn finishes.
    pub async fn acquire_turn(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.turn_locks.lock();
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Replace a session record after a turn: bumps usage counters and
    /// persists the history.
    pub fn commit_turn(
        &self,
        history: &HistoryStore,
        mut record: SessionRecord,
    ) -> Result<SessionRecord> {
        record.last_used = Utc::now();
        record.request_count += 1;
        history.save(&record)?;
        self.sessions
            .lock()
            .insert(record.key(), record.clone());
        Ok(record)
    }

    pub fn get(&self, namespace: &str, project: &str, session_id: &str) -> Option<SessionRecord> {
        let key = session_key(namespace, project, session_id);
        self.sessions.lock().get(&key).cloned()
    }

    /// All sessions of one project.
    pub fn list(&self, namespace: &str, project: &str) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .sessions
            .lock()
            .values()
            .filter(|r| r.namespace == namespace && r.project == project)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        records
    }

    /// Remove every session of a project (on project delete), including the
    /// on-disk session directories.  Matching is by record fields, not by
    /// key-prefix string comparison, so `ns:pro` never sweeps `ns:project`.
    pub fn evict_project(&self, history: &HistoryStore, namespace: &str, project: &str) -> usize {
        let removed: Vec<SessionRecord> = {
            let mut sessions = self.sessions.lock();
            let keys: Vec<String> = sessions
                .values()
                .filter(|r| r.namespace == namespace && r.project == project)
                .map(SessionRecord::key)
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };

        {
            let mut locks = self.turn_locks.lock();
            for record in &removed {
                locks.remove(&record.key());
            }
        }

        for record in &removed {
            if let Err(e) = history.remove(&record.session_id) {
                tracing::warn!(
                    session_id = %record.session_id,
                    error = %e,
                    "failed to remove session directory"
                );
            }
        }

        tracing::info!(namespace, project, count = removed.len(), "sessions evicted");
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! Task records and the in-memory store.
//!
//! Records walk `pending → started → {success | failure | revoked}`.  Once
//! terminal a record is immutable; the store's `update` enforces this so a
//! late-finishing worker cannot overwrite a revocation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    /// Task name, e.g. `rag.ingest_file` or `dataset.process`.
    pub name: String,
    pub state: TaskState,
    /// Submitter-supplied metadata (dataset name, file hash, …).
    #[serde(default)]
    pub meta: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full error chain for operator diagnostics; never sent to clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Child task ids, for group tasks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Uuid>,
}

impl TaskRecord {
    pub fn new(name: impl Into<String>, meta: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            state: TaskState::Pending,
            meta,
            result: None,
            error: None,
            traceback: None,
            submitted_at: Utc::now(),
            completed_at: None,
            children: Vec::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory task record store.  The broker is its sole writer; handlers
/// hold only task ids.
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: TaskRecord) -> Uuid {
        let id = record.task_id;
        self.tasks.write().insert(id, record);
        id
    }

    pub fn get(&self, task_id: &Uuid) -> Option<TaskRecord> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Apply `f` to a non-terminal record.  Returns false when the record is
    /// missing or already terminal (terminal records are immutable).
    pub fn update<F>(&self, task_id: &Uuid, f: F) -> bool
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(task_id) {
            Some(record) if !record.state.is_terminal() => {
                f(record);
                true
            }
            _ => false,
        }
    }

    /// Transition a non-terminal record to `revoked`.  Returns false when
    /// missing or already terminal.
    pub fn revoke(&self, task_id: &Uuid) -> bool {
        self.update(task_id, |record| {
            record.state = TaskState::Revoked;
            record.completed_at = Some(Utc::now());
        })
    }

    /// Number of records currently in `pending`.
    pub fn pending_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .count()
    }

    /// Remove terminal records older than `older_than`, to bound memory.
    pub fn evict_terminal(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        let mut tasks = self.tasks.write();
        tasks.retain(|_, t| {
            !t.state.is_terminal() || t.completed_at.map_or(true, |ts| ts > cutoff)
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

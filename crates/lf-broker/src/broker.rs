//! The task broker: accepts work from synchronous submitters, runs it on a
//! bounded worker pool, and exposes progress to async pollers.
//!
//! Polling never blocks the scheduler: [`TaskBroker::wait_async`] suspends
//! via `tokio::time::sleep` between checks.  Blocking sleep in a request
//! path stalls the event loop and is forbidden throughout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::task::{TaskRecord, TaskState, TaskStore};
use lf_domain::{Error, Result};

/// Context handed to every job; jobs poll `cancel` at safe stopping points.
#[derive(Clone)]
pub struct JobContext {
    pub task_id: Uuid,
    pub cancel: CancelToken,
}

/// Outcome of [`TaskBroker::wait_async`].
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    pub state: TaskState,
    pub record: TaskRecord,
}

pub struct TaskBroker {
    store: Arc<TaskStore>,
    /// Bounds concurrently-running jobs; queued jobs hold only a record.
    workers: Arc<Semaphore>,
    /// Cancel tokens for jobs that have been spawned and not yet finished.
    tokens: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
}

impl TaskBroker {
    pub fn new(worker_count: usize) -> Self {
        Self {
            store: Arc::new(TaskStore::new()),
            workers: Arc::new(Semaphore::new(worker_count.clamp(1, 64))),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Number of submitted-but-not-started tasks.
    pub fn queue_depth(&self) -> usize {
        self.store.pending_count()
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Enqueue a job and return its task id immediately.
    ///
    /// The job runs on the worker pool.  A job observing its context's
    /// cancel token should return early; the revoked state set by `revoke`
    /// wins over whatever the job returns afterwards.
    pub fn submit<F, Fut>(&self, name: &str, meta: serde_json::Value, job: F) -> Uuid
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let record = TaskRecord::new(name, meta);
        let task_id = self.store.insert(record);
        let token = CancelToken::new();
        self.tokens.lock().insert(task_id, token.clone());

        let store = self.store.clone();
        let workers = self.workers.clone();
        let tokens = self.tokens.clone();
        let name = name.to_owned();

        let span = tracing::info_span!("task_worker", %task_id, task = %name);
        tokio::spawn(tracing::Instrument::instrument(
            async move {
                let _permit = match workers.acquire().await {
                    Ok(p) => p,
                    Err(_) => return, // pool shut down
                };

                // Revoked while queued: do not execute.
                match store.get(&task_id) {
                    Some(r) if r.state == TaskState::Revoked => {
                        tokens.lock().remove(&task_id);
                        return;
                    }
                    Some(_) => {}
                    None => {
                        tokens.lock().remove(&task_id);
                        return;
                    }
                }

                store.update(&task_id, |r| r.state = TaskState::Started);

                let ctx = JobContext {
                    task_id,
                    cancel: token.clone(),
                };
                let outcome = job(ctx).await;

                // A revocation that landed mid-flight keeps its terminal
                // state; `update` refuses to touch terminal records.
                match outcome {
                    Ok(value) => {
                        store.update(&task_id, |r| {
                            r.state = TaskState::Success;
                            r.result = Some(value);
                            r.completed_at = Some(chrono::Utc::now());
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "task failed");
                        store.update(&task_id, |r| {
                            r.state = TaskState::Failure;
                            r.error = Some(e.to_string());
                            r.traceback = Some(format!("{e:?}"));
                            r.completed_at = Some(chrono::Utc::now());
                        });
                    }
                }

                tokens.lock().remove(&task_id);
            },
            span,
        ));

        task_id
    }

    /// Enqueue a set of child jobs as a group.  The returned group id
    /// behaves like a task id whose result is the ordered list of child
    /// results; the group succeeds iff every child succeeds.
    pub fn submit_group<F, Fut>(
        &self,
        name: &str,
        meta: serde_json::Value,
        jobs: Vec<(serde_json::Value, F)>,
    ) -> Uuid
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let child_name = format!("{name}.child");
        let children: Vec<Uuid> = jobs
            .into_iter()
            .map(|(child_meta, job)| self.submit(&child_name, child_meta, job))
            .collect();

        let mut record = TaskRecord::new(name, meta);
        record.children = children;
        self.store.insert(record)
    }

    // ── Polling ─────────────────────────────────────────────────────

    /// Non-blocking state read.  Group states are derived from the children.
    pub fn status(&self, task_id: &Uuid) -> Option<TaskState> {
        let record = self.store.get(task_id)?;
        if record.is_group() {
            Some(self.derive_group_state(&record))
        } else {
            Some(record.state)
        }
    }

    /// Full record read; group records get their derived state and, once
    /// terminal, the ordered child results.
    pub fn get(&self, task_id: &Uuid) -> Option<TaskRecord> {
        let mut record = self.store.get(task_id)?;
        if record.is_group() {
            let state = self.derive_group_state(&record);
            record.state = state;
            if state.is_terminal() {
                let results: Vec<serde_json::Value> = record
                    .children
                    .iter()
                    .map(|child| {
                        self.store
                            .get(child)
                            .and_then(|c| c.result)
                            .unwrap_or(serde_json::Value::Null)
                    })
                    .collect();
                record.result = Some(serde_json::Value::Array(results));
            }
        }
        Some(record)
    }

    /// Non-blocking result read; only valid once terminal.
    pub fn result(&self, task_id: &Uuid) -> Result<serde_json::Value> {
        let record = self
            .get(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        match record.state {
            TaskState::Success => Ok(record.result.unwrap_or(serde_json::Value::Null)),
            TaskState::Failure => Err(Error::Internal(
                record.error.unwrap_or_else(|| "task failed".into()),
            )),
            TaskState::Revoked => Err(Error::InvalidArgument("task was revoked".into())),
            TaskState::Pending | TaskState::Started => Err(Error::InvalidArgument(
                "task is not terminal; poll status first".into(),
            )),
        }
    }

    /// Poll until the task is terminal or the budget runs out.  Suspends via
    /// the scheduler's sleep between checks; never blocks the thread.
    pub async fn wait_async(
        &self,
        task_id: &Uuid,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<WaitOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self
                .get(task_id)
                .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
            if record.state.is_terminal() {
                return Ok(WaitOutcome {
                    state: record.state,
                    record,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "task {task_id} still {:?} after {timeout:?}",
                    record.state
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // ── Revocation ──────────────────────────────────────────────────

    /// Transition a non-terminal task to revoked and signal its cancel
    /// token.  For a group, every child is revoked too.  Returns true if
    /// any state changed.
    pub fn revoke(&self, task_id: &Uuid) -> bool {
        let Some(record) = self.store.get(task_id) else {
            return false;
        };

        let mut changed = self.store.revoke(task_id);
        if let Some(token) = self.tokens.lock().get(task_id) {
            token.cancel();
        }

        for child in &record.children {
            if self.store.revoke(child) {
                changed = true;
            }
            if let Some(token) = self.tokens.lock().get(child) {
                token.cancel();
            }
        }
        changed
    }

    /// Child tasks of a revoked group that completed successfully, in
    /// submission order.  Post-revocation cleanup (deleting chunks an
    /// already-finished ingestion wrote) starts from this list.
    pub fn successful_children(&self, group_id: &Uuid) -> Vec<TaskRecord> {
        let Some(group) = self.store.get(group_id) else {
            return Vec::new();
        };
        group
            .children
            .iter()
            .filter_map(|id| self.store.get(id))
            .filter(|r| r.state == TaskState::Success)
            .collect()
    }

    fn derive_group_state(&self, group: &TaskRecord) -> TaskState {
        if group.state == TaskState::Revoked {
            return TaskState::Revoked;
        }

        let mut any_started = false;
        let mut any_failure = false;
        let mut any_revoked = false;
        for child in &group.children {
            match self.store.get(child).map(|c| c.state) {
                Some(TaskState::Pending) | None => return TaskState::Pending,
                Some(TaskState::Started) => any_started = true,
                Some(TaskState::Failure) => any_failure = true,
                Some(TaskState::Revoked) => any_revoked = true,
                Some(TaskState::Success) => {}
            }
        }
        if any_started {
            return TaskState::Started;
        }
        if any_revoked {
            return TaskState::Revoked;
        }
        if any_failure {
            return TaskState::Failure;
        }
        TaskState::Success
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! Append-only per-project event log with sub-event timings.
//!
//! Events are stored one JSON file per event under the project's
//! `event_logs/` directory; writes are serialised per project.  Ids look
//! like `evt_inference_20251029_221203_cd62dc`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use lf_domain::paths::safe_join;
use lf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A timed step inside an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubEvent {
    pub timestamp: DateTime<Utc>,
    pub event_name: String,
    /// Milliseconds since the event started.
    pub duration_ms_from_start: f64,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Completed,
    Failed,
}

/// A finished event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub project: String,
    pub config_hash: String,
    #[serde(default)]
    pub events: Vec<SubEvent>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub total_elapsed_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_token_ms: Option<f64>,
}

/// Query filters for listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_limit() -> usize {
    10
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates sub-events for a request in flight, then finishes into a
/// record.
pub struct EventBuilder {
    event_id: String,
    event_type: String,
    request_id: String,
    namespace: String,
    project: String,
    config_hash: String,
    started: Instant,
    timestamp: DateTime<Utc>,
    sub_events: Vec<SubEvent>,
    metadata: serde_json::Value,
    time_to_first_token_ms: Option<f64>,
}

impl EventBuilder {
    pub fn new(
        event_type: &str,
        request_id: &str,
        namespace: &str,
        project: &str,
        config_hash: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: event_id(event_type, now),
            event_type: event_type.to_owned(),
            request_id: request_id.to_owned(),
            namespace: namespace.to_owned(),
            project: project.to_owned(),
            config_hash: config_hash.to_owned(),
            started: Instant::now(),
            timestamp: now,
            sub_events: Vec::new(),
            metadata: serde_json::Value::Null,
            time_to_first_token_ms: None,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Record a timed step.
    pub fn record(&mut self, event_name: &str, data: serde_json::Value) {
        self.sub_events.push(SubEvent {
            timestamp: Utc::now(),
            event_name: event_name.to_owned(),
            duration_ms_from_start: self.started.elapsed().as_secs_f64() * 1000.0,
            data,
        });
    }

    /// Record the first streamed token, once.
    pub fn first_token(&mut self) {
        if self.time_to_first_token_ms.is_none() {
            self.time_to_first_token_ms = Some(self.started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    pub fn metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = metadata;
    }

    pub fn finish(self, status: EventStatus, error: Option<String>) -> EventRecord {
        EventRecord {
            event_id: self.event_id,
            event_type: self.event_type,
            request_id: self.request_id,
            timestamp: self.timestamp,
            namespace: self.namespace,
            project: self.project,
            config_hash: self.config_hash,
            events: self.sub_events,
            status,
            error,
            metadata: self.metadata,
            total_elapsed_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            time_to_first_token_ms: self.time_to_first_token_ms,
        }
    }
}

fn event_id(event_type: &str, now: DateTime<Utc>) -> String {
    let rand = &uuid::Uuid::new_v4().simple().to_string()[..6];
    format!(
        "evt_{event_type}_{}_{rand}",
        now.format("%Y%m%d_%H%M%S")
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only event log rooted at the data root; per-project writes are
/// serialised.
pub struct EventLog {
    data_root: PathBuf,
    /// project key → write lock.
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventLog {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn project_log_dir(&self, namespace: &str, project: &str) -> Result<PathBuf> {
        let ns_dir = safe_join(&self.data_root, namespace)?;
        let project_dir = safe_join(&ns_dir, project)?;
        Ok(project_dir.join("event_logs"))
    }

    fn write_lock(&self, namespace: &str, project: &str) -> Arc<Mutex<()>> {
        let key = format!("{namespace}/{project}");
        self.write_locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append a finished record.  Records are immutable once written.
    pub fn append(&self, record: &EventRecord) -> Result<()> {
        let dir = self.project_log_dir(&record.namespace, &record.project)?;
        let lock = self.write_lock(&record.namespace, &record.project);
        let _guard = lock.lock();

        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", record.event_id));
        if path.exists() {
            return Err(Error::Conflict(format!(
                "event {} already recorded",
                record.event_id
            )));
        }
        std::fs::write(&path, serde_json::to_vec_pretty(record)?)?;
        Ok(())
    }

    /// List events reverse-chronologically with filters and pagination.
    /// Returns `(items, total_matching)`.
    pub fn list(
        &self,
        namespace: &str,
        project: &str,
        query: &EventQuery,
    ) -> Result<(Vec<EventRecord>, usize)> {
        let dir = self.project_log_dir(namespace, project)?;
        let mut records: Vec<EventRecord> = Vec::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), 0));
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let raw = std::fs::read_to_string(entry.path())?;
            match serde_json::from_str::<EventRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e,
                        "skipping malformed event record");
                }
            }
        }

        records.retain(|r| {
            query
                .event_type
                .as_deref()
                .map_or(true, |t| r.event_type == t)
                && query.start_time.map_or(true, |t| r.timestamp >= t)
                && query.end_time.map_or(true, |t| r.timestamp <= t)
        });
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = records.len();
        let page = records
            .into_iter()
            .skip(query.offset)
            .take(query.limit.clamp(1, 100))
            .collect();
        Ok((page, total))
    }

    /// Fetch one event by id.
    pub fn get(&self, namespace: &str, project: &str, event_id: &str) -> Result<Option<EventRecord>> {
        let dir = self.project_log_dir(namespace, project)?;
        let path = safe_join(&dir, &format!("{event_id}.json"))?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn finished(event_type: &str, ns: &str, project: &str) -> EventRecord {
        let mut builder = EventBuilder::new(event_type, "req-1", ns, project, "cfg123");
        builder.record("model_loaded", serde_json::json!({"model": "m"}));
        builder.record("generation_done", serde_json::json!({"tokens": 42}));
        builder.finish(EventStatus::Completed, None)
    }

    #[test]
    fn event_id_shape() {
        let record = finished("inference", "default", "demo");
        let parts: Vec<&str> = record.event_id.split('_').collect();
        assert_eq!(parts[0], "evt");
        assert_eq!(parts[1], "inference");
        assert_eq!(parts[2].len(), 8); // yyyymmdd
        assert_eq!(parts[3].len(), 6); // hhmmss
        assert_eq!(parts[4].len(), 6); // random suffix
    }

    #[test]
    fn sub_events_are_ordered_with_durations() {
        let record = finished("inference", "default", "demo");
        assert_eq!(record.events.len(), 2);
        assert_eq!(record.events[0].event_name, "model_loaded");
        assert!(record.events[0].duration_ms_from_start <= record.events[1].duration_ms_from_start);
        assert!(record.total_elapsed_ms >= record.events[1].duration_ms_from_start);
    }

    #[test]
    fn first_token_records_once() {
        let mut builder = EventBuilder::new("inference", "r", "ns", "p", "c");
        builder.first_token();
        let first = builder.time_to_first_token_ms;
        std::thread::sleep(std::time::Duration::from_millis(10));
        builder.first_token();
        assert_eq!(builder.time_to_first_token_ms, first);
    }

    #[test]
    fn append_and_get_round_trip() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        let record = finished("inference", "default", "demo");
        log.append(&record).unwrap();

        let fetched = log.get("default", "demo", &record.event_id).unwrap().unwrap();
        assert_eq!(fetched.event_id, record.event_id);
        assert_eq!(fetched.events.len(), 2);
        assert_eq!(fetched.config_hash, "cfg123");
    }

    #[test]
    fn duplicate_append_conflicts() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        let record = finished("inference", "default", "demo");
        log.append(&record).unwrap();
        let err = log.append(&record).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::Conflict);
    }

    #[test]
    fn get_unknown_event_is_none() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        assert!(log.get("default", "demo", "evt_x_1_2_3").unwrap().is_none());
    }

    #[test]
    fn list_filters_and_paginates() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        for _ in 0..3 {
            log.append(&finished("inference", "default", "demo")).unwrap();
        }
        log.append(&finished("rag_processing", "default", "demo")).unwrap();

        let (all, total) = log
            .list("default", "demo", &EventQuery { limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(all.len(), 4);

        let (typed, typed_total) = log
            .list(
                "default",
                "demo",
                &EventQuery {
                    event_type: Some("inference".into()),
                    limit: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(typed_total, 3);
        assert_eq!(typed.len(), 2);
        assert!(typed.iter().all(|r| r.event_type == "inference"));

        let (page2, _) = log
            .list(
                "default",
                "demo",
                &EventQuery {
                    event_type: Some("inference".into()),
                    limit: 2,
                    offset: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page2.len(), 1);
    }

    #[test]
    fn list_is_reverse_chronological() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        for _ in 0..3 {
            log.append(&finished("inference", "default", "demo")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (items, _) = log
            .list("default", "demo", &EventQuery { limit: 10, ..Default::default() })
            .unwrap();
        for pair in items.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn empty_project_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        let (items, total) = log
            .list("default", "ghost", &EventQuery { limit: 10, ..Default::default() })
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn time_window_filters() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        log.append(&finished("inference", "default", "demo")).unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        let (items, total) = log
            .list(
                "default",
                "demo",
                &EventQuery {
                    start_time: Some(future),
                    limit: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }
}

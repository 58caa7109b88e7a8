//! Append-only remote document sinks.
//!
//! The tracker only ever appends: no reads, updates or deletes. Every sink
//! stamps a server-side `createdAt` on the stored document.
//!
//! - `JsonlSink`: one JSON-lines file per collection.
//! - `LogSink`: logs documents via `tracing`.
//! - `InMemorySink`: keeps documents in memory, with failure and latency
//!   injection for tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{SinkError, SinkResult};
use crate::event::iso_millis;
use crate::session::random_base36;

pub const SESSIONS_COLLECTION: &str = "sessions";
pub const EVENTS_COLLECTION: &str = "analytics_events";
pub const VISITS_COLLECTION: &str = "user_visits";

/// Id assigned by the sink to a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(pub String);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Append one document to `collection`.
    async fn append(&self, collection: &str, record: Value) -> SinkResult<DocumentId>;
}

fn stamp_created_at(mut record: Value) -> Value {
    if let Value::Object(fields) = &mut record {
        fields.insert(
            "createdAt".to_string(),
            Value::String(iso_millis::format(&Utc::now())),
        );
    }
    record
}

/// Appends documents to `<dir>/<collection>.jsonl`.
///
/// Ids are `<collection>-<run>-<n>`, where `run` is random per sink so
/// ids stay unique across processes appending to the same files.
pub struct JsonlSink {
    dir: PathBuf,
    run: String,
    next_id: AtomicU64,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            run: random_base36(8),
            next_id: AtomicU64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }
}

#[async_trait]
impl RemoteSink for JsonlSink {
    async fn append(&self, collection: &str, record: Value) -> SinkResult<DocumentId> {
        let id = DocumentId(format!(
            "{collection}-{}-{}",
            self.run,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        let mut record = stamp_created_at(record);
        if let Value::Object(fields) = &mut record {
            fields.insert("_id".to_string(), Value::String(id.0.clone()));
        }
        let line = serde_json::to_string(&record).map_err(|e| SinkError::Rejected {
            collection: collection.to_string(),
            message: e.to_string(),
        })?;

        let path = self.collection_path(collection);
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir)
            .map_err(|e| SinkError::Io(format!("failed to create {}: {e}", self.dir.display())))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::Io(format!("failed to open {}: {e}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| SinkError::Io(format!("failed to write {}: {e}", path.display())))?;
        Ok(id)
    }
}

/// Logs every document instead of storing it.
pub struct LogSink {
    next_id: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSink for LogSink {
    async fn append(&self, collection: &str, record: Value) -> SinkResult<DocumentId> {
        let id = DocumentId(format!("log-{}", self.next_id.fetch_add(1, Ordering::Relaxed)));
        let record = stamp_created_at(record);
        tracing::info!(collection, doc_id = %id, document = %record, "remote document");
        Ok(id)
    }
}

type FailureRule = Box<dyn Fn(&str, &Value) -> bool + Send + Sync>;
type DelayRule = Box<dyn Fn(&str, &Value) -> Option<Duration> + Send + Sync>;

/// In-memory sink for tests and dry runs.
pub struct InMemorySink {
    documents: Mutex<Vec<(String, Value)>>,
    calls: AtomicU64,
    fail_when: Mutex<Option<FailureRule>>,
    delay_when: Mutex<Option<DelayRule>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
            fail_when: Mutex::new(None),
            delay_when: Mutex::new(None),
        }
    }

    /// Reject every append for which `rule` returns true.
    pub fn fail_when<F>(&self, rule: F)
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(rule));
    }

    /// Delay appends for which `rule` returns a duration.
    pub fn delay_when<F>(&self, rule: F)
    where
        F: Fn(&str, &Value) -> Option<Duration> + Send + Sync + 'static,
    {
        *self.delay_when.lock() = Some(Box::new(rule));
    }

    /// Stored documents of one collection, in completion order.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.documents
            .lock()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.documents.lock().len()
    }

    /// Number of append calls, including rejected ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSink for InMemorySink {
    async fn append(&self, collection: &str, record: Value) -> SinkResult<DocumentId> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        let delay = self
            .delay_when
            .lock()
            .as_ref()
            .and_then(|rule| rule(collection, &record));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = self
            .fail_when
            .lock()
            .as_ref()
            .map_or(false, |rule| rule(collection, &record));
        if rejected {
            return Err(SinkError::Rejected {
                collection: collection.to_string(),
                message: format!("injected failure on call {call}"),
            });
        }

        self.documents
            .lock()
            .push((collection.to_string(), stamp_created_at(record)));
        Ok(DocumentId(format!("mem-{call}")))
    }
}

//! Write-through to a remote document sink.
//!
//! Every event becomes one append to `analytics_events`, dispatched in the
//! background. Writes are not retried and may complete out of order; the
//! stored `timestamp` is the ordering key. Session start additionally writes
//! the session record and a visit document.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{FlushReport, PersistenceStrategy};
use crate::config::TrackerConfig;
use crate::dispatch::TaskDispatcher;
use crate::event::EventRecord;
use crate::session::{SessionContext, VisitRecord};
use crate::sink::{RemoteSink, EVENTS_COLLECTION, SESSIONS_COLLECTION, VISITS_COLLECTION};
use crate::tracker::EventLog;

/// User-visible save indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Error,
}

/// Drives the save indicator. Every transition bumps a generation counter
/// and a scheduled reset to `Idle` only applies if no other transition
/// happened since it was scheduled.
pub struct SaveStatusIndicator {
    tx: watch::Sender<SaveStatus>,
    generation: AtomicU64,
    saved_reset: Duration,
    error_reset: Duration,
}

impl SaveStatusIndicator {
    pub fn new(saved_reset: Duration, error_reset: Duration) -> Self {
        let (tx, _) = watch::channel(SaveStatus::Idle);
        Self {
            tx,
            generation: AtomicU64::new(0),
            saved_reset,
            error_reset,
        }
    }

    pub fn current(&self) -> SaveStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.tx.subscribe()
    }

    pub fn mark_saving(&self) {
        self.transition(SaveStatus::Saving);
    }

    pub fn mark_saved(self: &Arc<Self>) {
        let generation = self.transition(SaveStatus::Saved);
        self.schedule_reset(generation, self.saved_reset);
    }

    pub fn mark_error(self: &Arc<Self>) {
        let generation = self.transition(SaveStatus::Error);
        self.schedule_reset(generation, self.error_reset);
    }

    fn transition(&self, status: SaveStatus) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|current| {
            generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *current = status;
        });
        generation
    }

    fn schedule_reset(self: &Arc<Self>, generation: u64, after: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let indicator = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep(after).await;
            indicator.tx.send_if_modified(|current| {
                if indicator.generation.load(Ordering::Acquire) == generation {
                    *current = SaveStatus::Idle;
                    true
                } else {
                    false
                }
            });
        });
    }
}

/// Running counters for remote writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub issued: u64,
    pub saved: u64,
    pub failed: u64,
}

#[derive(Default)]
struct WriteCounters {
    issued: AtomicU64,
    saved: AtomicU64,
    failed: AtomicU64,
}

pub struct RemoteWriteThrough {
    sink: Arc<dyn RemoteSink>,
    dispatcher: TaskDispatcher,
    status: Arc<SaveStatusIndicator>,
    counters: Arc<WriteCounters>,
}

impl RemoteWriteThrough {
    pub fn new(sink: Arc<dyn RemoteSink>, config: &TrackerConfig) -> Self {
        Self {
            sink,
            dispatcher: TaskDispatcher::new("remote-write"),
            status: Arc::new(SaveStatusIndicator::new(
                config.saved_status_reset(),
                config.error_status_reset(),
            )),
            counters: Arc::new(WriteCounters::default()),
        }
    }

    pub fn status(&self) -> &Arc<SaveStatusIndicator> {
        &self.status
    }

    pub fn stats(&self) -> WriteStats {
        WriteStats {
            issued: self.counters.issued.load(Ordering::Relaxed),
            saved: self.counters.saved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Issue one background append. Events drive the save indicator;
    /// session and visit documents do not.
    fn write<T: Serialize>(&self, collection: &'static str, document: &T, track_status: bool) {
        let record = match serde_json::to_value(document) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(collection, error = %e, "failed to encode document");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if track_status {
                    self.status.mark_error();
                }
                return;
            }
        };

        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        if track_status {
            self.status.mark_saving();
        }

        let sink = Arc::clone(&self.sink);
        let status = Arc::clone(&self.status);
        let counters = Arc::clone(&self.counters);
        let spawned = self.dispatcher.spawn(async move {
            match sink.append(collection, record).await {
                Ok(id) => {
                    counters.saved.fetch_add(1, Ordering::Relaxed);
                    if track_status {
                        status.mark_saved();
                    }
                    tracing::debug!(collection, doc_id = %id, "document saved");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    if track_status {
                        status.mark_error();
                    }
                    tracing::error!(collection, error = %e, "failed to save document");
                }
            }
        });

        if !spawned {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            if track_status {
                self.status.mark_error();
            }
        }
    }
}

#[async_trait]
impl PersistenceStrategy for RemoteWriteThrough {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn on_session_start(&self, ctx: &SessionContext, visit: &VisitRecord) {
        self.write(SESSIONS_COLLECTION, &ctx.session, false);
        self.write(VISITS_COLLECTION, visit, false);
    }

    fn on_event(&self, _ctx: &SessionContext, event: &EventRecord, _seq: u64, _log: &EventLog) {
        self.write(EVENTS_COLLECTION, event, true);
    }

    async fn on_teardown(&self, ctx: &SessionContext, _log: &EventLog, timeout: Duration) -> FlushReport {
        let drain = self.dispatcher.drain(timeout).await;
        let stats = self.stats();
        tracing::info!(
            session_id = %ctx.session.session_id,
            issued = stats.issued,
            saved = stats.saved,
            failed = stats.failed,
            "remote writes drained"
        );
        FlushReport {
            exported: stats.saved,
            failed: stats.failed,
            drain,
        }
    }
}

//! Periodic cumulative snapshot downloads.
//!
//! Every `batch_size` events, and once at teardown, the whole session so far
//! is serialized into one JSON document and handed to a download target.
//! Snapshots are cumulative: each one is a superset of the previous.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{FlushReport, PersistenceStrategy};
use crate::dispatch::TaskDispatcher;
use crate::download::DownloadTarget;
use crate::event::{iso_millis, EventRecord};
use crate::session::{SessionContext, SessionRecord, VisitRecord};
use crate::tracker::EventLog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub user_session: SessionRecord,
    pub total_events: u64,
    pub analytics: Vec<EventRecord>,
    #[serde(with = "iso_millis")]
    pub exported_at: DateTime<Utc>,
}

impl AnalyticsSnapshot {
    pub fn capture(session: &SessionRecord, log: &EventLog, now: DateTime<Utc>) -> Self {
        let analytics = log.snapshot();
        Self {
            user_session: session.clone(),
            total_events: analytics.len() as u64,
            analytics,
            exported_at: now,
        }
    }
}

/// `analytics_<sessionId>_<millis>.json`
pub fn snapshot_file_name(session_id: &str, now: DateTime<Utc>) -> String {
    format!("analytics_{session_id}_{}.json", now.timestamp_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Batch,
    Teardown,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Batch => "batch",
            FlushReason::Teardown => "teardown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub triggered: u64,
    pub saved: u64,
    pub failed: u64,
}

#[derive(Default)]
struct ExportCounters {
    triggered: AtomicU64,
    saved: AtomicU64,
    failed: AtomicU64,
}

pub struct SnapshotExport {
    target: Arc<dyn DownloadTarget>,
    batch_size: u64,
    dispatcher: TaskDispatcher,
    counters: Arc<ExportCounters>,
}

impl SnapshotExport {
    /// A `batch_size` of 0 disables batch flushes; teardown still flushes.
    pub fn new(target: Arc<dyn DownloadTarget>, batch_size: u64) -> Self {
        Self {
            target,
            batch_size,
            dispatcher: TaskDispatcher::new("snapshot-export"),
            counters: Arc::new(ExportCounters::default()),
        }
    }

    pub fn stats(&self) -> ExportStats {
        ExportStats {
            triggered: self.counters.triggered.load(Ordering::Relaxed),
            saved: self.counters.saved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn is_batch_boundary(&self, seq: u64) -> bool {
        self.batch_size > 0 && seq > 0 && seq % self.batch_size == 0
    }

    /// Serialize now, save in the background.
    fn flush(&self, ctx: &SessionContext, log: &EventLog, reason: FlushReason) {
        let now = Utc::now();
        let snapshot = AnalyticsSnapshot::capture(&ctx.session, log, now);
        let file_name = snapshot_file_name(&ctx.session.session_id, now);
        self.counters.triggered.fetch_add(1, Ordering::Relaxed);

        let contents = match serde_json::to_vec_pretty(&snapshot) {
            Ok(contents) => contents,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(file_name, error = %e, "failed to serialize snapshot");
                return;
            }
        };
        tracing::info!(
            reason = reason.as_str(),
            file_name,
            total_events = snapshot.total_events,
            "exporting analytics snapshot"
        );

        let target = Arc::clone(&self.target);
        let counters = Arc::clone(&self.counters);
        let spawned = self.dispatcher.spawn(async move {
            match target.save(&file_name, contents).await {
                Ok(location) => {
                    counters.saved.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(location, "snapshot saved");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(file_name, error = %e, "failed to save snapshot");
                }
            }
        });
        if !spawned {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl PersistenceStrategy for SnapshotExport {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn on_session_start(&self, _ctx: &SessionContext, _visit: &VisitRecord) {}

    fn on_event(&self, ctx: &SessionContext, _event: &EventRecord, seq: u64, log: &EventLog) {
        if self.is_batch_boundary(seq) {
            self.flush(ctx, log, FlushReason::Batch);
        }
    }

    async fn on_teardown(&self, ctx: &SessionContext, log: &EventLog, timeout: Duration) -> FlushReport {
        self.flush(ctx, log, FlushReason::Teardown);
        let drain = self.dispatcher.drain(timeout).await;
        let stats = self.stats();
        FlushReport {
            exported: stats.saved,
            failed: stats.failed,
            drain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::InMemoryDownloads;
    use crate::error::{ExportError, ExportResult};
    use crate::event::EventPayload;
    use crate::session::tests_support::context;
    use crate::tracker::EventTracker;

    fn search(n: usize) -> EventPayload {
        EventPayload::Search {
            query: format!("query {n}"),
            results_count: n,
        }
    }

    fn parse(contents: &[u8]) -> AnalyticsSnapshot {
        serde_json::from_slice(contents).unwrap()
    }

    #[tokio::test]
    async fn test_flush_every_batch_size_events() {
        let downloads = Arc::new(InMemoryDownloads::new());
        let export = Arc::new(SnapshotExport::new(downloads.clone(), 10));
        let tracker = EventTracker::new(context(), export.clone());

        for n in 1..=9 {
            tracker.record(search(n));
        }
        assert_eq!(export.stats().triggered, 0);

        tracker.record(search(10));
        assert_eq!(export.stats().triggered, 1);

        for n in 11..=30 {
            tracker.record(search(n));
        }
        assert_eq!(export.stats().triggered, 3);

        export.dispatcher.drain(Duration::from_secs(5)).await;
        let files = downloads.files();
        assert_eq!(files.len(), 3);
        let totals: Vec<u64> = files.iter().map(|f| parse(&f.contents).total_events).collect();
        assert_eq!(totals, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_snapshot_contents() {
        let downloads = Arc::new(InMemoryDownloads::new());
        let export = Arc::new(SnapshotExport::new(downloads.clone(), 10));
        let tracker = EventTracker::new(context(), export.clone());
        for n in 1..=3 {
            tracker.record(search(n));
        }

        let report = export
            .on_teardown(tracker.context(), tracker.log(), Duration::from_secs(5))
            .await;
        assert_eq!(report.exported, 1);
        assert_eq!(report.failed, 0);

        let files = downloads.files();
        assert_eq!(files.len(), 1);
        let session_id = &tracker.context().session.session_id;
        assert!(files[0].file_name.starts_with(&format!("analytics_{session_id}_")));
        assert!(files[0].file_name.ends_with(".json"));

        let snapshot = parse(&files[0].contents);
        assert_eq!(snapshot.total_events, snapshot.analytics.len() as u64);
        assert_eq!(snapshot.analytics, tracker.events());
        assert_eq!(&snapshot.user_session, &tracker.context().session);

        let raw: serde_json::Value = serde_json::from_slice(&files[0].contents).unwrap();
        for key in ["userSession", "totalEvents", "analytics", "exportedAt"] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_teardown_on_batch_boundary_still_flushes() {
        let downloads = Arc::new(InMemoryDownloads::new());
        let export = Arc::new(SnapshotExport::new(downloads.clone(), 5));
        let tracker = EventTracker::new(context(), export.clone());
        for n in 1..=5 {
            tracker.record(search(n));
        }
        export
            .on_teardown(tracker.context(), tracker.log(), Duration::from_secs(5))
            .await;
        assert_eq!(downloads.count(), 2);
    }

    struct RejectingTarget;

    #[async_trait]
    impl DownloadTarget for RejectingTarget {
        async fn save(&self, file_name: &str, _contents: Vec<u8>) -> ExportResult<String> {
            Err(ExportError::Rejected {
                file_name: file_name.to_string(),
                message: "downloads blocked".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_rejected_download_is_counted() {
        let export = Arc::new(SnapshotExport::new(Arc::new(RejectingTarget), 2));
        let tracker = EventTracker::new(context(), export.clone());
        tracker.record(search(1));
        tracker.record(search(2));

        let report = export
            .on_teardown(tracker.context(), tracker.log(), Duration::from_secs(5))
            .await;
        assert_eq!(report.exported, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(tracker.event_count(), 2);
    }

    #[test]
    fn test_file_name() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            snapshot_file_name("session_1_abc", now),
            "analytics_session_1_abc_1714521600000.json"
        );
    }
}

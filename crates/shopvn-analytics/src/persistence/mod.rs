//! Persistence strategies: where captured events go besides the in-memory
//! log.
//!
//! Exactly one strategy is active per session. Both are fire-and-forget:
//! `on_event` returns immediately and failures never reach the caller of
//! `EventTracker::record`.

mod remote;
mod snapshot;

pub use remote::{RemoteWriteThrough, SaveStatus, SaveStatusIndicator, WriteStats};
pub use snapshot::{snapshot_file_name, AnalyticsSnapshot, ExportStats, FlushReason, SnapshotExport};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RemoteBackend, StrategyKind, TrackerConfig};
use crate::dispatch::DrainReport;
use crate::download::DirectoryDownloads;
use crate::error::{ExportError, SinkError, TrackingError};
use crate::event::EventRecord;
use crate::session::{SessionContext, VisitRecord};
use crate::sink::{JsonlSink, LogSink, RemoteSink};
use crate::tracker::EventLog;

/// What the strategy managed to persist by the end of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Documents or snapshots confirmed written.
    pub exported: u64,
    pub failed: u64,
    pub drain: DrainReport,
}

#[async_trait]
pub trait PersistenceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once, before the `session_start` event is recorded.
    fn on_session_start(&self, ctx: &SessionContext, visit: &VisitRecord);

    /// Called after `event` was appended to `log` as number `seq`.
    fn on_event(&self, ctx: &SessionContext, event: &EventRecord, seq: u64, log: &EventLog);

    /// Final flush. Waits at most `timeout` for outstanding writes.
    async fn on_teardown(&self, ctx: &SessionContext, log: &EventLog, timeout: Duration) -> FlushReport;
}

/// Build the strategy selected by `config`, backed by the file-based sink
/// or download directory it names.
pub fn strategy_from_config(
    config: &TrackerConfig,
) -> Result<Arc<dyn PersistenceStrategy>, TrackingError> {
    let strategy: Arc<dyn PersistenceStrategy> = match config.strategy {
        StrategyKind::Remote => {
            let sink: Arc<dyn RemoteSink> = match config.remote.backend {
                RemoteBackend::Jsonl => {
                    let dir = &config.remote.sink_dir;
                    ensure_dir(dir).map_err(|e| SinkError::Io(format!("{}: {e}", dir.display())))?;
                    Arc::new(JsonlSink::new(dir))
                }
                RemoteBackend::Log => Arc::new(LogSink::new()),
            };
            Arc::new(RemoteWriteThrough::new(sink, config))
        }
        StrategyKind::Snapshot => {
            let dir = &config.snapshot.download_dir;
            ensure_dir(dir).map_err(|source| ExportError::Io {
                path: dir.clone(),
                source,
            })?;
            Arc::new(SnapshotExport::new(
                Arc::new(DirectoryDownloads::new(dir)),
                config.batch_size,
            ))
        }
    };
    tracing::info!(strategy = strategy.name(), "persistence strategy selected");
    Ok(strategy)
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_config() {
        let root = std::env::temp_dir().join("shopvn-test-strategy-from-config");
        let _ = std::fs::remove_dir_all(&root);

        let mut config = TrackerConfig::default();
        config.remote.sink_dir = root.join("remote");
        config.snapshot.download_dir = root.join("downloads");

        config.strategy = StrategyKind::Snapshot;
        assert_eq!(strategy_from_config(&config).unwrap().name(), "snapshot");
        assert!(root.join("downloads").is_dir());

        config.strategy = StrategyKind::Remote;
        assert_eq!(strategy_from_config(&config).unwrap().name(), "remote");
        assert!(root.join("remote").is_dir());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_log_backend_needs_no_sink_dir() {
        let root = std::env::temp_dir().join("shopvn-test-strategy-log-backend");
        let _ = std::fs::remove_dir_all(&root);

        let mut config = TrackerConfig::default();
        config.strategy = StrategyKind::Remote;
        config.remote.backend = RemoteBackend::Log;
        config.remote.sink_dir = root.join("remote");
        assert_eq!(strategy_from_config(&config).unwrap().name(), "remote");
        assert!(!root.join("remote").exists());
    }

    #[tokio::test]
    async fn test_log_backend_saves_events() {
        use crate::event::EventPayload;
        use crate::session::tests_support::context;
        use crate::tracker::EventTracker;

        let mut config = TrackerConfig::default();
        config.strategy = StrategyKind::Remote;
        config.remote.backend = RemoteBackend::Log;
        let strategy = strategy_from_config(&config).unwrap();
        let tracker = EventTracker::new(context(), strategy.clone());
        tracker.record(EventPayload::CategoryFilter {
            category: "Laptop".into(),
        });

        let report = strategy
            .on_teardown(tracker.context(), tracker.log(), Duration::from_secs(5))
            .await;
        assert_eq!((report.exported, report.failed), (1, 0));
    }

    #[test]
    fn test_unwritable_download_dir() {
        let root = std::env::temp_dir().join("shopvn-test-strategy-blocked");
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let blocker = root.join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut config = TrackerConfig::default();
        config.snapshot.download_dir = blocker.join("downloads");
        let err = strategy_from_config(&config).err().unwrap();
        assert!(matches!(err, TrackingError::Export(ExportError::Io { .. })));

        let _ = std::fs::remove_dir_all(&root);
    }
}

//! Anonymous visitor analytics for the ShopVN storefront.
//!
//! A visitor gets a durable pseudonymous id without logging in: the id is
//! kept in a local key/value store and a cookie, and when both are gone it
//! is re-synthesized from a device fingerprint. Each page load starts a
//! session whose interactions are captured by an `EventTracker` and
//! persisted by one `PersistenceStrategy`: write-through to a remote
//! document sink, or cumulative JSON snapshot downloads.
//!
//! All I/O sits behind traits (`Environment`, `KeyValueStore`, `CookieJar`,
//! `RemoteSink`, `DownloadTarget`) so the pipeline runs unchanged against
//! the in-memory implementations in tests.

pub mod config;
pub mod dispatch;
pub mod download;
pub mod environment;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod identity;
pub mod persistence;
pub mod probe;
pub mod profile;
pub mod session;
pub mod sink;
pub mod storage;
pub mod tracker;

pub use config::{RemoteBackend, StrategyKind, TrackerConfig};
pub use dispatch::{DrainReport, TaskDispatcher};
pub use download::{DirectoryDownloads, DownloadTarget, InMemoryDownloads};
pub use environment::{Environment, HostEnvironment, StaticEnvironment};
pub use error::{ConfigError, ExportError, ProbeError, SinkError, StorageError, TrackingError};
pub use event::{CartLine, EventKind, EventPayload, EventRecord};
pub use fingerprint::{Fingerprint, FingerprintGenerator};
pub use identity::{IdentityResolver, IdentitySource, ResolvedIdentity, UserIdentity};
pub use persistence::{
    strategy_from_config, FlushReport, PersistenceStrategy, RemoteWriteThrough, SaveStatus,
    SnapshotExport,
};
pub use probe::{DeviceInfo, DeviceProbe, DeviceType};
pub use profile::{UserProfile, UserSegment};
pub use session::{
    FixedLocation, LocationProvider, SessionContext, SessionManager, SessionRecord, TeardownReport,
};
pub use sink::{InMemorySink, JsonlSink, LogSink, RemoteSink};
pub use storage::{CookieJar, KeyValueStore, StorageTiers};
pub use tracker::{EventLog, EventTracker};

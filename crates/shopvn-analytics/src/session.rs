//! Session lifecycle: startup, the shared session context, and teardown.
//!
//! `SessionManager::start` runs once per page load. It resolves the visitor
//! identity, counts the visit, builds the [`SessionRecord`] and emits
//! `session_start`. `SessionManager::teardown` is the page-lifecycle hook:
//! it emits `session_end` and drains the persistence strategy.

use chrono::{DateTime, SubsecRound, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::environment::Environment;
use crate::event::{iso_millis, EventPayload};
use crate::fingerprint::{Fingerprint, FingerprintGenerator};
use crate::identity::{IdentityResolver, ResolvedIdentity};
use crate::persistence::{FlushReport, PersistenceStrategy};
use crate::probe::{Browser, DeviceInfo, DeviceProbe, DeviceType};
use crate::profile::{self, UserProfile};
use crate::storage::StorageTiers;
use crate::tracker::EventTracker;

pub const DEFAULT_LOCATION: &str = "Cầu Giấy, Hanoi, VN";

/// Per page-load session metadata. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub device_type: DeviceType,
    pub browser: Browser,
    pub user_agent: String,
    pub screen_resolution: String,
    #[serde(with = "iso_millis")]
    pub start_time: DateTime<Utc>,
    pub location: String,
}

/// Document written to the `user_visits` collection at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub user_id: String,
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub device: DeviceInfo,
    #[serde(with = "iso_millis")]
    pub visit_time: DateTime<Utc>,
    pub url: String,
    pub referrer: String,
}

/// Everything resolved at startup, shared read-only with the tracker and
/// the persistence strategy.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: SessionRecord,
    pub identity: ResolvedIdentity,
    pub device: DeviceInfo,
    pub fingerprint: Fingerprint,
    pub profile: Option<UserProfile>,
}

/// Supplies the coarse location string attached to sessions.
pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> String;
}

/// Always reports the same place.
#[derive(Debug, Clone)]
pub struct FixedLocation(pub String);

impl Default for FixedLocation {
    fn default() -> Self {
        FixedLocation(DEFAULT_LOCATION.to_string())
    }
}

impl LocationProvider for FixedLocation {
    fn locate(&self) -> String {
        self.0.clone()
    }
}

/// `session_<millis>_<9 base-36 chars>`. Process local, unrelated to the
/// persistent identity.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    format!("session_{}_{}", now.timestamp_millis(), random_base36(9))
}

/// `len` random lowercase base-36 characters.
pub(crate) fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Outcome of the teardown hook.
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub duration_secs: f64,
    pub total_events: u64,
    pub flush: FlushReport,
}

pub struct SessionManager {
    context: Arc<SessionContext>,
    tracker: EventTracker,
    strategy: Arc<dyn PersistenceStrategy>,
    teardown_timeout: Duration,
    ended: AtomicBool,
}

impl SessionManager {
    /// Start a session. Never fails: storage problems degrade to an
    /// ephemeral identity and a missing visit profile.
    pub fn start(
        env: &dyn Environment,
        tiers: &StorageTiers,
        strategy: Arc<dyn PersistenceStrategy>,
        config: &TrackerConfig,
        location: &dyn LocationProvider,
    ) -> Self {
        let identity = IdentityResolver::new(tiers, env)
            .with_cookie_ttl_days(config.cookie_ttl_days)
            .resolve_user_id();
        let fingerprint = FingerprintGenerator::generate(env);
        let device = DeviceProbe::device_info(env);

        let profile = match profile::record_visit(
            tiers.local.as_ref(),
            &identity.identity.user_id,
            &fingerprint,
        ) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(error = %e, "failed to update visit profile");
                None
            }
        };

        let now = Utc::now().trunc_subsecs(3);
        let session = SessionRecord {
            session_id: generate_session_id(now),
            user_id: identity.identity.user_id.clone(),
            device_type: device.device_type,
            browser: device.browser,
            user_agent: device.user_agent.clone(),
            screen_resolution: device.screen_resolution.clone(),
            start_time: now,
            location: location.locate(),
        };
        let visit = VisitRecord {
            user_id: identity.identity.user_id.clone(),
            fingerprint: fingerprint.clone(),
            device: device.clone(),
            visit_time: now,
            url: env.page_url(),
            referrer: env.referrer().unwrap_or_else(|| "direct".to_string()),
        };

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            identity_source = ?identity.source,
            segment = profile.as_ref().map(|p| p.segment().as_str()).unwrap_or("unknown"),
            strategy = strategy.name(),
            "session started"
        );

        let context = Arc::new(SessionContext {
            session: session.clone(),
            identity,
            device,
            fingerprint,
            profile,
        });

        strategy.on_session_start(&context, &visit);

        let tracker = EventTracker::new(Arc::clone(&context), Arc::clone(&strategy));
        tracker.record(EventPayload::SessionStart {
            session_data: session,
        });

        Self {
            context,
            tracker,
            strategy,
            teardown_timeout: config.teardown_timeout(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn tracker(&self) -> &EventTracker {
        &self.tracker
    }

    pub fn session_id(&self) -> &str {
        &self.context.session.session_id
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Page teardown: emit `session_end`, then flush and wait for
    /// outstanding writes up to the configured timeout. Only the first
    /// call does anything; later calls return `None`.
    pub async fn teardown(&self) -> Option<TeardownReport> {
        if self.ended.swap(true, Ordering::AcqRel) {
            return None;
        }

        let elapsed = Utc::now() - self.context.session.start_time;
        let duration_secs = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        let total_events = self.tracker.record(EventPayload::SessionEnd {
            duration: duration_secs,
        });

        let flush = self
            .strategy
            .on_teardown(&self.context, self.tracker.log(), self.teardown_timeout)
            .await;

        tracing::info!(
            session_id = %self.context.session.session_id,
            duration_secs,
            total_events,
            exported = flush.exported,
            failed = flush.failed,
            abandoned = flush.drain.abandoned,
            "session ended"
        );

        Some(TeardownReport {
            duration_secs,
            total_events,
            flush,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::InMemoryDownloads;
    use crate::environment::StaticEnvironment;
    use crate::event::EventKind;
    use crate::identity::IdentitySource;
    use crate::persistence::{RemoteWriteThrough, SnapshotExport};
    use crate::profile::UserSegment;
    use crate::sink::{InMemorySink, SESSIONS_COLLECTION, VISITS_COLLECTION};

    fn snapshot_strategy(downloads: &Arc<InMemoryDownloads>) -> Arc<dyn PersistenceStrategy> {
        Arc::new(SnapshotExport::new(downloads.clone(), 10))
    }

    #[test]
    fn test_session_id_format() {
        let now = Utc::now();
        let id = generate_session_id(now);
        let rest = id.strip_prefix("session_").unwrap();
        let (millis, suffix) = rest.split_once('_').unwrap();
        assert_eq!(millis.parse::<i64>().unwrap(), now.timestamp_millis());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_session_id(now), id);
    }

    #[tokio::test]
    async fn test_start_emits_session_start() {
        let env = StaticEnvironment::default();
        let tiers = StorageTiers::in_memory();
        let downloads = Arc::new(InMemoryDownloads::new());
        let manager = SessionManager::start(
            &env,
            &tiers,
            snapshot_strategy(&downloads),
            &TrackerConfig::default(),
            &FixedLocation::default(),
        );

        let events = manager.tracker().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::SessionStart);
        assert_eq!(events[0].session_id, manager.session_id());
        assert_eq!(events[0].location, DEFAULT_LOCATION);
        match &events[0].payload {
            EventPayload::SessionStart { session_data } => {
                assert_eq!(session_data, &manager.context().session);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let ctx = manager.context();
        assert_eq!(ctx.identity.source, IdentitySource::Generated);
        assert_eq!(ctx.session.user_id, ctx.identity.identity.user_id);
        assert_ne!(ctx.session.session_id, ctx.session.user_id);
        assert_eq!(ctx.profile.as_ref().unwrap().segment(), UserSegment::NewUser);
    }

    #[tokio::test]
    async fn test_session_record_survives_serialization() {
        let downloads = Arc::new(InMemoryDownloads::new());
        let manager = SessionManager::start(
            &StaticEnvironment::default(),
            &StorageTiers::in_memory(),
            snapshot_strategy(&downloads),
            &TrackerConfig::default(),
            &FixedLocation::default(),
        );
        let session = &manager.context().session;
        assert_eq!(session.start_time.timestamp_subsec_nanos() % 1_000_000, 0);

        let json = serde_json::to_string(session).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, session);
    }

    #[tokio::test]
    async fn test_identity_and_visits_survive_sessions() {
        let env = StaticEnvironment::default();
        let tiers = StorageTiers::in_memory();
        let config = TrackerConfig::default();
        let downloads = Arc::new(InMemoryDownloads::new());

        let mut user_ids = Vec::new();
        for _ in 0..3 {
            let manager = SessionManager::start(
                &env,
                &tiers,
                snapshot_strategy(&downloads),
                &config,
                &FixedLocation::default(),
            );
            user_ids.push(manager.context().session.user_id.clone());
            manager.teardown().await.unwrap();
        }

        assert!(user_ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            profile::current_segment(tiers.local.as_ref()).unwrap(),
            UserSegment::OccasionalUser
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let env = StaticEnvironment::default();
        let tiers = StorageTiers::in_memory();
        let downloads = Arc::new(InMemoryDownloads::new());
        let manager = SessionManager::start(
            &env,
            &tiers,
            snapshot_strategy(&downloads),
            &TrackerConfig::default(),
            &FixedLocation("Da Nang, VN".into()),
        );

        let report = manager.teardown().await.unwrap();
        assert_eq!(report.total_events, 2);
        assert!(report.duration_secs >= 0.0);
        assert!(manager.is_ended());
        assert!(manager.teardown().await.is_none());

        let events = manager.tracker().events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind(), EventKind::SessionEnd);
        assert_eq!(events[1].location, "Da Nang, VN");
        // The teardown snapshot has been written.
        assert_eq!(downloads.count(), 1);
    }

    #[tokio::test]
    async fn test_remote_strategy_writes_session_and_visit() {
        let mut env = StaticEnvironment::default();
        env.referrer = Some("https://google.com/".into());
        let tiers = StorageTiers::in_memory();
        let sink = Arc::new(InMemorySink::new());
        let strategy: Arc<dyn PersistenceStrategy> =
            Arc::new(RemoteWriteThrough::new(sink.clone(), &TrackerConfig::default()));
        let manager = SessionManager::start(
            &env,
            &tiers,
            strategy,
            &TrackerConfig::default(),
            &FixedLocation::default(),
        );
        manager.teardown().await.unwrap();

        let sessions = sink.documents(SESSIONS_COLLECTION);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["sessionId"], manager.session_id());
        assert!(sessions[0].get("createdAt").is_some());

        let visits = sink.documents(VISITS_COLLECTION);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0]["referrer"], "https://google.com/");
        assert_eq!(visits[0]["browser"], "Chrome");
        assert_eq!(visits[0]["fingerprint"], manager.context().fingerprint.as_str());
    }
}

//! Durable visitor identity without login.
//!
//! Lookup order is local store, then cookie, then a freshly synthesized
//! `user_<fingerprint>_<millis>` id. Whatever is found is written back to
//! the faster tiers so later visits hit tier 1.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::environment::Environment;
use crate::fingerprint::FingerprintGenerator;
use crate::storage::{Cookie, CookieJar, KeyValueStore, StorageTiers};

/// Key (and cookie name) holding the persisted identity.
pub const USER_ID_KEY: &str = "shopvn_user_id";
pub const DEFAULT_COOKIE_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
}

impl UserIdentity {
    pub fn synthesize(fingerprint: &str, created_at_millis: i64) -> Self {
        Self {
            user_id: format!("user_{fingerprint}_{created_at_millis}"),
        }
    }

    /// Split a synthesized id into `(fingerprint, created_at_millis)`.
    /// Returns `None` for ids that do not follow the pattern.
    pub fn parts(&self) -> Option<(&str, i64)> {
        let rest = self.user_id.strip_prefix("user_")?;
        let (fingerprint, millis) = rest.rsplit_once('_')?;
        if fingerprint.is_empty() {
            return None;
        }
        Some((fingerprint, millis.parse().ok()?))
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_id)
    }
}

/// Where the resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    LocalStore,
    Cookie,
    Generated,
    /// Generated but no tier accepted it; valid for this session only.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity: UserIdentity,
    pub source: IdentitySource,
}

pub struct IdentityResolver<'a> {
    tiers: &'a StorageTiers,
    env: &'a dyn Environment,
    cookie_ttl_days: i64,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(tiers: &'a StorageTiers, env: &'a dyn Environment) -> Self {
        Self {
            tiers,
            env,
            cookie_ttl_days: DEFAULT_COOKIE_TTL_DAYS,
        }
    }

    pub fn with_cookie_ttl_days(mut self, days: i64) -> Self {
        self.cookie_ttl_days = days;
        self
    }

    /// Resolve the visitor identity. Tier failures and empty stored values
    /// are treated as misses, so this always yields a non-empty identity.
    pub fn resolve_user_id(&self) -> ResolvedIdentity {
        match self.tiers.local.get(USER_ID_KEY) {
            Ok(Some(user_id)) if !user_id.is_empty() => {
                tracing::info!(user_id = %user_id, "found existing user id in local store");
                return ResolvedIdentity {
                    identity: UserIdentity { user_id },
                    source: IdentitySource::LocalStore,
                };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "local store read failed, trying cookie"),
        }

        match self.tiers.cookies.get(USER_ID_KEY) {
            Ok(Some(user_id)) if !user_id.is_empty() => {
                tracing::info!(user_id = %user_id, "found existing user id in cookie");
                if let Err(e) = self.tiers.local.set(USER_ID_KEY, &user_id) {
                    tracing::warn!(error = %e, "failed to backfill local store from cookie");
                }
                return ResolvedIdentity {
                    identity: UserIdentity { user_id },
                    source: IdentitySource::Cookie,
                };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "cookie read failed, generating new id"),
        }

        let fingerprint = FingerprintGenerator::generate(self.env);
        let now = Utc::now();
        let identity = UserIdentity::synthesize(fingerprint.as_str(), now.timestamp_millis());

        let local_ok = match self.tiers.local.set(USER_ID_KEY, &identity.user_id) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist user id to local store");
                false
            }
        };
        let cookie = Cookie::persistent(USER_ID_KEY, &identity.user_id, self.cookie_ttl_days, now);
        let cookie_ok = match self.tiers.cookies.set(cookie) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist user id cookie");
                false
            }
        };

        let source = if local_ok || cookie_ok {
            IdentitySource::Generated
        } else {
            tracing::warn!(user_id = %identity.user_id, "no storage tier available, identity is session scoped");
            IdentitySource::Ephemeral
        };
        tracing::info!(user_id = %identity.user_id, ?source, "generated new user id");

        ResolvedIdentity { identity, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticEnvironment;
    use crate::error::{StorageError, StorageResult};
    use crate::storage::{CookieJar, KeyValueStore, MemoryStore, StoreCookieJar};
    use std::sync::Arc;

    /// Store whose every operation fails.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn keys(&self) -> StorageResult<Vec<String>> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
    }

    #[test]
    fn test_fresh_environment_generates_and_persists() {
        let tiers = StorageTiers::in_memory();
        let env = StaticEnvironment::default();
        let resolver = IdentityResolver::new(&tiers, &env);

        let first = resolver.resolve_user_id();
        assert_eq!(first.source, IdentitySource::Generated);

        let (fp, ts) = first.identity.parts().expect("synthesized id pattern");
        assert_eq!(fp, FingerprintGenerator::generate(&env).as_str());
        assert!(ts > 0);

        assert_eq!(
            tiers.local.get(USER_ID_KEY).unwrap().as_deref(),
            Some(first.identity.user_id.as_str())
        );
        assert_eq!(
            tiers.cookies.get(USER_ID_KEY).unwrap().as_deref(),
            Some(first.identity.user_id.as_str())
        );

        let second = resolver.resolve_user_id();
        assert_eq!(second.identity, first.identity);
        assert_eq!(second.source, IdentitySource::LocalStore);
    }

    #[test]
    fn test_cookie_hit_backfills_local_store() {
        let tiers = StorageTiers::in_memory();
        tiers
            .cookies
            .set(Cookie::persistent(USER_ID_KEY, "user_abc_123", 365, Utc::now()))
            .unwrap();
        let env = StaticEnvironment::default();

        let resolved = IdentityResolver::new(&tiers, &env).resolve_user_id();
        assert_eq!(resolved.source, IdentitySource::Cookie);
        assert_eq!(resolved.identity.user_id, "user_abc_123");
        assert_eq!(tiers.local.get(USER_ID_KEY).unwrap().as_deref(), Some("user_abc_123"));
    }

    #[test]
    fn test_local_store_wins_over_cookie() {
        let tiers = StorageTiers::in_memory();
        tiers.local.set(USER_ID_KEY, "user_local_1").unwrap();
        tiers
            .cookies
            .set(Cookie::persistent(USER_ID_KEY, "user_cookie_2", 365, Utc::now()))
            .unwrap();
        let env = StaticEnvironment::default();

        let resolved = IdentityResolver::new(&tiers, &env).resolve_user_id();
        assert_eq!(resolved.identity.user_id, "user_local_1");
        assert_eq!(resolved.source, IdentitySource::LocalStore);
    }

    #[test]
    fn test_empty_local_value_is_a_miss() {
        let tiers = StorageTiers::in_memory();
        tiers.local.set(USER_ID_KEY, "").unwrap();
        tiers
            .cookies
            .set(Cookie::persistent(USER_ID_KEY, "user_cookie_7", 365, Utc::now()))
            .unwrap();
        let env = StaticEnvironment::default();

        let resolved = IdentityResolver::new(&tiers, &env).resolve_user_id();
        assert_eq!(resolved.source, IdentitySource::Cookie);
        assert_eq!(resolved.identity.user_id, "user_cookie_7");
        assert_eq!(tiers.local.get(USER_ID_KEY).unwrap().as_deref(), Some("user_cookie_7"));
    }

    #[test]
    fn test_empty_values_in_both_tiers_regenerate() {
        let tiers = StorageTiers::in_memory();
        tiers.local.set(USER_ID_KEY, "").unwrap();
        tiers
            .cookies
            .set(Cookie::persistent(USER_ID_KEY, "", 365, Utc::now()))
            .unwrap();
        let env = StaticEnvironment::default();

        let resolved = IdentityResolver::new(&tiers, &env).resolve_user_id();
        assert_eq!(resolved.source, IdentitySource::Generated);
        assert!(resolved.identity.parts().is_some());
        assert_eq!(
            tiers.cookies.get(USER_ID_KEY).unwrap().as_deref(),
            Some(resolved.identity.user_id.as_str())
        );
    }

    #[test]
    fn test_broken_local_store_falls_through_to_cookie() {
        let cookies: Arc<dyn CookieJar> = Arc::new(StoreCookieJar::in_memory());
        cookies
            .set(Cookie::persistent(USER_ID_KEY, "user_c_9", 365, Utc::now()))
            .unwrap();
        let tiers = StorageTiers::new(Arc::new(BrokenStore), cookies);
        let env = StaticEnvironment::default();

        let resolved = IdentityResolver::new(&tiers, &env).resolve_user_id();
        assert_eq!(resolved.identity.user_id, "user_c_9");
        assert_eq!(resolved.source, IdentitySource::Cookie);
    }

    #[test]
    fn test_partial_tier_failure_still_generated() {
        let tiers = StorageTiers::new(
            Arc::new(BrokenStore),
            Arc::new(StoreCookieJar::in_memory()),
        );
        let env = StaticEnvironment::default();
        let resolver = IdentityResolver::new(&tiers, &env);

        let first = resolver.resolve_user_id();
        assert_eq!(first.source, IdentitySource::Generated);
        // Cookie tier persisted it, so the next call is stable.
        let second = resolver.resolve_user_id();
        assert_eq!(second.identity, first.identity);
        assert_eq!(second.source, IdentitySource::Cookie);
    }

    #[test]
    fn test_all_tiers_broken_gives_ephemeral_identity() {
        let tiers = StorageTiers::new(
            Arc::new(BrokenStore),
            Arc::new(StoreCookieJar::new(Arc::new(BrokenStore))),
        );
        let env = StaticEnvironment::default();

        let resolved = IdentityResolver::new(&tiers, &env).resolve_user_id();
        assert_eq!(resolved.source, IdentitySource::Ephemeral);
        assert!(resolved.identity.parts().is_some());
    }

    #[test]
    fn test_cookie_ttl_is_configurable() {
        let store = Arc::new(MemoryStore::new());
        let tiers = StorageTiers::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StoreCookieJar::new(store.clone())),
        );
        let env = StaticEnvironment::default();
        IdentityResolver::new(&tiers, &env)
            .with_cookie_ttl_days(30)
            .resolve_user_id();

        let raw = store.get(&format!("cookie:{USER_ID_KEY}")).unwrap().unwrap();
        let cookie: Cookie = serde_json::from_str(&raw).unwrap();
        let days = (cookie.expires - Utc::now()).num_days();
        assert!((29..=30).contains(&days), "unexpected ttl {days}");
    }

    #[test]
    fn test_identity_parts() {
        let id = UserIdentity::synthesize("k3j2h1", 1_700_000_000_000);
        assert_eq!(id.user_id, "user_k3j2h1_1700000000000");
        assert_eq!(id.parts(), Some(("k3j2h1", 1_700_000_000_000)));

        let foreign = UserIdentity {
            user_id: "anonymous".into(),
        };
        assert_eq!(foreign.parts(), None);
    }
}

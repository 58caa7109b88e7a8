//! Persisted visit counters and the coarse user segment derived from them.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StorageResult;
use crate::fingerprint::Fingerprint;
use crate::storage::KeyValueStore;

pub const VISIT_COUNT_KEY: &str = "shopvn_visit_count";
pub const FIRST_VISIT_KEY: &str = "shopvn_first_visit";
pub const LAST_VISIT_KEY: &str = "shopvn_last_visit";
pub const FINGERPRINT_KEY: &str = "shopvn_fingerprint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    NewUser,
    OccasionalUser,
    RegularUser,
    PowerUser,
}

impl UserSegment {
    pub fn from_visit_count(count: u64) -> Self {
        match count {
            0..=1 => UserSegment::NewUser,
            2..=5 => UserSegment::OccasionalUser,
            6..=20 => UserSegment::RegularUser,
            _ => UserSegment::PowerUser,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserSegment::NewUser => "new_user",
            UserSegment::OccasionalUser => "occasional_user",
            UserSegment::RegularUser => "regular_user",
            UserSegment::PowerUser => "power_user",
        }
    }
}

impl fmt::Display for UserSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated view of what the local store remembers about this visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub fingerprint: Option<String>,
    pub first_visit: Option<String>,
    pub total_visits: u64,
    pub last_visit: Option<String>,
}

impl UserProfile {
    pub fn segment(&self) -> UserSegment {
        UserSegment::from_visit_count(self.total_visits)
    }
}

fn read_visit_count(store: &dyn KeyValueStore) -> StorageResult<u64> {
    let Some(raw) = store.get(VISIT_COUNT_KEY)? else {
        return Ok(0);
    };
    Ok(raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(value = %raw, "unparsable visit count, treating as 0");
        0
    }))
}

/// Count one visit: bump the counter, set the first visit if missing,
/// refresh the last visit and remember the current fingerprint.
pub fn record_visit(
    store: &dyn KeyValueStore,
    user_id: &str,
    fingerprint: &Fingerprint,
) -> StorageResult<UserProfile> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let total_visits = read_visit_count(store)?.saturating_add(1);
    store.set(VISIT_COUNT_KEY, &total_visits.to_string())?;

    let first_visit = match store.get(FIRST_VISIT_KEY)? {
        Some(first) => first,
        None => {
            store.set(FIRST_VISIT_KEY, &now)?;
            now.clone()
        }
    };
    store.set(LAST_VISIT_KEY, &now)?;
    store.set(FINGERPRINT_KEY, fingerprint.as_str())?;

    let profile = UserProfile {
        user_id: user_id.to_string(),
        fingerprint: Some(fingerprint.to_string()),
        first_visit: Some(first_visit),
        total_visits,
        last_visit: Some(now),
    };
    tracing::debug!(user_id, total_visits, segment = %profile.segment(), "recorded visit");
    Ok(profile)
}

/// Read the profile without counting a visit.
pub fn load_profile(store: &dyn KeyValueStore, user_id: &str) -> StorageResult<UserProfile> {
    Ok(UserProfile {
        user_id: user_id.to_string(),
        fingerprint: store.get(FINGERPRINT_KEY)?,
        first_visit: store.get(FIRST_VISIT_KEY)?,
        total_visits: read_visit_count(store)?,
        last_visit: store.get(LAST_VISIT_KEY)?,
    })
}

pub fn is_returning_user(store: &dyn KeyValueStore) -> StorageResult<bool> {
    Ok(store.get(FIRST_VISIT_KEY)?.is_some())
}

pub fn current_segment(store: &dyn KeyValueStore) -> StorageResult<UserSegment> {
    Ok(UserSegment::from_visit_count(read_visit_count(store)?))
}

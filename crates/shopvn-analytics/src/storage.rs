//! Client-side storage tiers.
//!
//! Two tiers hold the visitor identity: a fast local key/value store (the
//! `localStorage` analogue) and a cookie jar. Both are traits so hosts can
//! plug in their own backends and tests can inject failures.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};

/// String key/value storage that survives across visits.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;

    fn keys(&self) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store backed by a shared `BTreeMap`. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Store persisted as a single JSON object file.
///
/// The whole map is kept in memory and rewritten on every mutation via a
/// temporary file and rename, so a crash never leaves a half-written file.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories. A missing file
    /// is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let data = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), keys = data.len(), "opened file store");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Like [`FileStore::open`], but a corrupt file is moved aside to
    /// `<file>.corrupt-<millis>` and the store starts empty.
    pub fn open_or_recover(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        match Self::open(path.clone()) {
            Err(StorageError::Corrupt { message, .. }) => {
                let mut aside = path.clone().into_os_string();
                aside.push(format!(".corrupt-{}", Utc::now().timestamp_millis()));
                let aside = PathBuf::from(aside);
                fs::rename(&path, &aside).map_err(|source| StorageError::Io {
                    path: path.clone(),
                    source,
                })?;
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %message,
                    "corrupt storage file moved aside, starting empty"
                );
                Self::open(path)
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(data).map_err(|source| StorageError::Encode {
            key: "*".to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("tmp");
        let io_err = |source| StorageError::Io {
            path: tmp.clone(),
            source,
        };
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        let previous = data.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&data) {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(v) => data.insert(key.to_string(), v),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        if let Some(previous) = data.remove(key) {
            if let Err(e) = self.persist(&data) {
                data.insert(key.to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: DateTime<Utc>,
    pub path: String,
    pub same_site: SameSite,
}

impl Cookie {
    /// Root-scoped, same-site strict cookie living `ttl_days` from `now`.
    pub fn persistent(
        name: impl Into<String>,
        value: impl Into<String>,
        ttl_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: now + Duration::days(ttl_days),
            path: "/".to_string(),
            same_site: SameSite::Strict,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// `name=value;expires=<HTTP date>;path=/;SameSite=Strict`
    pub fn to_header_value(&self) -> String {
        format!(
            "{}={};expires={};path={};SameSite={:?}",
            self.name,
            self.value,
            self.expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.path,
            self.same_site
        )
    }
}

/// Look up `name` in a `document.cookie` style header (`a=1; b=2`).
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let pair = pair.trim_start_matches(' ');
        pair.strip_prefix(name)?.strip_prefix('=')
    })
}

pub trait CookieJar: Send + Sync {
    /// Value of a live cookie. Expired cookies read as absent.
    fn get(&self, name: &str) -> StorageResult<Option<String>>;

    fn set(&self, cookie: Cookie) -> StorageResult<()>;

    /// Live cookies rendered as a `document.cookie` style header.
    fn header(&self) -> StorageResult<String>;
}

const COOKIE_KEY_PREFIX: &str = "cookie:";

pub const LOCAL_STORAGE_FILE: &str = "local_storage.json";
pub const COOKIES_FILE: &str = "cookies.json";

/// Cookie jar persisted inside any [`KeyValueStore`].
pub struct StoreCookieJar {
    store: Arc<dyn KeyValueStore>,
}

impl StoreCookieJar {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Jar with its own private in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn load(&self, name: &str) -> StorageResult<Option<Cookie>> {
        let Some(raw) = self.store.get(&format!("{COOKIE_KEY_PREFIX}{name}"))? else {
            return Ok(None);
        };
        match serde_json::from_str::<Cookie>(&raw) {
            Ok(cookie) => Ok(Some(cookie)),
            Err(e) => {
                tracing::warn!(cookie = name, error = %e, "dropping unreadable cookie");
                Ok(None)
            }
        }
    }
}

impl CookieJar for StoreCookieJar {
    fn get(&self, name: &str) -> StorageResult<Option<String>> {
        Ok(self
            .load(name)?
            .filter(|c| !c.is_expired(Utc::now()))
            .map(|c| c.value))
    }

    fn set(&self, cookie: Cookie) -> StorageResult<()> {
        let key = format!("{COOKIE_KEY_PREFIX}{}", cookie.name);
        let raw = serde_json::to_string(&cookie).map_err(|source| StorageError::Encode {
            key: key.clone(),
            source,
        })?;
        tracing::debug!(header = %cookie.to_header_value(), "setting cookie");
        self.store.set(&key, &raw)
    }

    fn header(&self) -> StorageResult<String> {
        let now = Utc::now();
        let mut pairs = Vec::new();
        for key in self.store.keys()? {
            let Some(name) = key.strip_prefix(COOKIE_KEY_PREFIX) else {
                continue;
            };
            if let Some(cookie) = self.load(name)? {
                if !cookie.is_expired(now) {
                    pairs.push(format!("{}={}", cookie.name, cookie.value));
                }
            }
        }
        Ok(pairs.join("; "))
    }
}

/// The two identity tiers, fastest first.
#[derive(Clone)]
pub struct StorageTiers {
    pub local: Arc<dyn KeyValueStore>,
    pub cookies: Arc<dyn CookieJar>,
}

impl StorageTiers {
    pub fn new(local: Arc<dyn KeyValueStore>, cookies: Arc<dyn CookieJar>) -> Self {
        Self { local, cookies }
    }

    /// Fresh, empty in-memory tiers.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StoreCookieJar::in_memory()),
        )
    }

    /// File-backed tiers under `dir`: `local_storage.json` and `cookies.json`.
    /// Corrupt files are moved aside and start empty.
    pub fn open_dir(dir: &Path) -> StorageResult<Self> {
        let local = FileStore::open_or_recover(dir.join(LOCAL_STORAGE_FILE))?;
        let cookie_store = FileStore::open_or_recover(dir.join(COOKIES_FILE))?;
        Ok(Self::new(
            Arc::new(local),
            Arc::new(StoreCookieJar::new(Arc::new(cookie_store))),
        ))
    }

    /// Like [`StorageTiers::open_dir`], but a tier whose file cannot be
    /// opened at all is replaced by an in-memory one for this process.
    pub fn open_dir_or_memory(dir: &Path) -> Self {
        let open = |file: &str| -> Arc<dyn KeyValueStore> {
            let path = dir.join(file);
            match FileStore::open_or_recover(&path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "storage tier unavailable, using memory");
                    Arc::new(MemoryStore::new())
                }
            }
        };
        let local = open(LOCAL_STORAGE_FILE);
        let cookie_store = open(COOKIES_FILE);
        Self::new(local, Arc::new(StoreCookieJar::new(cookie_store)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shopvn-test-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.keys().unwrap(), vec!["k".to_string()]);

        // Clones share the same map.
        let clone = store.clone();
        clone.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_open() {
        let dir = scratch_dir("file-store");
        let path = dir.join("nested").join("local.json");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("shopvn_user_id").unwrap(), None);
        store.set("shopvn_user_id", "user_abc_1").unwrap();
        store.set("other", "x").unwrap();
        store.remove("other").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("shopvn_user_id").unwrap().as_deref(), Some("user_abc_1"));
        assert_eq!(reopened.get("other").unwrap(), None);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = scratch_dir("file-store-corrupt");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("local.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = scratch_dir("file-store-recover");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("local.json");
        fs::write(&path, "not json").unwrap();

        let store = FileStore::open_or_recover(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
        store.set("k", "v").unwrap();

        let aside: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("local.json.corrupt-"))
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read_to_string(dir.join(&aside[0])).unwrap(), "not json");
        assert_eq!(FileStore::open(&path).unwrap().get("k").unwrap().as_deref(), Some("v"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_dir_survives_corrupt_cookie_file() {
        let dir = scratch_dir("tiers-corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(COOKIES_FILE), "{{{").unwrap();

        let tiers = StorageTiers::open_dir(&dir).unwrap();
        assert_eq!(tiers.cookies.get("shopvn_user_id").unwrap(), None);
        tiers
            .cookies
            .set(Cookie::persistent("shopvn_user_id", "user_a_1", 365, Utc::now()))
            .unwrap();
        assert_eq!(tiers.cookies.get("shopvn_user_id").unwrap().as_deref(), Some("user_a_1"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_dir_or_memory_falls_back() {
        let dir = scratch_dir("tiers-blocked");
        fs::create_dir_all(&dir).unwrap();
        // A regular file where the storage directory should be.
        let blocker = dir.join("storage");
        fs::write(&blocker, "x").unwrap();
        assert!(StorageTiers::open_dir(&blocker).is_err());

        let tiers = StorageTiers::open_dir_or_memory(&blocker);
        tiers.local.set("k", "v").unwrap();
        assert_eq!(tiers.local.get("k").unwrap().as_deref(), Some("v"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cookie_header_value() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cookie = Cookie::persistent("shopvn_user_id", "user_x_1", 365, now);
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.same_site, SameSite::Strict);
        assert_eq!(
            cookie.to_header_value(),
            "shopvn_user_id=user_x_1;expires=Tue, 31 Dec 2024 00:00:00 GMT;path=/;SameSite=Strict"
        );
    }

    #[test]
    fn test_cookie_value_parsing() {
        let header = "theme=dark; shopvn_user_id=user_1a2b_1700000000000;  lang=vi";
        assert_eq!(cookie_value(header, "shopvn_user_id"), Some("user_1a2b_1700000000000"));
        assert_eq!(cookie_value(header, "theme"), Some("dark"));
        assert_eq!(cookie_value(header, "lang"), Some("vi"));
        assert_eq!(cookie_value(header, "missing"), None);
        // A name that is only a prefix of another cookie must not match.
        assert_eq!(cookie_value("shopvn_user_id_old=1", "shopvn_user_id"), None);
    }

    #[test]
    fn test_cookie_jar_expiry() {
        let jar = StoreCookieJar::in_memory();
        let past = Utc::now() - Duration::days(400);
        jar.set(Cookie::persistent("stale", "1", 365, past)).unwrap();
        jar.set(Cookie::persistent("fresh", "2", 365, Utc::now())).unwrap();

        assert_eq!(jar.get("stale").unwrap(), None);
        assert_eq!(jar.get("fresh").unwrap().as_deref(), Some("2"));
        assert_eq!(jar.header().unwrap(), "fresh=2");
    }

    #[test]
    fn test_cookie_jar_shares_store_keys() {
        let store = Arc::new(MemoryStore::new());
        let jar = StoreCookieJar::new(store.clone());
        jar.set(Cookie::persistent("a", "1", 1, Utc::now())).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["cookie:a".to_string()]);
        assert_eq!(cookie_value(&jar.header().unwrap(), "a"), Some("1"));
    }

    #[test]
    fn test_tiers_open_dir() {
        let dir = scratch_dir("tiers");
        let tiers = StorageTiers::open_dir(&dir).unwrap();
        tiers.local.set("k", "v").unwrap();
        tiers
            .cookies
            .set(Cookie::persistent("c", "v", 1, Utc::now()))
            .unwrap();
        assert!(dir.join("local_storage.json").exists());
        assert!(dir.join("cookies.json").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}

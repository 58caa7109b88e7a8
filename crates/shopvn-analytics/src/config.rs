//! Tracker configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use shopvn_logging::LogConfig;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::session::DEFAULT_LOCATION;

/// Which persistence strategy the session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One append to the remote sink per event.
    Remote,
    /// Cumulative JSON downloads every `batch_size` events and at teardown.
    #[default]
    Snapshot,
}

impl std::str::FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(StrategyKind::Remote),
            "snapshot" => Ok(StrategyKind::Snapshot),
            other => Err(ConfigError::Invalid {
                field: "strategy".into(),
                message: format!("unknown strategy {other:?}, expected remote or snapshot"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Holds `local_storage.json` and `cookies.json`.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

/// Document sink behind the remote strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// JSON-lines files under `sink_dir`.
    #[default]
    Jsonl,
    /// Documents are only logged.
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub backend: RemoteBackend,

    /// Directory of the JSON-lines document sink.
    #[serde(default = "default_sink_dir")]
    pub sink_dir: PathBuf,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::default(),
            sink_dir: default_sink_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Events between snapshot flushes.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Upper bound on waiting for outstanding writes at teardown.
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,

    #[serde(default = "default_saved_status_reset_ms")]
    pub saved_status_reset_ms: u64,

    #[serde(default = "default_error_status_reset_ms")]
    pub error_status_reset_ms: u64,

    #[serde(default = "default_cookie_ttl_days")]
    pub cookie_ttl_days: i64,

    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_batch_size() -> u64 {
    10
}

fn default_teardown_timeout_ms() -> u64 {
    5000
}

fn default_saved_status_reset_ms() -> u64 {
    2000
}

fn default_error_status_reset_ms() -> u64 {
    3000
}

fn default_cookie_ttl_days() -> i64 {
    crate::identity::DEFAULT_COOKIE_TTL_DAYS
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./.shopvn/storage")
}

fn default_sink_dir() -> PathBuf {
    PathBuf::from("./.shopvn/remote")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./.shopvn/downloads")
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            batch_size: default_batch_size(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
            saved_status_reset_ms: default_saved_status_reset_ms(),
            error_status_reset_ms: default_error_status_reset_ms(),
            cookie_ttl_days: default_cookie_ttl_days(),
            location: default_location(),
            storage: StorageConfig::default(),
            remote: RemoteConfig::default(),
            snapshot: SnapshotConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn check_range<T: PartialOrd + Display>(field: &str, value: T, min: T, max: T) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

impl TrackerConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), strategy = ?config.strategy, "loaded tracker config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("batch_size", self.batch_size, 1, u64::MAX)?;
        check_range("teardown_timeout_ms", self.teardown_timeout_ms, 1, 60_000)?;
        check_range("saved_status_reset_ms", self.saved_status_reset_ms, 1, 60_000)?;
        check_range("error_status_reset_ms", self.error_status_reset_ms, 1, 60_000)?;
        check_range("cookie_ttl_days", self.cookie_ttl_days, 1, 3650)?;
        if self.location.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "location".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Render as TOML, e.g. for `dump-config`.
    pub fn render(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn saved_status_reset(&self) -> Duration {
        Duration::from_millis(self.saved_status_reset_ms)
    }

    pub fn error_status_reset(&self) -> Duration {
        Duration::from_millis(self.error_status_reset_ms)
    }
}

//! Error types for the analytics pipeline.
//!
//! Nothing here ever reaches the code that calls `EventTracker::record`:
//! persistence errors stop at the strategy boundary and storage errors stop
//! inside identity resolution. They exist so each layer can log precisely
//! what went wrong and so tests can inject failures.

use std::path::PathBuf;

/// A probe of the host environment could not produce a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("{probe} probe unavailable")]
    Unavailable { probe: &'static str },
}

/// Errors from the local key/value tier or the cookie tier.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt storage file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("failed to encode stored value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage tier unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a remote append-only sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected write to {collection}: {message}")]
    Rejected { collection: String, message: String },

    #[error("sink io error: {0}")]
    Io(String),
}

/// Errors while producing or saving a snapshot download.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download target rejected {file_name}: {message}")]
    Rejected { file_name: String, message: String },
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("config field {field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("invalid config field {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Umbrella error for operations that touch several layers.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type SinkResult<T> = std::result::Result<T, SinkError>;
pub type ExportResult<T> = std::result::Result<T, ExportError>;

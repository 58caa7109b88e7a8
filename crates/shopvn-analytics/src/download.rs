//! Destinations for snapshot downloads.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, ExportResult};

#[async_trait]
pub trait DownloadTarget: Send + Sync {
    /// Save `contents` under `file_name`. Returns where it ended up.
    async fn save(&self, file_name: &str, contents: Vec<u8>) -> ExportResult<String>;
}

/// Saves downloads into a directory. Name clashes get a ` (n)` suffix
/// instead of overwriting.
pub struct DirectoryDownloads {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (file_name, String::new()),
        };
        (1..)
            .map(|n| self.dir.join(format!("{stem} ({n}){ext}")))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

#[async_trait]
impl DownloadTarget for DirectoryDownloads {
    async fn save(&self, file_name: &str, contents: Vec<u8>) -> ExportResult<String> {
        let _guard = self.lock.lock();
        fs::create_dir_all(&self.dir).map_err(|source| ExportError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.free_path(file_name);
        fs::write(&path, contents).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}

/// Keeps downloads in memory.
pub struct InMemoryDownloads {
    files: Mutex<Vec<SavedFile>>,
}

impl InMemoryDownloads {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn files(&self) -> Vec<SavedFile> {
        self.files.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.files.lock().len()
    }
}

impl Default for InMemoryDownloads {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownloadTarget for InMemoryDownloads {
    async fn save(&self, file_name: &str, contents: Vec<u8>) -> ExportResult<String> {
        self.files.lock().push(SavedFile {
            file_name: file_name.to_string(),
            contents,
        });
        Ok(file_name.to_string())
    }
}

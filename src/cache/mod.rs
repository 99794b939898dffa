// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local image cache keyed by server id.
//!
//! One file per key under the cache directory. Keys are stable functions of
//! the server id ([`full_key`], [`thumb_key`]), so once an item uploads every
//! surface that asks for that id hits the cache.
//!
//! Eviction is independent of writes: [`CacheWriter::evict_to_cap`] sorts
//! files by modification time and deletes the oldest until the directory
//! fits under the byte cap. Temp files left by interrupted writes are
//! swept in the same pass once they are older than [`STALE_TEMP_AGE`].

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

const TEMP_PREFIX: &str = ".tmp-";

/// A temp file this old belongs to no live write.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(15 * 60);

type Entry = (PathBuf, u64, SystemTime);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache key for the full-size image of a server photo.
#[must_use]
pub fn full_key(id: &str) -> String {
    id.to_string()
}

/// Cache key for the thumbnail of a server photo.
#[must_use]
pub fn thumb_key(id: &str) -> String {
    format!("{}-thumb", id)
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: usize,
    pub bytes_freed: u64,
    pub remaining_bytes: u64,
    /// Abandoned temp files deleted (their bytes count toward `bytes_freed`)
    pub temp_files_removed: usize,
}

#[derive(Debug, Clone)]
pub struct CacheWriter {
    dir: PathBuf,
    max_bytes: u64,
}

impl CacheWriter {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// File path backing `key`.
    ///
    /// Plain ids map to a file of the same name; anything that is not a safe
    /// file name is hashed.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        let safe = !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if safe {
            Ok(self.dir.join(key))
        } else {
            Ok(self.dir.join(hex::encode(Sha256::digest(key.as_bytes()))))
        }
    }

    /// Write `bytes` under `key`, replacing any previous value atomically.
    pub async fn add_to_cache(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let target = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        self.commit(&temp, &target).await?;

        debug!(key, bytes = bytes.len(), "Cached bytes");
        Ok(target)
    }

    /// Copy an existing file into the cache under `key`.
    pub async fn add_file(&self, key: &str, source: &Path) -> Result<PathBuf, CacheError> {
        let target = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp = self.temp_path();
        tokio::fs::copy(source, &temp).await?;
        self.commit(&temp, &target).await?;

        debug!(key, source = %source.display(), "Cached file");
        Ok(target)
    }

    pub async fn contains(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match tokio::fs::read(self.path_for(key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `key`. Returns `false` if it was not cached.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of committed cache files.
    pub async fn total_bytes(&self) -> Result<u64, CacheError> {
        let (entries, _) = self.scan().await?;
        Ok(entries.iter().map(|(_, len, _)| len).sum())
    }

    /// Delete oldest files until the cache is no larger than the cap.
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display(), cap = self.max_bytes))]
    pub async fn evict_to_cap(&self) -> Result<EvictionReport, CacheError> {
        let (mut entries, temps) = self.scan().await?;
        let mut total: u64 = entries.iter().map(|(_, len, _)| len).sum();
        let mut report = EvictionReport::default();

        let cutoff = SystemTime::now()
            .checked_sub(STALE_TEMP_AGE)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        for (path, len, modified) in temps {
            if modified > cutoff {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    report.temp_files_removed += 1;
                    report.bytes_freed += len;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete stale temp file"),
            }
        }

        entries.sort_by_key(|(_, _, modified)| *modified);

        for (path, len, _) in entries {
            if total <= self.max_bytes {
                break;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    total = total.saturating_sub(len);
                    report.evicted += 1;
                    report.bytes_freed += len;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict cache file"),
            }
        }

        report.remaining_bytes = total;
        crate::metrics::set_cache_bytes(total);
        if report.evicted > 0 || report.temp_files_removed > 0 {
            crate::metrics::record_cache_eviction(report.evicted + report.temp_files_removed, report.bytes_freed);
            info!(
                evicted = report.evicted,
                temp_files = report.temp_files_removed,
                freed = report.bytes_freed,
                remaining = total,
                "Cache evicted to cap"
            );
        }
        Ok(report)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()))
    }

    async fn commit(&self, temp: &Path, target: &Path) -> Result<(), CacheError> {
        if let Err(e) = tokio::fs::rename(temp, target).await {
            let _ = tokio::fs::remove_file(temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Committed files and temp files, separately.
    async fn scan(&self) -> Result<(Vec<Entry>, Vec<Entry>), CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), Vec::new())),
            Err(e) => return Err(e.into()),
        };

        let mut committed = Vec::new();
        let mut temps = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // A temp file renamed away between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let found = (entry.path(), meta.len(), modified);
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                temps.push(found);
            } else {
                committed.push(found);
            }
        }
        Ok((committed, temps))
    }
}

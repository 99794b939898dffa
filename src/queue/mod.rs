// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue of pending uploads.
//!
//! The whole queue is one JSON array stored under a single key, so every
//! mutation is a read-modify-write of that value. All of them run inside one
//! async mutex; callers never see a half-applied change.
//!
//! # Corruption handling
//!
//! Entries are parsed one at a time. An entry that does not match the
//! [`QueueItem`] shape is moved to `"{key}:quarantine"` as its raw JSON text
//! and the rest of the queue is kept. If the stored value is not a JSON array
//! at all, the live queue resets to empty and the raw value is quarantined.
//!
//! ```text
//! @PENDING_UPLOADS             → [{...item...}, {...item...}]
//! @PENDING_UPLOADS:quarantine  → ["{\"bad\":true}"]
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::queue_item::QueueItem;
use crate::storage::traits::{KvStore, StorageError};

/// Result of the startup filesystem reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cache keys of entries whose backing file had vanished
    pub pruned_items: Vec<String>,
    pub orphan_files_deleted: usize,
}

pub struct QueueStore {
    kv: Arc<dyn KvStore>,
    key: String,
    quarantine_key: String,
    lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            quarantine_key: format!("{}:quarantine", key),
            kv,
            key,
            lock: Mutex::new(()),
        }
    }

    /// Storage key the serialized queue lives under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append an item. Rejects a `local_cache_key` that is already queued.
    pub async fn enqueue(&self, item: QueueItem) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;

        if items.iter().any(|i| i.local_cache_key == item.local_cache_key) {
            return Err(StorageError::DuplicateCacheKey(item.local_cache_key));
        }

        debug!(cache_key = %item.local_cache_key, media_type = %item.media_type, "Enqueued capture");
        items.push(item);
        self.save(&items).await
    }

    /// Snapshot of the queue in insertion order.
    pub async fn list(&self) -> Result<Vec<QueueItem>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    pub async fn get(&self, cache_key: &str) -> Result<Option<QueueItem>, StorageError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|i| i.local_cache_key == cache_key))
    }

    pub async fn contains_key(&self, cache_key: &str) -> Result<bool, StorageError> {
        Ok(self.get(cache_key).await?.is_some())
    }

    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.list().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    /// Remove the entry with the same cache key. Returns `false` if absent.
    pub async fn remove(&self, item: &QueueItem) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|i| i.local_cache_key != item.local_cache_key);

        if items.len() == before {
            return Ok(false);
        }
        self.save(&items).await?;
        Ok(true)
    }

    /// Replace the entry matching `matching` with `new_item`.
    ///
    /// Returns `false` if no entry matches (e.g. it was cancelled meanwhile).
    pub async fn update(&self, matching: &QueueItem, new_item: QueueItem) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;

        let Some(pos) = items
            .iter()
            .position(|i| i.local_cache_key == matching.local_cache_key)
        else {
            return Ok(false);
        };

        if new_item.local_cache_key != matching.local_cache_key
            && items.iter().any(|i| i.local_cache_key == new_item.local_cache_key)
        {
            return Err(StorageError::DuplicateCacheKey(new_item.local_cache_key));
        }

        items[pos] = new_item;
        self.save(&items).await?;
        Ok(true)
    }

    /// Apply `f` to the entry with `cache_key` inside one critical section.
    ///
    /// Returns the updated item, or `None` if no entry matches. If `f` fails
    /// nothing is written.
    pub async fn modify<F>(&self, cache_key: &str, f: F) -> Result<Option<QueueItem>, StorageError>
    where
        F: FnOnce(&mut QueueItem) -> Result<(), StorageError>,
    {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;

        let Some(pos) = items.iter().position(|i| i.local_cache_key == cache_key) else {
            return Ok(None);
        };

        let mut updated = items[pos].clone();
        f(&mut updated)?;

        if updated.local_cache_key != cache_key
            && items.iter().any(|i| i.local_cache_key == updated.local_cache_key)
        {
            return Err(StorageError::DuplicateCacheKey(updated.local_cache_key));
        }

        items[pos] = updated.clone();
        self.save(&items).await?;
        Ok(Some(updated))
    }

    /// Drop every entry and delete the files they reference (best-effort).
    ///
    /// Returns the number of entries removed.
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let items = self.load().await?;
        self.save(&[]).await?;

        for item in &items {
            delete_item_files(item).await;
        }

        info!(count = items.len(), "Cleared upload queue");
        Ok(items.len())
    }

    /// Prune entries whose backing file vanished, then delete files in
    /// `pending_dir` that no remaining entry references.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, pending_dir: &Path) -> Result<ReconcileReport, StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let mut report = ReconcileReport::default();

        let mut kept = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            if tokio::fs::try_exists(item.backing_file()).await.unwrap_or(false) {
                kept.push(item);
            } else {
                warn!(
                    cache_key = %item.local_cache_key,
                    path = %item.backing_file().display(),
                    "Backing file missing, pruning queue entry"
                );
                report.pruned_items.push(item.local_cache_key);
            }
        }

        if !report.pruned_items.is_empty() {
            self.save(&kept).await?;
        }

        let referenced: HashSet<&Path> = kept.iter().flat_map(|i| i.local_files()).collect();

        // Captures sit at the top level, derived files one directory down
        let mut dirs = vec![pending_dir.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                match entry.file_type().await {
                    Ok(t) if t.is_dir() => dirs.push(path),
                    Ok(t) if t.is_file() && !referenced.contains(path.as_path()) => {
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => report.orphan_files_deleted += 1,
                            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete orphan file"),
                        }
                    }
                    _ => {}
                }
            }
        }

        crate::metrics::record_orphans_deleted(report.orphan_files_deleted);
        info!(
            pruned = report.pruned_items.len(),
            orphans = report.orphan_files_deleted,
            "Queue reconciled against pending directory"
        );
        Ok(report)
    }

    /// Raw JSON of entries that failed to parse, oldest first.
    pub async fn quarantined(&self) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load_quarantine().await
    }

    async fn load(&self) -> Result<Vec<QueueItem>, StorageError> {
        let Some(raw) = self.kv.get(&self.key).await? else {
            return Ok(Vec::new());
        };

        let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Persisted queue unreadable, resetting to empty");
                crate::metrics::record_queue_corruption(&self.key, 1);
                self.quarantine(vec![raw]).await?;
                self.save(&[]).await?;
                return Ok(Vec::new());
            }
        };

        let total = values.len();
        let mut items: Vec<QueueItem> = Vec::with_capacity(total);
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for value in values {
            match serde_json::from_value::<QueueItem>(value.clone()) {
                Ok(item) if seen.insert(item.local_cache_key.clone()) => items.push(item),
                Ok(item) => {
                    warn!(cache_key = %item.local_cache_key, "Duplicate cache key in persisted queue, dropping later entry");
                    rejected.push(value.to_string());
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Unparsable queue entry quarantined");
                    rejected.push(value.to_string());
                }
            }
        }

        if !rejected.is_empty() {
            crate::metrics::record_queue_corruption(&self.key, rejected.len());
            self.quarantine(rejected).await?;
            self.save(&items).await?;
        }

        debug!(kept = items.len(), total, "Loaded upload queue");
        Ok(items)
    }

    async fn save(&self, items: &[QueueItem]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(items)?;
        self.kv.put(&self.key, &raw).await?;
        crate::metrics::set_queue_depth(items.len());
        Ok(())
    }

    async fn load_quarantine(&self) -> Result<Vec<String>, StorageError> {
        match self.kv.get(&self.quarantine_key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|_| vec![raw])),
            None => Ok(Vec::new()),
        }
    }

    async fn quarantine(&self, entries: Vec<String>) -> Result<(), StorageError> {
        let mut all = self.load_quarantine().await?;
        all.extend(entries);
        let raw = serde_json::to_string(&all)?;
        self.kv.put(&self.quarantine_key, &raw).await
    }
}

/// Delete every local file an item references. Missing files are ignored.
pub(crate) async fn delete_item_files(item: &QueueItem) {
    for path in item.local_files() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete local file"),
        }
    }
}

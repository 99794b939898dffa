// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::retry::Retryable;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Persisted state under '{key}' is corrupt: {reason}")]
    Corruption {
        key: String,
        reason: String,
    },
    #[error("Cache key '{0}' is already queued")]
    DuplicateCacheKey(String),
    #[error("Item '{cache_key}' already has remote record '{existing_id}'")]
    RecordAlreadyAssigned {
        cache_key: String,
        existing_id: String,
    },
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Io(_))
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Backend(format!("'{}' timed out after {:?}", operation, after))
    }
}

/// Key-value persistence backing the queue.
///
/// The queue is stored as one serialized value under a single key, so the
/// backend only needs whole-value reads and writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-level error taxonomy.
//!
//! Every failure the engine handles lands in one of these buckets, and the
//! bucket decides the outcome: terminal failures drop the item with a
//! notice, everything else leaves it queued.

use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheError;
use crate::ingest::IngestError;
use crate::remote::ApiError;
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Local asset missing: {}", .0.display())]
    MissingLocalAsset(PathBuf),

    #[error("Thumbnail for '{cache_key}' failed: {reason}")]
    ThumbnailFailure { cache_key: String, reason: String },

    #[error("Record creation for '{cache_key}' failed: {source}")]
    RecordCreationFailure {
        cache_key: String,
        #[source]
        source: ApiError,
    },

    #[error("Binary upload for '{cache_key}' failed: {reason}")]
    BinaryUploadFailure { cache_key: String, reason: String },

    #[error("Cache write failed: {0}")]
    CacheWriteFailure(#[from] CacheError),

    #[error("Queue storage failed: {0}")]
    Storage(StorageError),

    /// Persisted state could not be read back and was reset
    #[error("Persisted state under '{key}' is corrupt: {reason}")]
    StorageCorruption { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl UploadError {
    /// Terminal failures remove the item and surface a blocking notice.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::MissingLocalAsset(_) => true,
            Self::RecordCreationFailure { source, .. } => source.is_terminal(),
            _ => false,
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Corruption { key, reason } => Self::StorageCorruption { key, reason },
            other => Self::Storage(other),
        }
    }
}

impl From<IngestError> for UploadError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::MissingLocalAsset(path) => Self::MissingLocalAsset(path),
            IngestError::ThumbnailFailure { cache_key, source } => Self::ThumbnailFailure {
                cache_key,
                reason: source.to_string(),
            },
            IngestError::InvalidSource(path) => Self::MissingLocalAsset(path),
            IngestError::Io(e) => Self::Storage(StorageError::Io(e)),
            IngestError::Storage(e) => e.into(),
        }
    }
}

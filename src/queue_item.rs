// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue item data structure.
//!
//! The [`QueueItem`] is the unit of pending work that flows through the
//! upload engine: one captured photo or video awaiting upload.
//!
//! # Example
//!
//! ```
//! use capture_sync::{QueueItem, MediaType, GeoLocation, UploadState};
//!
//! let item = QueueItem::new(
//!     "/data/pendingUploads/IMG_0001.jpg".into(),
//!     MediaType::Image,
//!     GeoLocation::new(10.0, 20.0),
//!     "IMG_0001".into(),
//! );
//!
//! assert_eq!(item.upload_state, UploadState::Captured);
//! assert!(item.remote_record().is_none());
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

/// Kind of captured asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    #[must_use]
    pub fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Latitude/longitude captured at shoot time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Server-assigned record for an item.
///
/// Only the opaque id is kept. Upload URLs expire, so phase 2 asks for fresh
/// ones; URL fields left behind by older queue entries are ignored on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    pub created_at: String,
}

/// Upload lifecycle of a queue item.
///
/// ```text
/// Captured → Thumbnailed → RecordCreated → Uploading → Uploaded (removed)
///                                                    ↘ Failed (removed, notice shown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadState {
    Captured,
    Thumbnailed,
    RecordCreated,
    Uploading,
    Uploaded,
    Failed,
}

impl UploadState {
    /// Terminal states never stay in the queue.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Uploaded | Self::Failed)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Captured => write!(f, "Captured"),
            Self::Thumbnailed => write!(f, "Thumbnailed"),
            Self::RecordCreated => write!(f, "RecordCreated"),
            Self::Uploading => write!(f, "Uploading"),
            Self::Uploaded => write!(f, "Uploaded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// One pending capture awaiting upload.
///
/// Serialized in camelCase so the persisted queue keeps the shape
/// `{localAssetUri, localThumbUri, mediaType, geoLocation, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Raw captured file, owned by the pending-uploads directory.
    /// For videos this becomes the extracted cover frame after thumbnailing.
    pub local_asset_uri: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_thumb_uri: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_video_uri: Option<PathBuf>,
    pub media_type: MediaType,
    pub geo_location: GeoLocation,
    /// Derived from the stable local filename; unique across the store
    pub local_cache_key: String,
    #[serde(default)]
    remote_record: Option<RemoteRecord>,
    pub upload_state: UploadState,
    /// Capture timestamp (epoch millis)
    #[serde(default)]
    pub captured_at: i64,
}

impl QueueItem {
    /// Create a freshly captured item.
    pub fn new(
        local_asset_uri: PathBuf,
        media_type: MediaType,
        geo_location: GeoLocation,
        local_cache_key: String,
    ) -> Self {
        Self {
            local_asset_uri,
            local_thumb_uri: None,
            local_video_uri: None,
            media_type,
            geo_location,
            local_cache_key,
            remote_record: None,
            upload_state: UploadState::Captured,
            captured_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
        }
    }

    /// The server record, once phase 1 has succeeded.
    #[must_use]
    pub fn remote_record(&self) -> Option<&RemoteRecord> {
        self.remote_record.as_ref()
    }

    /// Assign the server record. A record is set exactly once and never overwritten.
    pub fn assign_remote_record(&mut self, record: RemoteRecord) -> Result<(), StorageError> {
        if let Some(existing) = &self.remote_record {
            return Err(StorageError::RecordAlreadyAssigned {
                cache_key: self.local_cache_key.clone(),
                existing_id: existing.id.clone(),
            });
        }
        self.remote_record = Some(record);
        self.upload_state = UploadState::RecordCreated;
        Ok(())
    }

    /// Whether a cover frame/thumbnail has been derived.
    #[must_use]
    pub fn has_thumbnail(&self) -> bool {
        self.local_thumb_uri.is_some()
    }

    /// File that must exist for this item to remain uploadable.
    /// For videos this is the video file itself once thumbnailing has moved it.
    #[must_use]
    pub fn backing_file(&self) -> &Path {
        self.local_video_uri.as_deref().unwrap_or(&self.local_asset_uri)
    }

    /// Every local file this item references (asset, thumbnail, video).
    pub fn local_files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.local_asset_uri.as_path())
            .chain(self.local_thumb_uri.as_deref())
            .chain(self.local_video_uri.as_deref())
    }
}

/// Best-guess MIME type for an asset from its file extension.
#[must_use]
pub fn content_type_for(path: &Path, media_type: MediaType) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match (media_type, ext.as_deref()) {
        (MediaType::Video, Some("mp4")) => "video/mp4",
        (MediaType::Video, _) => "video/quicktime",
        (MediaType::Image, Some("png")) => "image/png",
        (MediaType::Image, Some("webp")) => "image/webp",
        (MediaType::Image, _) => "image/jpeg",
    }
}

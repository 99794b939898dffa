// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capture ingestion: copy the asset into the pending directory, enqueue it,
//! then derive a thumbnail.
//!
//! ```text
//! IMG_0001.jpg ──copy──► pendingUploads/IMG_0001.jpg                  (Captured)
//!                        pendingUploads/derived/IMG_0001-thumb.jpg    (Thumbnailed)
//!
//! VID_0002.mov ──copy──► pendingUploads/VID_0002.mov                  (Captured)
//!                        pendingUploads/derived/VID_0002-frame.jpg    cover frame
//!                        pendingUploads/derived/VID_0002-thumb.jpg    (Thumbnailed)
//! ```
//!
//! Captures only ever land at the top level and derived files only under
//! [`DERIVED_DIR`], so no capture name can collide with a derived one.
//!
//! A thumbnail failure leaves the item queued as `Captured`; the orchestrator
//! retries it on the next drain.

pub mod transform;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::queue::QueueStore;
use crate::queue_item::{GeoLocation, MediaType, QueueItem, UploadState};
use crate::storage::traits::StorageError;
use transform::{MediaTransformer, TransformError};

const MAX_NAME_SUFFIX: usize = 1000;

/// Subdirectory of the pending directory holding thumbnails and cover frames.
pub const DERIVED_DIR: &str = "derived";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Local asset not found: {}", .0.display())]
    MissingLocalAsset(PathBuf),
    #[error("Asset path has no usable file name: {}", .0.display())]
    InvalidSource(PathBuf),
    #[error("Thumbnail for '{cache_key}' failed: {source}")]
    ThumbnailFailure {
        cache_key: String,
        #[source]
        source: TransformError,
    },
    #[error("Ingest I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A freshly captured asset.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub source: PathBuf,
    pub media_type: MediaType,
    pub geo_location: GeoLocation,
}

impl CaptureRequest {
    pub fn new(source: impl Into<PathBuf>, media_type: MediaType, geo_location: GeoLocation) -> Self {
        Self {
            source: source.into(),
            media_type,
            geo_location,
        }
    }
}

pub struct CaptureIngester {
    queue: Arc<QueueStore>,
    cache: CacheWriter,
    transformer: Arc<dyn MediaTransformer>,
    pending_dir: PathBuf,
    thumbnail_height: u32,
}

impl CaptureIngester {
    pub fn new(
        queue: Arc<QueueStore>,
        cache: CacheWriter,
        transformer: Arc<dyn MediaTransformer>,
        pending_dir: impl Into<PathBuf>,
        thumbnail_height: u32,
    ) -> Self {
        Self {
            queue,
            cache,
            transformer,
            pending_dir: pending_dir.into(),
            thumbnail_height,
        }
    }

    #[must_use]
    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    fn derived_dir(&self) -> PathBuf {
        self.pending_dir.join(DERIVED_DIR)
    }

    fn derived_file(&self, cache_key: &str, suffix: &str) -> PathBuf {
        self.derived_dir().join(format!("{}-{}.jpg", cache_key, suffix))
    }

    /// Capture then thumbnail. A thumbnail failure is logged and the
    /// captured item is returned as-is.
    pub async fn ingest(&self, request: CaptureRequest) -> Result<QueueItem, IngestError> {
        let item = self.capture(request).await?;

        match self.derive_thumbnail(&item).await {
            Ok(Some(thumbnailed)) => Ok(thumbnailed),
            Ok(None) => Ok(item),
            Err(e) => {
                warn!(cache_key = %item.local_cache_key, error = %e, "Thumbnail failed, will retry on drain");
                crate::metrics::record_operation("thumbnail", "error");
                Ok(item)
            }
        }
    }

    /// Copy the asset under a stable, unique name and enqueue it as `Captured`.
    #[tracing::instrument(skip(self), fields(source = %request.source.display()))]
    pub async fn capture(&self, request: CaptureRequest) -> Result<QueueItem, IngestError> {
        if !tokio::fs::try_exists(&request.source).await.unwrap_or(false) {
            return Err(IngestError::MissingLocalAsset(request.source));
        }

        let (stem, ext) = split_name(&request.source)
            .ok_or_else(|| IngestError::InvalidSource(request.source.clone()))?;

        // Created up front so a capture named like the directory takes a suffix
        tokio::fs::create_dir_all(self.derived_dir()).await?;

        for n in 0..MAX_NAME_SUFFIX {
            let cache_key = if n == 0 { stem.clone() } else { format!("{}-{}", stem, n) };
            let dest = self.pending_dir.join(match &ext {
                Some(ext) => format!("{}.{}", cache_key, ext),
                None => cache_key.clone(),
            });

            let same_file = dest == request.source;
            if !same_file && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                continue;
            }
            if self.queue.contains_key(&cache_key).await? {
                continue;
            }

            if !same_file {
                tokio::fs::copy(&request.source, &dest).await?;
            }

            let item = QueueItem::new(dest.clone(), request.media_type, request.geo_location, cache_key);
            match self.queue.enqueue(item.clone()).await {
                Ok(()) => {
                    info!(cache_key = %item.local_cache_key, media_type = %item.media_type, "Captured asset queued");
                    return Ok(item);
                }
                Err(StorageError::DuplicateCacheKey(_)) => {
                    // Lost a race with a concurrent capture of the same name
                    if !same_file {
                        let _ = tokio::fs::remove_file(&dest).await;
                    }
                }
                Err(e) => {
                    if !same_file {
                        let _ = tokio::fs::remove_file(&dest).await;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(IngestError::InvalidSource(request.source))
    }

    /// Derive the thumbnail (and cover frame for video) and record it in the
    /// queue. Returns `None` if the item is no longer queued.
    #[tracing::instrument(skip(self, item), fields(cache_key = %item.local_cache_key))]
    pub async fn derive_thumbnail(&self, item: &QueueItem) -> Result<Option<QueueItem>, IngestError> {
        if item.has_thumbnail() {
            return Ok(Some(item.clone()));
        }

        let backing = item.backing_file().to_path_buf();
        if !tokio::fs::try_exists(&backing).await.unwrap_or(false) {
            return Err(IngestError::MissingLocalAsset(backing));
        }

        let key = &item.local_cache_key;
        tokio::fs::create_dir_all(self.derived_dir()).await?;
        let thumb = self.derived_file(key, "thumb");
        let failure = |source| IngestError::ThumbnailFailure {
            cache_key: key.clone(),
            source,
        };

        let (asset, video) = if item.media_type.is_video() {
            let frame = self.derived_file(key, "frame");
            self.transformer
                .extract_frame(&backing, &frame)
                .await
                .map_err(failure)?;
            (frame, Some(backing))
        } else {
            (item.local_asset_uri.clone(), None)
        };

        self.transformer
            .resize_to_height(&asset, &thumb, self.thumbnail_height)
            .await
            .map_err(failure)?;

        let thumb_for_update = thumb.clone();
        let updated = self
            .queue
            .modify(key, move |queued| {
                queued.local_asset_uri = asset;
                if video.is_some() {
                    queued.local_video_uri = video;
                }
                queued.local_thumb_uri = Some(thumb_for_update);
                if queued.upload_state == UploadState::Captured {
                    queued.upload_state = UploadState::Thumbnailed;
                }
                Ok(())
            })
            .await?;

        let Some(updated) = updated else {
            debug!("Item left the queue while thumbnailing, discarding derived files");
            let _ = tokio::fs::remove_file(&thumb).await;
            if item.media_type.is_video() {
                let _ = tokio::fs::remove_file(self.derived_file(key, "frame")).await;
            }
            return Ok(None);
        };

        // Pending tile for the UI; losing it only costs a placeholder
        if let Err(e) = self.cache.add_file(key, &thumb).await {
            warn!(error = %e, "Failed to seed pending thumbnail into cache");
        }

        crate::metrics::record_operation("thumbnail", "success");
        Ok(Some(updated))
    }
}

/// `"IMG_0001.jpg"` → `("IMG_0001", Some("jpg"))`. The stem stops at the
/// first dot.
fn split_name(path: &Path) -> Option<(String, Option<String>)> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = match name.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext.to_string())),
        None => (name, None),
    };
    if stem.is_empty() {
        return None;
    }
    Some((stem.to_string(), ext))
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The steps of one drain pass: thumbnail catch-up, record creation,
//! binary upload, completion.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::{full_key, thumb_key};
use crate::error::UploadError;
use crate::events::{Notice, UploadEvent};
use crate::ingest::IngestError;
use crate::metrics::LatencyTimer;
use crate::queue::delete_item_files;
use crate::queue_item::{content_type_for, MediaType, QueueItem, RemoteRecord, UploadState};
use crate::remote::{ApiError, CreateRecordRequest, RemotePhoto, UploadTarget};
use crate::resilience::retry::{retry_while, RetryConfig, RetryError, Retryable};
use crate::storage::traits::StorageError;

use super::{DrainReport, UploadOrchestrator};

/// How phase 2 ended for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Uploaded,
    /// Cancelled while in flight; result thrown away
    Discarded,
    /// Terminal failure, item dropped
    Purged,
    /// Transient failure, item stays queued
    Deferred,
    /// Connectivity lost; stop the pass
    Interrupted,
}

/// One binary of a record: fetch a presigned URL, then PUT the local file.
struct Leg {
    path: PathBuf,
    target: UploadTarget,
    content_type: &'static str,
    media_type: MediaType,
}

#[derive(Error, Debug)]
enum LegError {
    #[error("Local file not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("Failed to read local file: {0}")]
    Read(String),
    #[error(transparent)]
    Api(ApiError),
}

impl Retryable for LegError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Missing(_))
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Api(ApiError::timed_out(operation, after))
    }
}

impl UploadOrchestrator {
    pub(super) async fn run_phases(&self, report: &mut DrainReport) -> Result<(), UploadError> {
        self.prepare_thumbnails(report).await?;

        if !self.create_records(report).await? {
            report.interrupted = true;
            return Ok(());
        }

        if !self.upload_ready(report).await? {
            report.interrupted = true;
        }
        Ok(())
    }

    /// Retry thumbnails that failed at capture time.
    async fn prepare_thumbnails(&self, report: &mut DrainReport) -> Result<(), UploadError> {
        for item in self.queue.list().await? {
            if item.has_thumbnail() || item.upload_state != UploadState::Captured {
                continue;
            }

            match self.ingester.derive_thumbnail(&item).await {
                Ok(Some(_)) => report.thumbnails_derived += 1,
                Ok(None) => {}
                Err(IngestError::MissingLocalAsset(path)) => {
                    warn!(cache_key = %item.local_cache_key, path = %path.display(), "Captured file vanished");
                    if self.purge(&item, "missing_asset", Notice::missing_original()).await? {
                        report.failed += 1;
                    }
                }
                Err(IngestError::Storage(e)) => return Err(e.into()),
                Err(e) => {
                    let err = UploadError::from(e);
                    warn!(error = %err, "Thumbnail still failing, item stays queued");
                    crate::metrics::record_operation("thumbnail", "error");
                }
            }
        }
        Ok(())
    }

    /// Phase 1. Returns `false` if connectivity dropped.
    async fn create_records(&self, report: &mut DrainReport) -> Result<bool, UploadError> {
        let policy = RetryConfig::record_creation(&self.config);

        for item in self.queue.list().await? {
            if item.remote_record().is_some() {
                continue;
            }
            if item.media_type.is_video() && !item.has_thumbnail() {
                debug!(cache_key = %item.local_cache_key, "Video waits for its cover frame");
                continue;
            }
            if !tokio::fs::try_exists(item.backing_file()).await.unwrap_or(false) {
                if self.purge(&item, "missing_asset", Notice::missing_original()).await? {
                    report.failed += 1;
                }
                continue;
            }

            let request = self.record_request(&item);
            let outcome = {
                let _timer = LatencyTimer::new("record");
                retry_while(
                    "create_record",
                    &policy,
                    || self.network.is_reachable(),
                    || self.api.create_record(&request),
                )
                .await
            };

            match outcome {
                Ok(photo) => {
                    let record = photo.to_record();
                    match self
                        .queue
                        .modify(&item.local_cache_key, move |queued| queued.assign_remote_record(record))
                        .await
                    {
                        Ok(Some(_)) => {
                            report.records_created += 1;
                            crate::metrics::record_operation("record", "success");
                            info!(cache_key = %item.local_cache_key, photo_id = %photo.id, "Remote record created");
                        }
                        Ok(None) => {
                            warn!(photo_id = %photo.id, "Item cancelled during record creation, server record orphaned");
                        }
                        Err(StorageError::RecordAlreadyAssigned { existing_id, .. }) => {
                            warn!(existing_id = %existing_id, photo_id = %photo.id, "Item already had a record, keeping the first");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(RetryError::Aborted { .. }) => {
                    info!("Connectivity lost during record creation");
                    return Ok(false);
                }
                Err(RetryError::Fatal { error, .. }) => {
                    let (reason, notice) = rejection(&error);
                    let err = UploadError::RecordCreationFailure {
                        cache_key: item.local_cache_key.clone(),
                        source: error,
                    };
                    crate::metrics::record_operation("record", "error");
                    if err.is_terminal() {
                        warn!(error = %err, "Terminal record-creation failure, dropping item");
                        if self.purge(&item, reason, notice).await? {
                            report.failed += 1;
                        }
                    } else {
                        error!(error = %err, "Record request rejected, item stays queued");
                        self.events.notice(notice);
                        report.deferred += 1;
                    }
                }
                Err(RetryError::Exhausted { last, attempts, .. }) => {
                    let notice = match &last {
                        ApiError::Timeout(_) | ApiError::Network(_) => Notice::upload_delayed(),
                        other => Notice::record_failed(other.to_string()),
                    };
                    let err = UploadError::RecordCreationFailure {
                        cache_key: item.local_cache_key.clone(),
                        source: last,
                    };
                    warn!(error = %err, attempts, "Record creation exhausted, item stays queued");
                    crate::metrics::record_operation("record", "error");
                    self.events.notice(notice);
                    report.deferred += 1;
                }
            }

            tokio::task::yield_now().await;
        }

        Ok(true)
    }

    /// Phase 2, one item at a time. Returns `false` if connectivity dropped.
    async fn upload_ready(&self, report: &mut DrainReport) -> Result<bool, UploadError> {
        for item in self.queue.list().await? {
            let Some(record) = item.remote_record().cloned() else {
                continue;
            };
            if !self.network.is_reachable() {
                info!("Offline, stopping phase 2");
                return Ok(false);
            }

            match self.upload_item(&item, &record).await? {
                ItemOutcome::Uploaded => report.uploaded += 1,
                ItemOutcome::Discarded => {}
                ItemOutcome::Purged => report.failed += 1,
                ItemOutcome::Deferred => report.deferred += 1,
                ItemOutcome::Interrupted => return Ok(false),
            }

            tokio::task::yield_now().await;
        }
        Ok(true)
    }

    #[tracing::instrument(skip(self, item, record), fields(cache_key = %item.local_cache_key, photo_id = %record.id))]
    async fn upload_item(&self, item: &QueueItem, record: &RemoteRecord) -> Result<ItemOutcome, UploadError> {
        let key = item.local_cache_key.as_str();
        let Some(item) = self
            .queue
            .modify(key, |queued| {
                queued.upload_state = UploadState::Uploading;
                Ok(())
            })
            .await?
        else {
            return Ok(ItemOutcome::Discarded);
        };
        let _timer = LatencyTimer::new("upload");

        let mut legs = Vec::with_capacity(2);
        if item.media_type.is_video() {
            let Some(video) = item.local_video_uri.clone() else {
                error!("Video item lacks its video file");
                self.revert_to_record_created(key).await?;
                return Ok(ItemOutcome::Deferred);
            };
            legs.push(Leg {
                content_type: content_type_for(&video, MediaType::Video),
                path: video,
                target: UploadTarget::Video,
                media_type: MediaType::Video,
            });
        }
        legs.push(Leg {
            content_type: content_type_for(&item.local_asset_uri, MediaType::Image),
            path: item.local_asset_uri.clone(),
            target: UploadTarget::Image,
            media_type: MediaType::Image,
        });

        for leg in &legs {
            match self.upload_leg(&record.id, leg).await {
                Ok(bytes) => {
                    crate::metrics::record_bytes_uploaded(&leg.media_type.to_string(), bytes);
                    debug!(path = %leg.path.display(), bytes, "Leg uploaded");
                }
                Err(RetryError::Fatal { error: LegError::Missing(path), .. }) => {
                    warn!(path = %path.display(), "Local file missing before upload, dropping item");
                    return Ok(if self.purge(&item, "missing_asset", Notice::missing_original()).await? {
                        ItemOutcome::Purged
                    } else {
                        ItemOutcome::Discarded
                    });
                }
                Err(RetryError::Aborted { .. }) => {
                    info!("Connectivity lost mid-upload, item stays queued");
                    self.revert_to_record_created(key).await?;
                    return Ok(ItemOutcome::Interrupted);
                }
                Err(e) => {
                    let err = UploadError::BinaryUploadFailure {
                        cache_key: key.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Binary upload failed, item stays queued");
                    crate::metrics::record_operation("upload", "error");
                    self.revert_to_record_created(key).await?;
                    self.events.notice(Notice::still_trying());
                    return Ok(ItemOutcome::Deferred);
                }
            }
        }

        self.complete(&item, record).await
    }

    /// Every attempt asks for a new URL; the last one may have expired.
    async fn upload_leg(&self, photo_id: &str, leg: &Leg) -> Result<usize, RetryError<LegError>> {
        let policy = RetryConfig::binary_upload(&self.config);
        retry_while(
            "upload_binary",
            &policy,
            || self.network.is_reachable(),
            || async {
                if !tokio::fs::try_exists(&leg.path).await.unwrap_or(false) {
                    return Err(LegError::Missing(leg.path.clone()));
                }
                let body = tokio::fs::read(&leg.path)
                    .await
                    .map_err(|e| LegError::Read(e.to_string()))?;
                let len = body.len();
                let url = self
                    .api
                    .upload_url(photo_id, leg.target, leg.content_type)
                    .await
                    .map_err(LegError::Api)?;
                self.api
                    .upload(&url, leg.content_type, body)
                    .await
                    .map_err(LegError::Api)?;
                Ok(len)
            },
        )
        .await
    }

    /// Both legs landed: dequeue, warm the cache under the server id, clean
    /// up local files and announce the photo.
    async fn complete(&self, item: &QueueItem, record: &RemoteRecord) -> Result<ItemOutcome, UploadError> {
        if !self.queue.remove(item).await? {
            info!(cache_key = %item.local_cache_key, "Upload finished for a cancelled item, discarding result");
            return Ok(ItemOutcome::Discarded);
        }

        let thumb_source = item.local_thumb_uri.as_deref().unwrap_or(&item.local_asset_uri);
        let writes = [
            self.cache.add_file(&full_key(&record.id), &item.local_asset_uri).await,
            self.cache.add_file(&thumb_key(&record.id), thumb_source).await,
        ];
        for result in writes {
            if let Err(e) = result {
                let err = UploadError::CacheWriteFailure(e);
                warn!(error = %err, photo_id = %record.id, "Cache write failed after upload");
            }
        }
        if let Err(e) = self.cache.remove(&item.local_cache_key).await {
            warn!(error = %e, "Failed to drop pending tile");
        }
        delete_item_files(item).await;

        crate::metrics::record_uploaded(&item.media_type.to_string());
        crate::metrics::record_operation("upload", "success");
        info!(photo_id = %record.id, media_type = %item.media_type, "Upload complete");

        self.events.publish(UploadEvent::PhotoAvailable(RemotePhoto {
            id: record.id.clone(),
            created_at: record.created_at.clone(),
            video: item.media_type.is_video(),
        }));
        Ok(ItemOutcome::Uploaded)
    }

    async fn revert_to_record_created(&self, cache_key: &str) -> Result<(), UploadError> {
        self.queue
            .modify(cache_key, |queued| {
                if queued.upload_state == UploadState::Uploading {
                    queued.upload_state = UploadState::RecordCreated;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Drop an item after a terminal failure. Returns `false` if it had
    /// already left the queue.
    pub(super) async fn purge(&self, item: &QueueItem, reason: &str, notice: Notice) -> Result<bool, UploadError> {
        if !self.queue.remove(item).await? {
            return Ok(false);
        }
        delete_item_files(item).await;
        if let Err(e) = self.cache.remove(&item.local_cache_key).await {
            warn!(error = %e, "Failed to drop pending tile");
        }
        crate::metrics::record_failed(reason);
        self.events.notice(notice);
        Ok(true)
    }

    fn record_request(&self, item: &QueueItem) -> CreateRecordRequest {
        CreateRecordRequest {
            device_id: self.device_id.clone(),
            lat: item.geo_location.latitude,
            lon: item.geo_location.longitude,
            video: item.media_type.is_video(),
        }
    }
}

/// Metric label and notice for a record request the server refused.
fn rejection(error: &ApiError) -> (&'static str, Notice) {
    match error {
        ApiError::Banned(message) => ("banned", Notice::banned(message.clone())),
        ApiError::Unauthorized(_) => ("unauthorized", Notice::blocking("Upload Error", error.to_string())),
        other => ("rejected", Notice::blocking("Upload Error", other.to_string())),
    }
}

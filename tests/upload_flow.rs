// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end upload flow against a scripted remote API.
//!
//! The orchestrator is built without `start()` unless a test is about the
//! lifecycle, so the connectivity watcher never races the explicit drains.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

use capture_sync::{
    ApiError, CacheWriter, CaptureIngester, CaptureRequest, CreateRecordRequest, EngineParts,
    EngineState, EventBus, GeoLocation, InMemoryStore, MediaTransformer, MediaType, NetworkGate,
    NoticeLevel, PhotoApi, QueueStore, RemotePhoto, TransformError, UploadEngineConfig, UploadError,
    UploadEvent, UploadOrchestrator, UploadState, UploadTarget,
};

// =============================================================================
// Test doubles
// =============================================================================

type UploadHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ScriptedApi {
    record_calls: AtomicUsize,
    url_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    record_errors: Mutex<VecDeque<ApiError>>,
    url_errors: Mutex<VecDeque<ApiError>>,
    upload_errors: Mutex<VecDeque<ApiError>>,
    record_delay: Mutex<Option<Duration>>,
    upload_delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<CreateRecordRequest>>,
    uploads: Mutex<Vec<(String, String)>>,
    on_upload: Mutex<Option<UploadHook>>,
}

impl ScriptedApi {
    fn fail_records(&self, errors: impl IntoIterator<Item = ApiError>) {
        self.record_errors.lock().extend(errors);
    }

    fn fail_urls(&self, errors: impl IntoIterator<Item = ApiError>) {
        self.url_errors.lock().extend(errors);
    }

    fn fail_uploads(&self, errors: impl IntoIterator<Item = ApiError>) {
        self.upload_errors.lock().extend(errors);
    }

    fn records(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    fn url_requests(&self) -> usize {
        self.url_calls.load(Ordering::SeqCst)
    }

    fn upload_attempts(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    fn uploaded_urls(&self) -> Vec<String> {
        self.uploads.lock().iter().map(|(url, _)| url.clone()).collect()
    }
}

#[async_trait]
impl PhotoApi for ScriptedApi {
    async fn create_record(&self, request: &CreateRecordRequest) -> Result<RemotePhoto, ApiError> {
        let n = self.record_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.record_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.record_errors.lock().pop_front() {
            return Err(err);
        }
        self.requests.lock().push(request.clone());

        Ok(RemotePhoto {
            id: format!("P{n}"),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            video: request.video,
        })
    }

    async fn upload_url(&self, photo_id: &str, target: UploadTarget, _content_type: &str) -> Result<String, ApiError> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.url_errors.lock().pop_front() {
            return Err(err);
        }
        Ok(match target {
            UploadTarget::Image => format!("https://x/{photo_id}"),
            UploadTarget::Video => format!("https://x/{photo_id}.mov"),
        })
    }

    async fn upload(&self, url: &str, content_type: &str, _body: Vec<u8>) -> Result<(), ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_upload.lock().as_ref() {
            hook();
        }
        let delay = *self.upload_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.upload_errors.lock().pop_front() {
            return Err(err);
        }
        self.uploads.lock().push((url.to_string(), content_type.to_string()));
        Ok(())
    }
}

/// Writes placeholder JPEGs instead of decoding anything.
struct PlaceholderTransformer;

#[async_trait]
impl MediaTransformer for PlaceholderTransformer {
    async fn resize_to_height(&self, _source: &Path, dest: &Path, height: u32) -> Result<(), TransformError> {
        tokio::fs::write(dest, format!("thumb@{height}")).await?;
        Ok(())
    }

    async fn extract_frame(&self, _video: &Path, dest: &Path) -> Result<(), TransformError> {
        tokio::fs::write(dest, b"frame").await?;
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    _dir: TempDir,
    camera: PathBuf,
    pending: PathBuf,
    api: Arc<ScriptedApi>,
    network: NetworkGate,
    queue: Arc<QueueStore>,
    cache: CacheWriter,
    engine: Arc<UploadOrchestrator>,
}

fn test_config(root: &Path) -> UploadEngineConfig {
    UploadEngineConfig {
        pending_dir: root.join("pendingUploads"),
        cache_dir: root.join("cache"),
        record_timeout_ms: 500,
        record_max_attempts: 3,
        upload_timeout_ms: 500,
        upload_max_attempts: 3,
        retry_step_ms: 1,
        // Long enough that a scheduled re-drain never fires mid-test
        redrain_delay_ms: 60_000,
        ..Default::default()
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn harness_with(tweak: impl FnOnce(&mut UploadEngineConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let camera = dir.path().join("camera");
    std::fs::create_dir_all(&camera).unwrap();

    let mut config = test_config(dir.path());
    tweak(&mut config);

    let api = Arc::new(ScriptedApi::default());
    let network = NetworkGate::new(false);
    let queue = Arc::new(QueueStore::new(Arc::new(InMemoryStore::new()), config.queue_key.clone()));
    let cache = CacheWriter::new(&config.cache_dir, config.cache_max_bytes);
    let ingester = CaptureIngester::new(
        queue.clone(),
        cache.clone(),
        Arc::new(PlaceholderTransformer),
        &config.pending_dir,
        config.thumbnail_height,
    );

    let engine = UploadOrchestrator::new(EngineParts {
        device_id: "device-test".to_string(),
        queue: queue.clone(),
        cache: cache.clone(),
        network: network.clone(),
        api: api.clone(),
        ingester,
        events: EventBus::new(),
        config: config.clone(),
    });

    Harness {
        pending: config.pending_dir.clone(),
        _dir: dir,
        camera,
        api,
        network,
        queue,
        cache,
        engine,
    }
}

impl Harness {
    fn shoot(&self, name: &str) -> PathBuf {
        let path = self.camera.join(name);
        std::fs::write(&path, format!("raw:{name}")).unwrap();
        path
    }

    async fn capture(&self, name: &str, media_type: MediaType) -> capture_sync::QueueItem {
        let source = self.shoot(name);
        self.engine
            .enqueue_capture(CaptureRequest::new(source, media_type, GeoLocation::new(10.0, 20.0)))
            .await
            .unwrap()
    }

    /// Files under the pending directory, derived ones included.
    fn pending_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        let mut dirs = vec![self.pending.clone()];
        while let Some(dir) = dirs.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_dir() {
                    dirs.push(path);
                } else {
                    files.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        files
    }
}

fn drain_events(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn notices(events: &[UploadEvent]) -> Vec<&capture_sync::Notice> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Notice(n) => Some(n),
            _ => None,
        })
        .collect()
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Capture
// =============================================================================

#[tokio::test]
async fn test_capture_queues_thumbnailed_image() {
    let h = harness();

    let item = h.capture("IMG_0001.jpg", MediaType::Image).await;

    assert_eq!(item.media_type, MediaType::Image);
    assert_eq!(item.local_cache_key, "IMG_0001");
    assert_eq!(item.geo_location, GeoLocation::new(10.0, 20.0));
    assert_eq!(item.upload_state, UploadState::Thumbnailed);
    assert!(item.local_thumb_uri.as_ref().unwrap().exists());
    assert!(item.remote_record().is_none());

    let queued = h.engine.pending().await.unwrap();
    assert_eq!(queued, vec![item]);
    // Offline: nothing was attempted
    assert_eq!(h.api.records(), 0);
}

#[tokio::test]
async fn test_missing_capture_emits_blocking_notice() {
    let h = harness();
    let mut rx = h.engine.events().subscribe();

    let err = h
        .engine
        .enqueue_capture(CaptureRequest::new(
            h.camera.join("gone.jpg"),
            MediaType::Image,
            GeoLocation::new(0.0, 0.0),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::MissingLocalAsset(_)));
    assert!(h.queue.is_empty().await.unwrap());
    let events = drain_events(&mut rx);
    assert!(notices(&events).iter().any(|n| n.level == NoticeLevel::Blocking));
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_image_upload_completes_and_warms_cache() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    let mut rx = h.engine.events().subscribe();

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(report.records_created, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.remaining, 0);
    assert!(h.queue.is_empty().await.unwrap());

    assert!(h.cache.contains("P1").await);
    assert!(h.cache.contains("P1-thumb").await);
    assert!(!h.cache.contains("IMG_0001").await);
    assert!(h.pending_files().is_empty());

    assert_eq!(h.api.uploaded_urls(), vec!["https://x/P1".to_string()]);
    let request = h.api.requests.lock()[0].clone();
    assert_eq!(request.device_id, "device-test");
    assert_eq!((request.lat, request.lon), (10.0, 20.0));
    assert!(!request.video);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, UploadEvent::PhotoAvailable(p) if p.id == "P1")));
    assert!(!h.engine.has_scheduled_retry());
}

#[tokio::test]
async fn test_video_uploads_video_leg_before_cover() {
    let h = harness();
    let item = h.capture("VID_0002.mov", MediaType::Video).await;
    assert!(item.local_video_uri.is_some());

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(report.uploaded, 1);
    let uploads = h.api.uploads.lock().clone();
    assert_eq!(
        uploads,
        vec![
            ("https://x/P1.mov".to_string(), "video/quicktime".to_string()),
            ("https://x/P1".to_string(), "image/jpeg".to_string()),
        ]
    );
    assert!(h.api.requests.lock()[0].video);
    assert_eq!(h.api.url_requests(), 2);
    assert!(h.pending_files().is_empty());
}

#[tokio::test]
async fn test_phase_one_runs_for_all_items_before_any_upload() {
    let h = harness();
    h.capture("A.jpg", MediaType::Image).await;
    h.capture("B.jpg", MediaType::Image).await;
    h.capture("C.jpg", MediaType::Image).await;

    // Observe record count at the first PUT
    let api = h.api.clone();
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let seen_in_hook = seen.clone();
    *h.api.on_upload.lock() = Some(Box::new(move || {
        let _ = seen_in_hook.compare_exchange(
            usize::MAX,
            api.record_calls.load(Ordering::SeqCst),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }));

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(report.uploaded, 3);
    assert_eq!(
        h.api.uploaded_urls(),
        vec!["https://x/P1", "https://x/P2", "https://x/P3"]
    );
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_ban_purges_item_without_retry() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    h.api.fail_records([ApiError::Banned("You have been banned".into())]);
    let mut rx = h.engine.events().subscribe();

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.api.records(), 1);
    assert!(h.queue.is_empty().await.unwrap());
    assert!(h.pending_files().is_empty());
    assert!(!h.engine.has_scheduled_retry());

    let events = drain_events(&mut rx);
    let shown = notices(&events);
    assert!(shown
        .iter()
        .any(|n| n.level == NoticeLevel::Blocking && n.message.contains("banned")));
}

#[tokio::test]
async fn test_upload_timeouts_keep_record_and_warn() {
    let h = harness_with(|c| c.upload_timeout_ms = 20);
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    *h.api.upload_delay.lock() = Some(Duration::from_millis(300));
    let mut rx = h.engine.events().subscribe();

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(h.api.upload_attempts(), 3);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.remaining, 1);

    let queued = h.queue.get("IMG_0001").await.unwrap().unwrap();
    assert_eq!(queued.remote_record().unwrap().id, "P1");
    assert_eq!(queued.upload_state, UploadState::RecordCreated);

    let events = drain_events(&mut rx);
    assert!(notices(&events).iter().any(|n| n.message == "Still trying to upload."));
    assert!(h.engine.has_scheduled_retry());
}

#[tokio::test]
async fn test_transient_record_failure_is_retried_within_budget() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    h.api.fail_records([ApiError::Network("reset".into()), ApiError::Server("busy".into())]);

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(h.api.records(), 3);
    assert_eq!(report.uploaded, 1);
}

#[tokio::test]
async fn test_exhausted_record_creation_schedules_redrain() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    h.api.fail_records((0..3).map(|_| ApiError::Network("unreachable".into())));
    let mut rx = h.engine.events().subscribe();

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(report.deferred, 1);
    assert_eq!(h.api.upload_attempts(), 0);
    assert!(h.engine.has_scheduled_retry());
    let events = drain_events(&mut rx);
    assert!(notices(&events).iter().any(|n| n.title == "Upload delayed"));

    h.engine.shutdown().await;
    assert!(!h.engine.has_scheduled_retry());
    assert_eq!(h.engine.state(), EngineState::ShuttingDown);
}

#[tokio::test]
async fn test_each_upload_attempt_fetches_a_fresh_url() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    let expired = || ApiError::Status { status: 403, body: "Request has expired".into() };
    h.api.fail_uploads([expired(), expired()]);

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(h.api.upload_attempts(), 3);
    assert_eq!(h.api.url_requests(), 3);
    assert_eq!(h.api.records(), 1);
}

#[tokio::test]
async fn test_upload_url_failures_never_recreate_record() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    h.network.set_reachable(true);

    for _ in 0..2 {
        h.api.fail_urls((0..3).map(|_| ApiError::Status { status: 503, body: "unavailable".into() }));
        let report = h.engine.drain().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.remaining, 1);
    }

    assert_eq!(h.api.records(), 1);
    assert_eq!(h.api.upload_attempts(), 0);
    let queued = h.queue.get("IMG_0001").await.unwrap().unwrap();
    assert_eq!(queued.remote_record().unwrap().id, "P1");
    assert_eq!(queued.upload_state, UploadState::RecordCreated);

    let report = h.engine.drain().await.unwrap();
    assert_eq!(report.records_created, 0);
    assert_eq!(report.uploaded, 1);
    assert_eq!(h.api.records(), 1);
    assert_eq!(h.api.url_requests(), 7);
    assert_eq!(h.api.uploaded_urls(), vec!["https://x/P1".to_string()]);
}

#[tokio::test]
async fn test_rejected_record_request_keeps_item() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    h.api.fail_records([ApiError::InvalidRequest("device id must not be empty".into())]);
    let mut rx = h.engine.events().subscribe();

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    // Not retried within the pass, not purged either
    assert_eq!(h.api.records(), 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.deferred, 1);
    let queued = h.queue.get("IMG_0001").await.unwrap().unwrap();
    assert!(queued.remote_record().is_none());
    assert!(!h.pending_files().is_empty());

    let events = drain_events(&mut rx);
    assert!(notices(&events)
        .iter()
        .any(|n| n.level == NoticeLevel::Blocking && n.message.contains("device id")));
}

#[tokio::test]
async fn test_missing_file_before_upload_purges_item() {
    let h = harness();
    let item = h.capture("IMG_0001.jpg", MediaType::Image).await;
    std::fs::remove_file(&item.local_asset_uri).unwrap();

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.api.records(), 0);
    assert!(h.queue.is_empty().await.unwrap());
}

// =============================================================================
// Connectivity
// =============================================================================

#[tokio::test]
async fn test_offline_drain_makes_no_calls() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;

    let report = h.engine.drain().await.unwrap();

    assert!(report.skipped_offline);
    assert_eq!(report.remaining, 1);
    assert_eq!(h.api.records(), 0);
    assert_eq!(h.api.upload_attempts(), 0);
    assert!(!h.engine.has_scheduled_retry());
}

#[tokio::test]
async fn test_connectivity_loss_mid_upload_stops_pass() {
    let h = harness();
    h.capture("A.jpg", MediaType::Image).await;
    h.capture("B.jpg", MediaType::Image).await;

    let gate = h.network.clone();
    *h.api.on_upload.lock() = Some(Box::new(move || {
        gate.set_reachable(false);
    }));
    h.api.fail_uploads([ApiError::Network("dropped".into())]);

    h.network.set_reachable(true);
    let report = h.engine.drain().await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.uploaded, 0);
    // Aborted after the first attempt, B never touched
    assert_eq!(h.api.upload_attempts(), 1);
    assert_eq!(report.remaining, 2);
    assert!(!h.engine.has_scheduled_retry());

    for item in h.queue.list().await.unwrap() {
        assert!(item.remote_record().is_some());
        assert_eq!(item.upload_state, UploadState::RecordCreated);
    }
}

#[tokio::test]
async fn test_reconnect_triggers_drain_after_start() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    h.engine.start().await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Idle);
    let mut rx = h.engine.events().subscribe();

    h.network.set_reachable(true);

    let photo = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(UploadEvent::PhotoAvailable(photo)) = rx.recv().await {
                return photo;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(photo.id, "P1");

    h.engine.shutdown().await;
}

// =============================================================================
// Single-flight and cancellation
// =============================================================================

#[tokio::test]
async fn test_concurrent_drains_are_coalesced() {
    let h = harness();
    h.capture("IMG_0001.jpg", MediaType::Image).await;
    *h.api.record_delay.lock() = Some(Duration::from_millis(50));
    h.network.set_reachable(true);

    let (a, b) = tokio::join!(h.engine.drain(), h.engine.drain());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.coalesced ^ b.coalesced);
    let leader = if a.coalesced { b } else { a };
    assert_eq!(leader.passes, 2);
    assert_eq!(leader.uploaded, 1);
    assert_eq!(h.api.records(), 1);
    assert_eq!(h.api.upload_attempts(), 1);
    assert!(!h.engine.is_draining());
}

#[tokio::test]
async fn test_cancel_discards_in_flight_upload() {
    let h = harness();
    let item = h.capture("IMG_0001.jpg", MediaType::Image).await;
    *h.api.upload_delay.lock() = Some(Duration::from_millis(100));
    let mut rx = h.engine.events().subscribe();
    h.network.set_reachable(true);

    let engine = h.engine.clone();
    let drain = tokio::spawn(async move { engine.drain().await });

    let api = h.api.clone();
    wait_for(move || api.upload_attempts() == 1).await;
    assert!(h.engine.cancel(&item).await.unwrap());
    assert!(!h.engine.cancel(&item).await.unwrap());

    let report = drain.await.unwrap().unwrap();
    assert_eq!(report.uploaded, 0);
    assert!(h.queue.is_empty().await.unwrap());
    assert!(!h.cache.contains("P1").await);
    assert!(h.pending_files().is_empty());

    let events = drain_events(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, UploadEvent::PhotoAvailable(_))));
}

#[tokio::test]
async fn test_clear_drops_items_and_files() {
    let h = harness();
    h.capture("A.jpg", MediaType::Image).await;
    h.capture("B.mov", MediaType::Video).await;
    assert!(!h.pending_files().is_empty());

    let cleared = h.engine.clear().await.unwrap();

    assert_eq!(cleared, 2);
    assert!(h.engine.pending().await.unwrap().is_empty());
    assert!(h.pending_files().is_empty());
    assert!(!h.cache.contains("A").await);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_prunes_entries_with_missing_files() {
    let h = harness();
    let kept = h.capture("KEEP.jpg", MediaType::Image).await;
    let gone = h.capture("GONE.jpg", MediaType::Image).await;
    std::fs::remove_file(&gone.local_asset_uri).unwrap();

    let report = h.engine.start().await.unwrap();

    assert_eq!(report.pruned_items, vec!["GONE".to_string()]);
    // GONE's thumbnail is now unreferenced
    assert_eq!(report.orphan_files_deleted, 1);
    let remaining = h.engine.pending().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].local_cache_key, kept.local_cache_key);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_open_rejects_blank_device_id() {
    let dir = tempfile::tempdir().unwrap();
    let opened = UploadOrchestrator::open(
        test_config(dir.path()),
        Arc::new(ScriptedApi::default()),
        Arc::new(PlaceholderTransformer),
        "  ",
    )
    .await;

    let Err(err) = opened else {
        panic!("blank device id was accepted");
    };
    assert!(matches!(err, UploadError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_open_http_requires_api_url() {
    let dir = tempfile::tempdir().unwrap();

    let Err(err) = UploadOrchestrator::open_http(test_config(dir.path()), Arc::new(PlaceholderTransformer), "dev").await
    else {
        panic!("opened without an api_url");
    };
    assert!(matches!(err, UploadError::InvalidConfig(_)));

    let mut config = test_config(dir.path());
    config.api_url = Some("http://127.0.0.1:9/graphql".into());
    let Ok(engine) = UploadOrchestrator::open_http(config, Arc::new(PlaceholderTransformer), "dev").await else {
        panic!("open_http failed with api_url set");
    };
    assert_eq!(engine.state(), EngineState::Created);
}

#[tokio::test]
async fn test_enqueue_rejected_after_shutdown() {
    let h = harness();
    h.engine.shutdown().await;

    let source = h.shoot("LATE.jpg");
    let err = h
        .engine
        .enqueue_capture(CaptureRequest::new(source, MediaType::Image, GeoLocation::new(0.0, 0.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::ShuttingDown));
    assert!(matches!(h.engine.drain().await, Err(UploadError::ShuttingDown)));
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic capture-sync usage example.
//!
//! Demonstrates:
//! 1. Opening the engine with SQLite queue persistence
//! 2. Capturing two photos while offline
//! 3. Coming online and watching the drain upload them
//! 4. Displaying metrics
//! 5. Clean shutdown
//!
//! Set `CAPTURE_SYNC_API_URL` to talk to a real GraphQL backend; otherwise an
//! in-process loopback API stands in for the server.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=capture_sync=debug cargo run --example basic_usage
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capture_sync::{
    ApiError, CaptureRequest, CreateRecordRequest, EngineState, GeoLocation, ImageTransformer,
    MediaType, PhotoApi, RemotePhoto, UploadEngineConfig, UploadEvent, UploadOrchestrator,
    UploadTarget,
};
use capture_sync::feed::PhotoFeed;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing_subscriber::EnvFilter;

/// Accepts everything, hands out sequential ids.
#[derive(Default)]
struct LoopbackApi {
    next_id: AtomicUsize,
    bytes: AtomicUsize,
}

#[async_trait]
impl PhotoApi for LoopbackApi {
    async fn create_record(&self, request: &CreateRecordRequest) -> Result<RemotePhoto, ApiError> {
        let id = format!("photo-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(RemotePhoto {
            id,
            created_at: "2026-01-01T00:00:00Z".into(),
            video: request.video,
        })
    }

    async fn upload_url(&self, photo_id: &str, target: UploadTarget, _content_type: &str) -> Result<String, ApiError> {
        Ok(format!("loopback://{}", target.asset_key(photo_id)))
    }

    async fn upload(&self, _url: &str, _content_type: &str, body: Vec<u8>) -> Result<(), ApiError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.bytes.fetch_add(body.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capture_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           capture-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    let workdir = tempfile::tempdir()?;
    let config = UploadEngineConfig {
        storage_url: Some(format!("sqlite://{}?mode=rwc", workdir.path().join("queue.db").display())),
        pending_dir: workdir.path().join("pendingUploads"),
        cache_dir: workdir.path().join("image-cache"),
        api_url: std::env::var("CAPTURE_SYNC_API_URL").ok(),
        ..Default::default()
    };

    let transformer = Arc::new(ImageTransformer::new());
    let engine = match &config.api_url {
        Some(url) => {
            println!("🌐 Using GraphQL backend at {}", url);
            UploadOrchestrator::open_http(config, transformer, "demo-device").await?
        }
        None => {
            println!("🔁 Using in-process loopback API");
            UploadOrchestrator::open(config, Arc::new(LoopbackApi::default()), transformer, "demo-device").await?
        }
    };
    println!("   State: {}", engine.state());

    let reconciled = engine.start().await?;
    assert_eq!(engine.state(), EngineState::Idle);
    println!("   ✅ Started (pruned {} stale entries)", reconciled.pruned_items.len());

    let mut events = engine.events().subscribe();

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Capture while offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📷 Capturing two photos (offline)...");
    let camera = workdir.path().join("camera");
    std::fs::create_dir_all(&camera)?;

    for (i, (lat, lon)) in [(51.5007, -0.1246), (48.8584, 2.2945)].into_iter().enumerate() {
        let path = camera.join(format!("IMG_{:04}.png", i + 1));
        let img = image::RgbImage::from_fn(640, 480, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        img.save(&path)?;

        let item = engine
            .enqueue_capture(CaptureRequest::new(path, MediaType::Image, GeoLocation::new(lat, lon)))
            .await?;
        println!("   └─ {} → {}", item.local_cache_key, item.upload_state);
    }
    println!("   Pending: {}", engine.pending().await?.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Come online and watch the drain
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Connectivity restored, draining...");
    engine.network().set_reachable(true);

    let mut feed = PhotoFeed::new();
    let mut uploaded = 0;
    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    while uploaded < 2 {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event @ UploadEvent::PhotoAvailable(_)) => {
                    feed.apply_event(&event);
                    uploaded += 1;
                    if let UploadEvent::PhotoAvailable(photo) = event {
                        println!("   └─ ✅ Uploaded as {}", photo.id);
                    }
                }
                Ok(UploadEvent::Notice(notice)) => println!("   └─ 💬 {}: {}", notice.title, notice.message),
                Ok(UploadEvent::QueueChanged { pending }) => println!("   └─ Queue: {} pending", pending),
                Err(e) => {
                    println!("   └─ Event stream ended: {}", e);
                    break;
                }
            },
            _ = &mut deadline => {
                println!("   └─ ⚠️  Timed out waiting for uploads");
                break;
            }
        }
    }

    println!("\n🖼️  Feed (newest first):");
    for photo in feed.photos() {
        let cached = engine.cache().contains(photo.id()).await;
        println!("   └─ {} (cached: {})", photo.id(), cached);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", engine.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print every captured metric, grouped by kind.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("counter   {}{} = {}", key.name(), label_str, v),
            DebugValue::Gauge(v) => format!("gauge     {}{} = {:.2}", key.name(), label_str, v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("histogram {}{} n={} sum={:.4}", key.name(), label_str, samples.len(), sum)
            }
        };
        lines.push(rendered);
    }

    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}

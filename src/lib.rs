// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Capture Sync
//!
//! Offline-first upload engine for geotagged photos and videos.
//!
//! Captures are persisted to a durable queue the moment they are taken and
//! uploaded later, whenever the network allows, through a two-phase protocol:
//! first a server record is created (yielding presigned URLs), then the bytes
//! are PUT to those URLs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Ingest Layer                         │
//! │  • Copies the capture into the pending directory            │
//! │  • Derives thumbnail / cover frame, seeds the local cache   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Durable Queue                         │
//! │  • JSON array under one key (SQLite/MySQL or memory)        │
//! │  • Corrupt entries quarantined, never fatal                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 (drained when NetworkGate is open)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Upload Orchestrator                      │
//! │  • Phase 1: create records for every item, FIFO             │
//! │  • Phase 2: upload bytes one item at a time                 │
//! │  • Single-flight drains, linear backoff, re-drain timer     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!            image cache  +  UploadEvent::PhotoAvailable
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capture_sync::{
//!     CaptureRequest, GeoLocation, ImageTransformer, MediaType, UploadEngineConfig,
//!     UploadOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = UploadEngineConfig {
//!         storage_url: Some("sqlite://capture.db?mode=rwc".into()),
//!         api_url: Some("https://api.example.com/graphql".into()),
//!         ..Default::default()
//!     };
//!
//!     let engine = UploadOrchestrator::open_http(config, Arc::new(ImageTransformer::new()), "device-1")
//!         .await
//!         .expect("Failed to open");
//!     engine.start().await.expect("Failed to start");
//!
//!     engine.network().set_reachable(true);
//!     engine
//!         .enqueue_capture(CaptureRequest::new(
//!             "/tmp/IMG_0001.jpg",
//!             MediaType::Image,
//!             GeoLocation::new(51.5, -0.12),
//!         ))
//!         .await
//!         .expect("Failed to enqueue");
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`UploadOrchestrator`] driving drains
//! - [`queue`]: Durable FIFO of [`QueueItem`]s
//! - [`storage`]: Key-value backends (SQL, memory)
//! - [`ingest`]: Capture intake and thumbnail derivation
//! - [`cache`]: Local image cache keyed by cache key or remote id
//! - [`remote`]: Record creation and binary upload API
//! - [`resilience`]: Retry policy and the re-drain timer
//! - [`network`]: Connectivity gate
//! - [`events`]: Notices and events for the host UI
//! - [`feed`]: Paged photo list with stale-response protection

pub mod config;
pub mod queue_item;
pub mod storage;
pub mod queue;
pub mod cache;
pub mod network;
pub mod ingest;
pub mod resilience;
pub mod remote;
pub mod events;
pub mod error;
pub mod coordinator;
pub mod feed;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::UploadEngineConfig;
pub use coordinator::{DrainReport, EngineParts, EngineState, UploadOrchestrator};
pub use queue_item::{GeoLocation, MediaType, QueueItem, RemoteRecord, UploadState};
pub use queue::{QueueStore, ReconcileReport};
pub use storage::traits::{KvStore, StorageError};
pub use storage::memory::InMemoryStore;
pub use storage::sql::SqlKvStore;
pub use cache::{CacheError, CacheWriter, EvictionReport};
pub use network::{ConnectivityState, NetworkGate};
pub use ingest::{CaptureIngester, CaptureRequest, IngestError};
pub use ingest::transform::{ImageTransformer, MediaTransformer, TransformError};
pub use remote::{ApiError, CreateRecordRequest, HttpPhotoApi, PhotoApi, RemotePhoto, UploadTarget};
pub use resilience::retry::{RetryConfig, RetryError, Retryable};
pub use resilience::scheduler::RetryScheduler;
pub use events::{EventBus, Notice, NoticeLevel, UploadEvent};
pub use error::UploadError;
pub use feed::{FeedPhoto, Generation, PageOutcome, PhotoFeed, RequestGeneration};
pub use metrics::LatencyTimer;

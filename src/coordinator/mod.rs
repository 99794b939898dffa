// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Upload orchestrator.
//!
//! The [`UploadOrchestrator`] drains the durable queue through the two-phase
//! upload protocol:
//!
//! ```text
//!            ┌──────────── drain pass ────────────────────────────┐
//!  queue ──► │ thumbnails → phase 1 (all items) → phase 2 (1 by 1) │ ──► cache + PhotoAvailable
//!            └─────────────────────────────────────────────────────┘
//!                 ▲ gated by NetworkGate         │ items left?
//!                 └────────── RetryScheduler ◄───┘
//! ```
//!
//! - Phase 1 creates the server record for every item lacking one, FIFO.
//! - Phase 2 PUTs bytes to the presigned URL(s), strictly one item at a time.
//!   Videos upload the video before the cover image.
//! - Only one drain runs at a time. A drain requested while one is running is
//!   folded into it as one extra pass.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Reconciling → Idle ⇄ Draining → ShuttingDown
//! ```

mod types;
mod lifecycle;
mod phases;

pub use types::{DrainReport, EngineState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::config::UploadEngineConfig;
use crate::error::UploadError;
use crate::events::{EventBus, Notice, UploadEvent};
use crate::ingest::{CaptureIngester, CaptureRequest};
use crate::network::NetworkGate;
use crate::queue::{delete_item_files, QueueStore};
use crate::queue_item::QueueItem;
use crate::remote::PhotoApi;
use crate::resilience::scheduler::RetryScheduler;

/// Collaborators the orchestrator is assembled from.
pub struct EngineParts {
    pub config: UploadEngineConfig,
    /// Identity sent with every record-creation call
    pub device_id: String,
    pub queue: Arc<QueueStore>,
    pub cache: CacheWriter,
    pub network: NetworkGate,
    pub api: Arc<dyn PhotoApi>,
    pub ingester: CaptureIngester,
    pub events: EventBus,
}

/// Main upload coordinator.
///
/// Always held in an `Arc`: timers and the connectivity watcher keep weak
/// references back to it.
pub struct UploadOrchestrator {
    pub(super) config: UploadEngineConfig,
    pub(super) device_id: String,
    pub(super) queue: Arc<QueueStore>,
    pub(super) cache: CacheWriter,
    pub(super) network: NetworkGate,
    pub(super) api: Arc<dyn PhotoApi>,
    pub(super) ingester: CaptureIngester,
    pub(super) events: EventBus,
    pub(super) scheduler: RetryScheduler,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Single-flight guard
    pub(super) draining: AtomicBool,
    /// Set when a drain was requested during an in-flight one
    pub(super) rerun: AtomicBool,

    pub(super) watcher: Mutex<Option<JoinHandle<()>>>,
    pub(super) self_ref: Weak<UploadOrchestrator>,
}

/// Clears the single-flight flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl UploadOrchestrator {
    /// Assemble an orchestrator. It starts in `Created`; call
    /// [`start()`](Self::start) to reconcile and begin watching connectivity.
    pub fn new(parts: EngineParts) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Arc::new_cyclic(|weak| Self {
            config: parts.config,
            device_id: parts.device_id,
            queue: parts.queue,
            cache: parts.cache,
            network: parts.network,
            api: parts.api,
            ingester: parts.ingester,
            events: parts.events,
            scheduler: RetryScheduler::new(),
            state: state_tx,
            state_rx,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            watcher: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Connectivity gate the host feeds OS callbacks into.
    #[must_use]
    pub fn network(&self) -> &NetworkGate {
        &self.network
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn cache(&self) -> &CacheWriter {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    #[must_use]
    pub fn config(&self) -> &UploadEngineConfig {
        &self.config
    }

    /// Whether a re-drain timer is pending.
    #[must_use]
    pub fn has_scheduled_retry(&self) -> bool {
        self.scheduler.is_scheduled()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub(super) fn set_state(&self, state: EngineState) {
        if *self.state_rx.borrow() == EngineState::ShuttingDown {
            return;
        }
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }

    /// Snapshot of pending items in queue order.
    pub async fn pending(&self) -> Result<Vec<QueueItem>, UploadError> {
        Ok(self.queue.list().await?)
    }

    /// Ingest a fresh capture and kick a drain if online.
    ///
    /// A missing source file is terminal: nothing is queued and a blocking
    /// notice is published.
    pub async fn enqueue_capture(&self, request: CaptureRequest) -> Result<QueueItem, UploadError> {
        if self.state() == EngineState::ShuttingDown {
            return Err(UploadError::ShuttingDown);
        }

        let item = match self.ingester.ingest(request).await {
            Ok(item) => item,
            Err(e) => {
                let err = UploadError::from(e);
                if matches!(err, UploadError::MissingLocalAsset(_)) {
                    self.events.notice(Notice::missing_original());
                }
                return Err(err);
            }
        };

        self.publish_queue_len().await;
        if self.network.is_reachable() {
            self.request_drain();
        }
        Ok(item)
    }

    /// Drain in the background. Coalesces with an in-flight drain.
    pub fn request_drain(&self) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = this.drain().await {
                warn!(error = %e, "Background drain failed");
            }
        });
    }

    /// Run drain passes until no further drain has been requested.
    ///
    /// If another drain is in flight this returns immediately with
    /// `coalesced` set, and the running drain performs one more pass.
    pub async fn drain(&self) -> Result<DrainReport, UploadError> {
        let mut total = DrainReport::default();

        loop {
            if self.state() == EngineState::ShuttingDown {
                return Err(UploadError::ShuttingDown);
            }

            if self.draining.swap(true, Ordering::AcqRel) {
                self.rerun.store(true, Ordering::Release);
                crate::metrics::record_drain_coalesced();
                debug!("Drain already in flight, coalesced");
                return Ok(if total.passes == 0 { DrainReport::coalesced() } else { total });
            }

            {
                let _guard = DrainGuard(&self.draining);
                loop {
                    self.rerun.store(false, Ordering::Release);
                    let pass = self.drain_pass().await?;
                    total.absorb(pass);
                    if !self.rerun.load(Ordering::Acquire) {
                        break;
                    }
                    debug!("Coalesced drain request, running another pass");
                }
            }

            // A request that landed between the last check and the guard
            // release would otherwise be lost
            if !self.rerun.load(Ordering::Acquire) {
                break;
            }
        }

        Ok(total)
    }

    #[tracing::instrument(skip(self))]
    async fn drain_pass(&self) -> Result<DrainReport, UploadError> {
        let started = Instant::now();
        let mut report = DrainReport {
            passes: 1,
            ..DrainReport::default()
        };

        if !self.network.is_reachable() {
            report.skipped_offline = true;
            report.remaining = self.queue.len().await?;
            crate::metrics::record_drain("skipped_offline");
            debug!(remaining = report.remaining, "Offline, drain skipped");
            return Ok(report);
        }

        self.set_state(EngineState::Draining);
        let result = self.run_phases(&mut report).await;
        self.set_state(EngineState::Idle);

        if let Err(e) = result {
            crate::metrics::record_drain("error");
            return Err(e);
        }

        report.remaining = self.queue.len().await?;
        self.schedule_follow_up(report.remaining);

        if let Err(e) = self.cache.evict_to_cap().await {
            warn!(error = %e, "Cache eviction failed");
        }

        self.events.publish(UploadEvent::QueueChanged {
            pending: report.remaining,
        });
        crate::metrics::record_drain("completed");
        crate::metrics::record_drain_duration(started.elapsed());
        info!(
            records = report.records_created,
            uploaded = report.uploaded,
            failed = report.failed,
            deferred = report.deferred,
            remaining = report.remaining,
            interrupted = report.interrupted,
            "Drain pass finished"
        );
        Ok(report)
    }

    /// Keep exactly one re-drain pending while work remains and we are
    /// online. Reconnection triggers its own drain.
    fn schedule_follow_up(&self, remaining: usize) {
        if remaining == 0 || !self.network.is_reachable() {
            if self.scheduler.cancel() {
                debug!("Cancelled pending re-drain");
            }
            return;
        }

        let weak = self.self_ref.clone();
        self.scheduler.schedule(self.config.redrain_delay(), move || async move {
            let Some(this) = weak.upgrade() else {
                return;
            };
            if let Err(e) = this.drain().await {
                warn!(error = %e, "Scheduled re-drain failed");
            }
        });
        debug!(remaining, delay_ms = self.config.redrain_delay_ms, "Re-drain scheduled");
    }

    /// Remove an item at the user's request and delete its files.
    ///
    /// If its upload is already in flight the request is not aborted; its
    /// result is discarded when it returns.
    pub async fn cancel(&self, item: &QueueItem) -> Result<bool, UploadError> {
        let removed = self.queue.remove(item).await?;
        if removed {
            delete_item_files(item).await;
            if let Err(e) = self.cache.remove(&item.local_cache_key).await {
                warn!(cache_key = %item.local_cache_key, error = %e, "Failed to drop pending tile");
            }
            info!(cache_key = %item.local_cache_key, "Upload cancelled");
            self.publish_queue_len().await;
        }
        Ok(removed)
    }

    /// Drop every pending upload and its files.
    pub async fn clear(&self) -> Result<usize, UploadError> {
        let items = self.queue.list().await?;
        let cleared = self.queue.clear().await?;
        self.scheduler.cancel();

        for item in &items {
            if let Err(e) = self.cache.remove(&item.local_cache_key).await {
                warn!(cache_key = %item.local_cache_key, error = %e, "Failed to drop pending tile");
            }
        }

        self.events.notice(Notice::queue_cleared());
        self.events.publish(UploadEvent::QueueChanged { pending: 0 });
        Ok(cleared)
    }

    pub(super) async fn publish_queue_len(&self) {
        match self.queue.len().await {
            Ok(pending) => self.events.publish(UploadEvent::QueueChanged { pending }),
            Err(e) => warn!(error = %e, "Failed to read queue length"),
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle management: open, start, shutdown.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::config::UploadEngineConfig;
use crate::error::UploadError;
use crate::events::EventBus;
use crate::ingest::transform::MediaTransformer;
use crate::ingest::CaptureIngester;
use crate::network::NetworkGate;
use crate::queue::{QueueStore, ReconcileReport};
use crate::remote::{HttpPhotoApi, PhotoApi};
use crate::storage::memory::InMemoryStore;
use crate::storage::sql::SqlKvStore;
use crate::storage::traits::KvStore;

use super::{EngineParts, EngineState, UploadOrchestrator};

impl UploadOrchestrator {
    /// Build an orchestrator from config: opens queue persistence
    /// (`storage_url`, or in-memory when unset) and wires the collaborators.
    ///
    /// Connectivity starts as unreachable until the host reports otherwise.
    pub async fn open(
        config: UploadEngineConfig,
        api: Arc<dyn PhotoApi>,
        transformer: Arc<dyn MediaTransformer>,
        device_id: impl Into<String>,
    ) -> Result<Arc<Self>, UploadError> {
        let device_id = device_id.into();
        if device_id.trim().is_empty() {
            return Err(UploadError::InvalidConfig("device id must not be empty".to_string()));
        }

        let kv: Arc<dyn KvStore> = match &config.storage_url {
            Some(url) => {
                info!(url = %url, "Opening queue persistence");
                Arc::new(SqlKvStore::new(url).await?)
            }
            None => {
                warn!("No storage_url configured, queue will not survive restarts");
                Arc::new(InMemoryStore::new())
            }
        };

        let queue = Arc::new(QueueStore::new(kv, config.queue_key.clone()));
        let cache = CacheWriter::new(&config.cache_dir, config.cache_max_bytes);
        let ingester = CaptureIngester::new(
            queue.clone(),
            cache.clone(),
            transformer,
            &config.pending_dir,
            config.thumbnail_height,
        );

        Ok(Self::new(EngineParts {
            device_id,
            queue,
            cache,
            network: NetworkGate::new(false),
            api,
            ingester,
            events: EventBus::new(),
            config,
        }))
    }

    /// [`open`](Self::open) against the GraphQL backend at `config.api_url`.
    pub async fn open_http(
        config: UploadEngineConfig,
        transformer: Arc<dyn MediaTransformer>,
        device_id: impl Into<String>,
    ) -> Result<Arc<Self>, UploadError> {
        let Some(url) = config.api_url.clone() else {
            return Err(UploadError::InvalidConfig("api_url is not set".to_string()));
        };
        info!(url = %url, "Using GraphQL backend");
        Self::open(config, Arc::new(HttpPhotoApi::new(url)), transformer, device_id).await
    }

    /// Reconcile the queue against the pending directory, trim the cache,
    /// then start watching connectivity. Drains immediately if online.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<ReconcileReport, UploadError> {
        let startup = Instant::now();
        info!("Starting upload engine...");
        self.set_state(EngineState::Reconciling);

        let phase_start = Instant::now();
        let report = self.queue.reconcile(self.ingester.pending_dir()).await?;
        crate::metrics::record_startup_phase("reconcile", phase_start.elapsed());

        let phase_start = Instant::now();
        match self.cache.evict_to_cap().await {
            Ok(eviction) => debug!(remaining = eviction.remaining_bytes, "Cache trimmed"),
            Err(e) => warn!(error = %e, "Startup cache eviction failed"),
        }
        crate::metrics::record_startup_phase("cache_evict", phase_start.elapsed());

        self.spawn_connectivity_watcher();
        self.set_state(EngineState::Idle);
        self.publish_queue_len().await;

        info!(
            pruned = report.pruned_items.len(),
            orphans = report.orphan_files_deleted,
            elapsed_ms = startup.elapsed().as_millis() as u64,
            "Upload engine started"
        );

        if self.network.is_reachable() {
            self.request_drain();
        }
        Ok(report)
    }

    /// Drain whenever connectivity comes back.
    fn spawn_connectivity_watcher(&self) {
        let mut rx = self.network.subscribe();
        let weak = self.self_ref.clone();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let reachable = *rx.borrow_and_update();
                if !reachable {
                    continue;
                }
                let Some(this) = weak.upgrade() else {
                    break;
                };
                debug!("Connectivity restored, draining");
                if let Err(e) = this.drain().await {
                    warn!(error = %e, "Drain after reconnect failed");
                }
            }
        });

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop timers and the connectivity watcher. Queued items stay persisted
    /// for the next start.
    pub async fn shutdown(&self) {
        info!("Shutting down upload engine...");
        let _ = self.state.send(EngineState::ShuttingDown);
        crate::metrics::set_engine_state("ShuttingDown");

        self.scheduler.cancel();
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        info!("Upload engine shutdown complete");
    }
}

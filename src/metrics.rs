// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for capture-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `capture_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size metrics
//!
//! # Labels
//! - `stage`: record, upload, thumbnail
//! - `operation`: name passed to the retry helper
//! - `status`: success, error, aborted

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of a pipeline stage for one item
pub fn record_operation(stage: &str, status: &str) {
    counter!(
        "capture_sync_operations_total",
        "stage" => stage.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record stage latency
pub fn record_latency(stage: &str, duration: Duration) {
    histogram!(
        "capture_sync_stage_seconds",
        "stage" => stage.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a retry of a bounded operation
pub fn record_retry(operation: &str) {
    counter!(
        "capture_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an attempt that hit its per-attempt timeout
pub fn record_timeout(operation: &str) {
    counter!(
        "capture_sync_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE - Pending work and persisted-state health
// ═══════════════════════════════════════════════════════════════════════════

/// Set number of items waiting in the durable queue
pub fn set_queue_depth(count: usize) {
    gauge!("capture_sync_queue_items").set(count as f64);
}

/// Record persisted queue entries that could not be parsed
pub fn record_queue_corruption(key: &str, entries: usize) {
    counter!(
        "capture_sync_queue_corruption_total",
        "key" => key.to_string()
    )
    .increment(entries as u64);
}

/// Record an item leaving the queue after both phases succeeded
pub fn record_uploaded(media_type: &str) {
    counter!(
        "capture_sync_uploaded_total",
        "media_type" => media_type.to_string()
    )
    .increment(1);
}

/// Record an item purged by a terminal failure
pub fn record_failed(reason: &str) {
    counter!(
        "capture_sync_failed_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record bytes sent to presigned URLs
pub fn record_bytes_uploaded(media_type: &str, bytes: usize) {
    counter!(
        "capture_sync_uploaded_bytes_total",
        "media_type" => media_type.to_string()
    )
    .increment(bytes as u64);
}

/// Record orphan files removed during startup reconciliation
pub fn record_orphans_deleted(count: usize) {
    counter!("capture_sync_orphan_files_deleted_total").increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// DRAIN - Single-flight processing passes
// ═══════════════════════════════════════════════════════════════════════════

/// Record a drain pass outcome (completed, skipped_offline, error)
pub fn record_drain(outcome: &str) {
    counter!(
        "capture_sync_drain_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a drain request folded into an in-flight pass
pub fn record_drain_coalesced() {
    counter!("capture_sync_drain_coalesced_total").increment(1);
}

/// Record drain pass duration
pub fn record_drain_duration(duration: Duration) {
    histogram!("capture_sync_drain_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE - Local image cache
// ═══════════════════════════════════════════════════════════════════════════

/// Set current image cache size in bytes
pub fn set_cache_bytes(bytes: u64) {
    gauge!("capture_sync_cache_bytes").set(bytes as f64);
}

/// Record cache eviction
pub fn record_cache_eviction(count: usize, bytes: u64) {
    counter!("capture_sync_cache_evictions_total").increment(count as u64);
    counter!("capture_sync_cache_evicted_bytes_total").increment(bytes);
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE - Connectivity and lifecycle
// ═══════════════════════════════════════════════════════════════════════════

/// Set connectivity (1 = reachable, 0 = offline)
pub fn set_reachable(reachable: bool) {
    gauge!("capture_sync_network_reachable").set(if reachable { 1.0 } else { 0.0 });
}

/// Track engine state transitions
pub fn set_engine_state(state: &str) {
    counter!(
        "capture_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "capture_sync_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records stage latency on drop
pub struct LatencyTimer {
    stage: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.stage, self.start.elapsed());
    }
}

/// Convenience macro for timing a stage
#[macro_export]
macro_rules! time_stage {
    ($stage:expr) => {
        $crate::metrics::LatencyTimer::new($stage)
    };
}

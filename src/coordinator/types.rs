// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the upload orchestrator.

/// Engine lifecycle state.
///
/// Use [`super::UploadOrchestrator::state()`] to check the current state or
/// [`super::UploadOrchestrator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Pruning the queue against the pending directory
    Reconciling,
    /// Waiting for work or connectivity
    Idle,
    /// A drain pass is running
    Draining,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Reconciling => write!(f, "Reconciling"),
            Self::Idle => write!(f, "Idle"),
            Self::Draining => write!(f, "Draining"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// What a call to [`super::UploadOrchestrator::drain()`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Passes run by this call (more than one if requests were coalesced)
    pub passes: usize,
    /// Another drain was in flight; this request was folded into it
    pub coalesced: bool,
    /// Connectivity was down when a pass started
    pub skipped_offline: bool,
    /// Connectivity dropped mid-pass and remaining work was abandoned
    pub interrupted: bool,
    pub thumbnails_derived: usize,
    pub records_created: usize,
    pub uploaded: usize,
    /// Items purged by terminal failures
    pub failed: usize,
    /// Items that failed transiently and stay queued
    pub deferred: usize,
    /// Queue length after the last pass
    pub remaining: usize,
}

impl DrainReport {
    pub(super) fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    pub(super) fn absorb(&mut self, pass: DrainReport) {
        self.passes += pass.passes;
        self.skipped_offline |= pass.skipped_offline;
        self.interrupted |= pass.interrupted;
        self.thumbnails_derived += pass.thumbnails_derived;
        self.records_created += pass.records_created;
        self.uploaded += pass.uploaded;
        self.failed += pass.failed;
        self.deferred += pass.deferred;
        self.remaining = pass.remaining;
    }

    /// Nothing left to do.
    #[must_use]
    pub fn is_empty_queue(&self) -> bool {
        self.remaining == 0
    }
}

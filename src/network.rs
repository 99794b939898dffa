// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connectivity gate.
//!
//! The host feeds OS connectivity callbacks into [`NetworkGate::apply`]; the
//! orchestrator reads [`NetworkGate::is_reachable`] before each drain and
//! between phase-2 attempts, and watches for offline→online transitions.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Raw connectivity report from the OS observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub is_connected: bool,
    /// `None` while the OS has not determined internet reachability yet
    pub is_internet_reachable: Option<bool>,
}

impl ConnectivityState {
    /// Unknown internet reachability counts as reachable.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.is_connected && self.is_internet_reachable != Some(false)
    }
}

#[derive(Debug, Clone)]
pub struct NetworkGate {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkGate {
    pub fn new(initially_reachable: bool) -> Self {
        let (tx, _) = watch::channel(initially_reachable);
        crate::metrics::set_reachable(initially_reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Record a new reachability value. Returns `true` if it changed.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            crate::metrics::set_reachable(reachable);
            info!(reachable, "Connectivity changed");
        }
        changed
    }

    /// Feed an OS connectivity report.
    pub fn apply(&self, state: ConnectivityState) -> bool {
        self.set_reachable(state.is_reachable())
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkGate {
    fn default() -> Self {
        Self::new(false)
    }
}

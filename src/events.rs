// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Events the engine publishes to the UI layer.
//!
//! Delivery is fire-and-forget over a broadcast channel: a slow or absent
//! subscriber never blocks the drain.

use tokio::sync::broadcast;
use tracing::trace;

use crate::remote::RemotePhoto;

const EVENT_CAPACITY: usize = 256;

/// How a notice should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Toast that dismisses itself
    Transient,
    /// Message the user must acknowledge
    Blocking,
}

/// User-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn transient(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Transient,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn blocking(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Blocking,
            title: title.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn missing_original() -> Self {
        Self::blocking("Upload skipped", "Original file is missing on device.")
    }

    pub fn banned(reason: impl Into<String>) -> Self {
        Self::blocking("Upload blocked", reason)
    }

    pub fn record_failed(reason: impl Into<String>) -> Self {
        Self::transient("Unable to create photo", reason)
    }

    #[must_use]
    pub fn upload_delayed() -> Self {
        Self::transient("Upload delayed", "Connection issues. Will retry automatically.")
    }

    #[must_use]
    pub fn still_trying() -> Self {
        Self::transient("Upload is going slow...", "Still trying to upload.")
    }

    #[must_use]
    pub fn queue_cleared() -> Self {
        Self::transient("Upload queue cleared", "All pending uploads have been cancelled")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// An item finished both phases; the UI can prepend it without refetching
    PhotoAvailable(RemotePhoto),
    /// Queue length changed
    QueueChanged { pending: usize },
    Notice(Notice),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: UploadEvent) {
        // No receivers is fine
        if self.tx.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    pub fn notice(&self, notice: Notice) {
        self.publish(UploadEvent::Notice(notice));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

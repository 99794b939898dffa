// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Paged photo feed with stale-response protection.
//!
//! Every page request is tagged with a [`Generation`]. A reload bumps the
//! generation, so responses to requests issued before it are recognised and
//! dropped when they arrive, whatever order they complete in.
//!
//! ```
//! use capture_sync::feed::{FeedPhoto, PageOutcome, PhotoFeed};
//!
//! let mut feed = PhotoFeed::new();
//! let stale = feed.next_request();
//! feed.reload();
//! let fresh = feed.next_request();
//!
//! let page = vec![FeedPhoto::new("a", Some(1), "2026-01-01T00:00:00Z", false)];
//! assert_eq!(feed.apply_page(stale.generation, page.clone(), false), PageOutcome::Stale);
//! assert_eq!(feed.apply_page(fresh.generation, page, false), PageOutcome::Merged { added: 1 });
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::events::UploadEvent;
use crate::remote::RemotePhoto;

/// Consecutive empty pages after which the feed stops asking for more.
const MAX_EMPTY_PAGES: u32 = 10;

/// Tag carried by a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

/// Shared source of request generations.
///
/// Cheap to clone; in-flight fetches can hold a clone and check
/// [`is_current`](Self::is_current) before doing further work.
#[derive(Debug, Clone, Default)]
pub struct RequestGeneration {
    current: Arc<AtomicU64>,
}

impl RequestGeneration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Generation {
        Generation(self.current.load(Ordering::Acquire))
    }

    /// Invalidate every outstanding request.
    pub fn advance(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }
}

/// One photo in the feed. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPhoto {
    id: String,
    #[serde(default, rename = "row_number")]
    row_number: Option<i64>,
    created_at: String,
    #[serde(default)]
    video: bool,
}

impl FeedPhoto {
    pub fn new(id: impl Into<String>, row_number: Option<i64>, created_at: impl Into<String>, video: bool) -> Self {
        Self {
            id: id.into(),
            row_number,
            created_at: created_at.into(),
            video,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Server ordering key; `None` for photos prepended after upload.
    #[must_use]
    pub fn row_number(&self) -> Option<i64> {
        self.row_number
    }

    #[must_use]
    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        self.video
    }
}

impl From<&RemotePhoto> for FeedPhoto {
    fn from(photo: &RemotePhoto) -> Self {
        Self::new(photo.id.clone(), None, photo.created_at.clone(), photo.video)
    }
}

/// What to ask the server for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub generation: Generation,
    pub page_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Issued before the latest reload; ignored
    Stale,
    Empty,
    Merged { added: usize },
}

#[derive(Debug, Default)]
pub struct PhotoFeed {
    generation: RequestGeneration,
    photos: Vec<FeedPhoto>,
    page_number: u32,
    consecutive_empty: u32,
    exhausted: bool,
}

impl PhotoFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for in-flight fetches to check staleness.
    #[must_use]
    pub fn generation(&self) -> RequestGeneration {
        self.generation.clone()
    }

    #[must_use]
    pub fn photos(&self) -> &[FeedPhoto] {
        &self.photos
    }

    /// No more pages should be requested.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    #[must_use]
    pub fn next_request(&self) -> PageRequest {
        PageRequest {
            generation: self.generation.current(),
            page_number: self.page_number,
        }
    }

    /// Start over: new generation, empty list, paging reset.
    pub fn reload(&mut self) -> Generation {
        self.photos.clear();
        self.page_number = 0;
        self.consecutive_empty = 0;
        self.exhausted = false;
        self.generation.advance()
    }

    /// Merge a page response: sorted by `row_number`, de-duplicated by id.
    pub fn apply_page(&mut self, generation: Generation, photos: Vec<FeedPhoto>, no_more_data: bool) -> PageOutcome {
        if !self.generation.is_current(generation) {
            debug!(?generation, current = ?self.generation.current(), "Dropping stale page");
            return PageOutcome::Stale;
        }

        self.page_number += 1;
        if no_more_data {
            self.exhausted = true;
        }

        if photos.is_empty() {
            self.consecutive_empty += 1;
            if self.consecutive_empty >= MAX_EMPTY_PAGES {
                self.exhausted = true;
            }
            return PageOutcome::Empty;
        }
        self.consecutive_empty = 0;

        let before = self.photos.len();
        let mut combined = std::mem::take(&mut self.photos);
        combined.extend(photos);
        combined.sort_by_key(FeedPhoto::row_number);
        self.photos = dedup_by_id(combined);

        PageOutcome::Merged {
            added: self.photos.len().saturating_sub(before),
        }
    }

    /// Put a freshly uploaded photo at the top.
    pub fn prepend(&mut self, photo: FeedPhoto) {
        let mut combined = Vec::with_capacity(self.photos.len() + 1);
        combined.push(photo);
        combined.append(&mut self.photos);
        self.photos = dedup_by_id(combined);
    }

    /// Feed an engine event; `PhotoAvailable` prepends. Returns `true` if the
    /// list changed.
    pub fn apply_event(&mut self, event: &UploadEvent) -> bool {
        match event {
            UploadEvent::PhotoAvailable(photo) => {
                self.prepend(FeedPhoto::from(photo));
                true
            }
            _ => false,
        }
    }
}

fn dedup_by_id(photos: Vec<FeedPhoto>) -> Vec<FeedPhoto> {
    let mut seen = HashSet::with_capacity(photos.len());
    photos
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

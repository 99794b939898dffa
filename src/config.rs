// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the upload engine.
//!
//! # Example
//!
//! ```
//! use capture_sync::UploadEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = UploadEngineConfig::default();
//! assert_eq!(config.cache_max_bytes, 500 * 1024 * 1024); // 500 MB
//!
//! // Full config
//! let config = UploadEngineConfig {
//!     storage_url: Some("sqlite://uploads.db?mode=rwc".into()),
//!     api_url: Some("https://api.example.com/graphql".into()),
//!     upload_max_attempts: 5,
//!     redrain_delay_ms: 2_000,
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the upload engine.
///
/// All fields have sensible defaults. For production use, set `storage_url`
/// so the queue survives restarts, and `api_url` for the remote backend.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadEngineConfig {
    /// sqlx connection string for queue persistence (e.g. "sqlite://uploads.db?mode=rwc").
    /// `None` keeps the queue in memory.
    #[serde(default)]
    pub storage_url: Option<String>,

    /// Well-known storage key holding the serialized queue
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Private directory holding raw captures and derived thumbnails
    #[serde(default = "default_pending_dir")]
    pub pending_dir: PathBuf,

    /// Content-addressed image cache directory
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Cache size cap enforced by the eviction pass (default: 500 MB)
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,

    /// Thumbnail target height in pixels
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,

    /// Record creation: per-attempt timeout and attempt cap
    #[serde(default = "default_record_timeout_ms")]
    pub record_timeout_ms: u64,
    #[serde(default = "default_record_max_attempts")]
    pub record_max_attempts: usize,

    /// Binary upload: per-attempt timeout and attempt cap
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
    #[serde(default = "default_upload_max_attempts")]
    pub upload_max_attempts: usize,

    /// Linear backoff step: the delay after attempt N is N * step
    #[serde(default = "default_retry_step_ms")]
    pub retry_step_ms: u64,

    /// Delay before the deferred re-drain when work remains
    #[serde(default = "default_redrain_delay_ms")]
    pub redrain_delay_ms: u64,

    /// GraphQL endpoint used by the HTTP API client
    #[serde(default)]
    pub api_url: Option<String>,
}

fn default_queue_key() -> String { "@PENDING_UPLOADS".to_string() }
fn default_pending_dir() -> PathBuf { PathBuf::from("./pendingUploads") }
fn default_cache_dir() -> PathBuf { PathBuf::from("./image-cache") }
fn default_cache_max_bytes() -> u64 { 500 * 1024 * 1024 } // 500 MB
fn default_thumbnail_height() -> u32 { 300 }
fn default_record_timeout_ms() -> u64 { 30_000 }
fn default_record_max_attempts() -> usize { 3 }
fn default_upload_timeout_ms() -> u64 { 180_000 }
fn default_upload_max_attempts() -> usize { 3 }
fn default_retry_step_ms() -> u64 { 1_000 }
fn default_redrain_delay_ms() -> u64 { 750 }

impl Default for UploadEngineConfig {
    fn default() -> Self {
        Self {
            storage_url: None,
            queue_key: default_queue_key(),
            pending_dir: default_pending_dir(),
            cache_dir: default_cache_dir(),
            cache_max_bytes: default_cache_max_bytes(),
            thumbnail_height: default_thumbnail_height(),
            record_timeout_ms: default_record_timeout_ms(),
            record_max_attempts: default_record_max_attempts(),
            upload_timeout_ms: default_upload_timeout_ms(),
            upload_max_attempts: default_upload_max_attempts(),
            retry_step_ms: default_retry_step_ms(),
            redrain_delay_ms: default_redrain_delay_ms(),
            api_url: None,
        }
    }
}

impl UploadEngineConfig {
    /// Delay used by the retry scheduler.
    #[must_use]
    pub fn redrain_delay(&self) -> Duration {
        Duration::from_millis(self.redrain_delay_ms)
    }
}

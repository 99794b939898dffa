// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Image and video transforms used to derive thumbnails.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("Transform I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported transform: {0}")]
    Unsupported(String),
    #[error("Transform task failed: {0}")]
    Task(String),
}

/// Resize and frame-grab capability supplied by the host.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Write a JPEG of `source` scaled to `height` pixels (aspect preserved).
    async fn resize_to_height(&self, source: &Path, dest: &Path, height: u32) -> Result<(), TransformError>;

    /// Write a representative still frame of `video` as a JPEG.
    async fn extract_frame(&self, video: &Path, dest: &Path) -> Result<(), TransformError>;
}

/// [`MediaTransformer`] backed by the `image` crate.
///
/// Handles stills only; frame extraction needs a video decoder the host
/// provides, so [`ImageTransformer::extract_frame`] reports `Unsupported`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTransformer {
    filter: Filter,
}

#[derive(Debug, Clone, Copy, Default)]
enum Filter {
    #[default]
    Triangle,
    Lanczos3,
}

impl ImageTransformer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slower, sharper resampling.
    #[must_use]
    pub fn high_quality() -> Self {
        Self { filter: Filter::Lanczos3 }
    }

    fn filter_type(self) -> FilterType {
        match self.filter {
            Filter::Triangle => FilterType::Triangle,
            Filter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

fn resize_blocking(source: &Path, dest: &Path, height: u32, filter: FilterType) -> Result<(), TransformError> {
    let img = image::open(source)?;
    let target = height.max(1);
    let resized = img.resize(u32::MAX, target, filter);
    resized.to_rgb8().save_with_format(dest, ImageFormat::Jpeg)?;
    Ok(())
}

#[async_trait]
impl MediaTransformer for ImageTransformer {
    async fn resize_to_height(&self, source: &Path, dest: &Path, height: u32) -> Result<(), TransformError> {
        let source: PathBuf = source.to_path_buf();
        let dest: PathBuf = dest.to_path_buf();
        let filter = self.filter_type();

        tokio::task::spawn_blocking(move || resize_blocking(&source, &dest, height, filter))
            .await
            .map_err(|e| TransformError::Task(e.to_string()))?
    }

    async fn extract_frame(&self, video: &Path, _dest: &Path) -> Result<(), TransformError> {
        Err(TransformError::Unsupported(format!(
            "frame extraction from {}",
            video.display()
        )))
    }
}

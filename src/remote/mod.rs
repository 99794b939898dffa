// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Server-side interfaces: record creation and presigned binary upload.
//!
//! [`PhotoApi`] is the seam the orchestrator talks through. [`HttpPhotoApi`]
//! implements it against the GraphQL backend:
//!
//! ```text
//! phase 1   createPhoto(lat, lon, uuid, video)          → { id, createdAt, video }
//! phase 2   generateUploadUrl("{id}.upload", image/*)   → presigned URL for the image
//!           generateUploadUrl("{id}.mov",    video/*)   → presigned URL for the video
//!           PUT <url>  Content-Type: <type>  body      → 200
//! ```
//!
//! Presigned URLs are short-lived, so they are requested right before each
//! PUT attempt and never persisted. Only the record id survives phase 1.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::queue_item::RemoteRecord;
use crate::resilience::retry::Retryable;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Server rejected request: {0}")]
    Server(String),
    #[error("Account is banned: {0}")]
    Banned(String),
    #[error("Not authorized: {0}")]
    Unauthorized(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The request itself is malformed; resending it cannot succeed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Ban and authorization failures never succeed on retry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Banned(_) | Self::Unauthorized(_))
    }

    /// Classify a server-reported error message.
    #[must_use]
    pub fn from_server_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("banned") {
            Self::Banned(message.to_string())
        } else if lower.contains("unauthorized") || lower.contains("not authorized") {
            Self::Unauthorized(message.to_string())
        } else {
            Self::Server(message.to_string())
        }
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::InvalidRequest(_))
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Timeout(format!("{} after {:?}", operation, after))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Phase-1 request: who captured what, where.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub video: bool,
}

/// Server-owned photo record returned by phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePhoto {
    pub id: String,
    pub created_at: String,
    #[serde(default)]
    pub video: bool,
}

impl RemotePhoto {
    /// The part of the record the queue keeps.
    #[must_use]
    pub fn to_record(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Which binary of a record a presigned URL is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadTarget {
    /// The still image (cover frame for videos)
    Image,
    Video,
}

impl UploadTarget {
    /// Storage key the backend signs: `"{id}.upload"` or `"{id}.mov"`.
    #[must_use]
    pub fn asset_key(self, photo_id: &str) -> String {
        match self {
            Self::Image => format!("{}.upload", photo_id),
            Self::Video => format!("{}.mov", photo_id),
        }
    }
}

/// Backend calls the upload engine depends on.
#[async_trait]
pub trait PhotoApi: Send + Sync {
    /// Create the server record for one capture. Called once per item.
    async fn create_record(&self, request: &CreateRecordRequest) -> Result<RemotePhoto, ApiError>;

    /// Fresh single-use URL for one binary of an existing record.
    async fn upload_url(&self, photo_id: &str, target: UploadTarget, content_type: &str) -> Result<String, ApiError>;

    /// PUT raw bytes to a presigned URL. Only status 200 counts as success.
    async fn upload(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePhotoData {
    create_photo: CreatedPhoto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedPhoto {
    id: String,
    created_at: String,
    #[serde(default)]
    video: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlData {
    generate_upload_url: String,
}

const CREATE_PHOTO: &str = "mutation createPhoto($lat: Float!, $lon: Float!, $uuid: String!, $video: Boolean) {
  createPhoto(lat: $lat, lon: $lon, uuid: $uuid, video: $video) { id createdAt video }
}";

const GENERATE_UPLOAD_URL: &str = "query generateUploadUrl($assetKey: String!, $contentType: String!) {
  generateUploadUrl(assetKey: $assetKey, contentType: $contentType)
}";

/// [`PhotoApi`] over the GraphQL endpoint plus presigned PUTs.
#[derive(Clone)]
pub struct HttpPhotoApi {
    client: reqwest::Client,
    api_url: String,
}

impl HttpPhotoApi {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(format!("status {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }

        let parsed: GraphQlResponse<T> = response.json().await?;
        if let Some(first) = parsed.errors.first() {
            return Err(ApiError::from_server_message(&first.message));
        }
        parsed
            .data
            .ok_or_else(|| ApiError::InvalidResponse("response has no data".to_string()))
    }
}

#[async_trait]
impl PhotoApi for HttpPhotoApi {
    async fn create_record(&self, request: &CreateRecordRequest) -> Result<RemotePhoto, ApiError> {
        if request.device_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("device id must not be empty".to_string()));
        }

        let data: CreatePhotoData = self
            .graphql(
                CREATE_PHOTO,
                json!({
                    "lat": request.lat,
                    "lon": request.lon,
                    "uuid": request.device_id,
                    "video": request.video,
                }),
            )
            .await?;
        let created = data.create_photo;

        debug!(photo_id = %created.id, video = request.video, "Created remote record");
        Ok(RemotePhoto {
            id: created.id,
            created_at: created.created_at,
            video: created.video.unwrap_or(request.video),
        })
    }

    async fn upload_url(&self, photo_id: &str, target: UploadTarget, content_type: &str) -> Result<String, ApiError> {
        let data: UploadUrlData = self
            .graphql(
                GENERATE_UPLOAD_URL,
                json!({ "assetKey": target.asset_key(photo_id), "contentType": content_type }),
            )
            .await?;
        Ok(data.generate_upload_url)
    }

    async fn upload(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<(), ApiError> {
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        Ok(())
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Media host integration (avatars and cover images).
//!
//! Uploaded files are first staged on local disk, then pushed to the media
//! host, which returns the public URL stored on the user record.

use crate::config::Config;
use crate::error::AppError;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CLOUDINARY_API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
}

/// Uploads a local file to the media host.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, local_path: &Path) -> Result<UploadedMedia, AppError>;
}

/// A file written to the staging directory. Removed from disk when dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Write `bytes` to a uniquely named file in `dir`, keeping the original extension.
    pub async fn write(dir: &Path, original_name: &str, bytes: &[u8]) -> Result<Self, AppError> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating upload dir {}", dir.display()))?;

        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let path = dir.join(format!("{}{}", uuid::Uuid::new_v4(), extension));

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("staging upload {}", path.display()))?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staged upload");
            }
        }
    }
}

/// Upload a staged file and delete it locally, whatever the outcome.
pub async fn upload_staged(
    uploader: &dyn MediaUploader,
    staged: StagedFile,
) -> Result<UploadedMedia, AppError> {
    let result = uploader.upload(staged.path()).await;
    drop(staged);
    result
}

/// Cloudinary upload response (only the fields we use).
#[derive(Debug, Deserialize)]
struct CloudinaryUploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorResponse {
    error: CloudinaryErrorBody,
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorBody {
    message: String,
}

/// Cloudinary signed-upload client.
pub struct CloudinaryClient {
    http_client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinaryClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building media HTTP client")?;

        Ok(Self {
            http_client,
            cloud_name: config.cloudinary_cloud_name.clone(),
            api_key: config.cloudinary_api_key.clone(),
            api_secret: config.cloudinary_api_secret.clone(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/auto/upload", CLOUDINARY_API_BASE, self.cloud_name)
    }
}

/// SHA-256 upload signature over the signed parameters (here only `timestamp`).
fn sign_upload(timestamp: u64, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("timestamp={}{}", timestamp, api_secret).as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaUploader for CloudinaryClient {
    async fn upload(&self, local_path: &Path) -> Result<UploadedMedia, AppError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| AppError::Upload(format!("reading {}: {}", local_path.display(), e)))?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
            .as_secs();

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("signature", sign_upload(timestamp, &self.api_secret))
            .text("signature_algorithm", "sha256");

        let response = self
            .http_client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<CloudinaryErrorResponse>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| "no error body".to_string());
            tracing::warn!(status = %status, error = %message, "Media host rejected upload");
            return Err(AppError::Upload(format!("{}: {}", status, message)));
        }

        let body: CloudinaryUploadResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upload(format!("invalid response: {}", e)))?;

        let url = body
            .secure_url
            .or(body.url)
            .ok_or_else(|| AppError::Upload("response has no URL".to_string()))?;

        tracing::debug!(url = %url, "Media uploaded");
        Ok(UploadedMedia { url })
    }
}

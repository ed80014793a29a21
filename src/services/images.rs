use std::time::Duration;

use serde::Serialize;

use crate::{
    error::Result,
    storage::{ObjectStore, object_key, validate_object_key},
};

pub const DEFAULT_FILENAME: &str = "image";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A presigned upload slot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub upload_url: String,
    pub key: String,
    /// The `Content-Type` the PUT must carry; it is part of the signature.
    pub content_type: String,
    pub bucket: String,
    pub expires_in: u64,
    pub region: String,
}

/// A presigned download link.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTicket {
    pub download_url: String,
    pub expires_in: u64,
}

/// Allocates a fresh key under `prefix` and presigns a PUT for it.
pub async fn issue_upload_url(
    store: &dyn ObjectStore,
    prefix: &str,
    filename: Option<&str>,
    content_type: Option<&str>,
    expires: Duration,
) -> Result<UploadTicket> {
    let filename = filename.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_FILENAME);
    let content_type = content_type
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let key = object_key(prefix, filename);
    let upload_url = store.presign_put(&key, content_type, expires).await?;
    tracing::info!("📤 Upload URL issued for {}", key);

    Ok(UploadTicket {
        upload_url,
        key,
        content_type: content_type.to_string(),
        bucket: store.bucket().to_string(),
        expires_in: expires.as_secs(),
        region: store.region().to_string(),
    })
}

/// Presigns a GET for `key`, which must live under `prefix`.
pub async fn issue_download_url(
    store: &dyn ObjectStore,
    prefix: &str,
    key: Option<&str>,
    expires: Duration,
) -> Result<DownloadTicket> {
    let key = validate_object_key(key, prefix)?;
    let download_url = store.presign_get(&key, expires).await?;
    tracing::debug!("📥 Download URL issued for {}", key);

    Ok(DownloadTicket {
        download_url,
        expires_in: expires.as_secs(),
    })
}

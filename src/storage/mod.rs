//! Object side-channel for large binary payloads.
//!
//! The server never touches the bytes: it hands out short-lived presigned URLs
//! and the client talks to the bucket directly. Everything lives under one
//! temp prefix that the cleanup sweep empties on a schedule.

pub mod s3;
pub mod signer;

pub use s3::S3ObjectStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Prefix used when the configured one is blank.
pub const DEFAULT_TEMP_PREFIX: &str = "temp/";

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// An object store that can presign URLs and be swept.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Presigned PUT scoped to `key`.
    async fn presign_put(&self, key: &str, content_type: &str, expires: Duration)
    -> Result<String>;

    /// Presigned GET that downloads `key` as an attachment.
    async fn presign_get(&self, key: &str, expires: Duration) -> Result<String>;

    /// Every object under `prefix`, across all result pages.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;

    async fn delete(&self, key: &str) -> Result<()>;

    fn bucket(&self) -> &str;

    fn region(&self) -> &str;
}

/// Trims slashes and guarantees exactly one trailing `/`.
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_TEMP_PREFIX.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Replaces everything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.is_empty() { "image".to_string() } else { safe }
}

/// A fresh key under `prefix` for an upload named `filename`.
pub fn object_key(prefix: &str, filename: &str) -> String {
    format!("{}{}-{}", prefix, Uuid::new_v4(), sanitize_filename(filename))
}

/// Rejects keys outside the temp prefix so the download route cannot be used
/// to enumerate the rest of the bucket.
pub fn validate_object_key(key: Option<&str>, prefix: &str) -> Result<String> {
    match key {
        Some(key) if key.starts_with(prefix) && key.len() > prefix.len() => Ok(key.to_string()),
        _ => Err(AppError::BadRequest("Invalid or missing key".to_string())),
    }
}

/// The last path segment, used as the download filename.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

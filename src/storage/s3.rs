use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use super::signer::{Credentials, PresignRequest, presign_url};
use super::{ObjectStore, ObjectSummary, file_name_of};
use crate::{
    clock::Clock,
    config::ObjectStorageConfig,
    error::{AppError, Result},
};

/// Lifetime of the URLs the server signs for its own list/delete calls.
const INTERNAL_URL_TTL: Duration = Duration::from_secs(60);

/// How requests reach the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Addressing {
    /// `https://{bucket}.s3.{region}.amazonaws.com/{key}`
    VirtualHosted { host: String },
    /// `{scheme}://{endpoint}/{bucket}/{key}`, for MinIO and friends.
    PathStyle { scheme: String, host: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    last_modified: String,
}

/// An S3-compatible bucket accessed through presigned URLs only.
pub struct S3ObjectStore {
    http: reqwest::Client,
    credentials: Credentials,
    bucket: String,
    region: String,
    addressing: Addressing,
    clock: Arc<dyn Clock>,
}

impl S3ObjectStore {
    /// Creates a store from configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Bucket, region, endpoint and credentials.
    /// * `http` - Shared client; its timeout bounds every list/delete call.
    /// * `clock` - Signing time source.
    pub fn new(
        config: &ObjectStorageConfig,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let addressing = match &config.endpoint {
            Some(endpoint) => {
                let url = Url::parse(endpoint).map_err(|e| {
                    AppError::Configuration(format!("S3 endpoint {:?} ({})", endpoint, e))
                })?;
                let host = url.host_str().ok_or_else(|| {
                    AppError::Configuration(format!("S3 endpoint {:?} has no host", endpoint))
                })?;
                let host = match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                Addressing::PathStyle {
                    scheme: url.scheme().to_string(),
                    host,
                }
            }
            None => Addressing::VirtualHosted {
                host: format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
            },
        };

        Ok(Self {
            http,
            credentials: config.credentials.clone(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            addressing,
            clock,
        })
    }

    fn scheme(&self) -> &str {
        match &self.addressing {
            Addressing::VirtualHosted { .. } => "https",
            Addressing::PathStyle { scheme, .. } => scheme.as_str(),
        }
    }

    fn host(&self) -> &str {
        match &self.addressing {
            Addressing::VirtualHosted { host } | Addressing::PathStyle { host, .. } => {
                host.as_str()
            }
        }
    }

    /// Request path for `key`; the bucket root when `key` is empty.
    fn object_path(&self, key: &str) -> String {
        match &self.addressing {
            Addressing::VirtualHosted { .. } => format!("/{}", key),
            Addressing::PathStyle { .. } if key.is_empty() => format!("/{}", self.bucket),
            Addressing::PathStyle { .. } => format!("/{}/{}", self.bucket, key),
        }
    }

    fn sign(
        &self,
        method: &str,
        key: &str,
        query: Vec<(String, String)>,
        headers: Vec<(String, String)>,
        expires: Duration,
    ) -> Result<String> {
        let path = self.object_path(key);
        let request = PresignRequest {
            method,
            scheme: self.scheme(),
            host: self.host(),
            path: &path,
            query,
            headers,
            expires,
        };
        presign_url(&self.credentials, &self.region, &request, self.clock.now())
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListBucketResult> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let url = self.sign("GET", "", query, Vec::new(), INTERNAL_URL_TTL)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AppError::ObjectStorage(format!(
                "ListObjectsV2 on {} returned {}",
                self.bucket, status
            )));
        }

        parse_list_page(&body)
    }
}

fn parse_list_page(body: &str) -> Result<ListBucketResult> {
    quick_xml::de::from_str(body)
        .map_err(|e| AppError::ObjectStorage(format!("malformed ListObjectsV2 body: {}", e)))
}

fn summarize(objects: Vec<ListedObject>) -> Vec<ObjectSummary> {
    objects
        .into_iter()
        .filter_map(|o| match DateTime::parse_from_rfc3339(&o.last_modified) {
            Ok(ts) => Some(ObjectSummary {
                key: o.key,
                last_modified: ts.with_timezone(&Utc),
            }),
            Err(e) => {
                tracing::warn!("Skipping {} with unreadable LastModified: {}", o.key, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<String> {
        let headers = vec![("content-type".to_string(), content_type.to_string())];
        self.sign("PUT", key, Vec::new(), headers, expires)
    }

    async fn presign_get(&self, key: &str, expires: Duration) -> Result<String> {
        let disposition = format!("attachment; filename=\"{}\"", file_name_of(key));
        self.sign(
            "GET",
            key,
            vec![("response-content-disposition".to_string(), disposition)],
            Vec::new(),
            expires,
        )
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(prefix, token.as_deref()).await?;
            objects.extend(summarize(page.contents));

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(next)) => token = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.sign("DELETE", key, Vec::new(), Vec::new(), INTERNAL_URL_TTL)?;
        let response = self.http.delete(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::ObjectStorage(format!(
                "DeleteObject {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn region(&self) -> &str {
        &self.region
    }
}

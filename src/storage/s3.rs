//! S3-backed object store adapter.
//!
//! Wraps the AWS SDK client behind the [`ObjectStore`] capability, with a
//! bounded retry on transient failures and a dry-run mode that logs
//! side-effecting calls instead of performing them. The endpoint can be
//! pointed at any S3-compatible service via the `aws_endpoint_url`
//! environment variable.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ObjectStore, Result, StorageError};

/// Environment variable overriding the object store endpoint.
pub const ENDPOINT_ENV: &str = "aws_endpoint_url";

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Object store adapter over an S3-compatible service.
pub struct S3ObjectStore {
    client: Client,
    dry_run: bool,
}

impl S3ObjectStore {
    /// Build a client from the shared AWS configuration, optionally pinned
    /// to a named profile, honoring the `aws_endpoint_url` override.
    pub async fn new(aws_profile: &str, dry_run: bool) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if !aws_profile.trim().is_empty() {
            loader = loader.profile_name(aws_profile);
        }
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                loader = loader.endpoint_url(endpoint);
            }
        }
        let config = loader.load().await;
        Self {
            client: Client::new(&config),
            dry_run,
        }
    }

    async fn backoff(&self, attempt: usize, what: &str, err: &StorageError) {
        warn!(
            "[S3] {} failed (attempt {}/{}): {}",
            what, attempt, MAX_ATTEMPTS, err
        );
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str, suffix: Option<&str>) -> Result<Vec<String>> {
        let mut last_err = StorageError::Other("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if !prefix.trim().is_empty() {
                request = request.prefix(prefix);
            }
            let mut pages = request.into_paginator().send();
            let mut keys = Vec::new();
            let mut failed = None;
            while let Some(page) = pages.next().await {
                match page {
                    Ok(page) => {
                        for object in page.contents() {
                            if let Some(key) = object.key() {
                                if suffix.map_or(true, |s| key.ends_with(s)) {
                                    keys.push(key.to_string());
                                }
                            }
                        }
                    }
                    Err(e) => {
                        failed = Some(StorageError::ServiceUnavailable(e.to_string()));
                        break;
                    }
                }
            }
            match failed {
                None => return Ok(keys),
                Some(err) => {
                    self.backoff(attempt, "list", &err).await;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool> {
        let mut last_err = StorageError::Other("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => return Ok(true),
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_not_found() {
                        return Ok(false);
                    }
                    let err = StorageError::ServiceUnavailable(service_err.to_string());
                    self.backoff(attempt, "head", &err).await;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<(Vec<u8>, HashMap<String, String>)> {
        let mut last_err = StorageError::Other("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => {
                    let metadata = output.metadata().cloned().unwrap_or_default();
                    let body = output
                        .body
                        .collect()
                        .await
                        .map_err(|e| StorageError::Other(e.to_string()))?
                        .into_bytes()
                        .to_vec();
                    return Ok((body, metadata));
                }
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_no_such_key() {
                        return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
                    }
                    let err = StorageError::ServiceUnavailable(service_err.to_string());
                    self.backoff(attempt, "get", &err).await;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        if self.dry_run {
            debug!("[S3] Dry run: would upload {} to bucket {}", key, bucket);
            return Ok(());
        }
        let mut last_err = StorageError::Other("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(body.clone()))
                .content_type(content_type);
            if !metadata.is_empty() {
                request = request.set_metadata(Some(metadata.clone()));
            }
            match request.send().await {
                Ok(_) => {
                    debug!("[S3] Uploaded {} to bucket {}", key, bucket);
                    return Ok(());
                }
                Err(e) => {
                    let err = StorageError::ServiceUnavailable(e.to_string());
                    self.backoff(attempt, "put", &err).await;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        if self.dry_run {
            debug!(
                "[S3] Dry run: would copy {}/{} to {}/{}",
                src_bucket, src_key, dst_bucket, dst_key
            );
            return Ok(());
        }
        let mut last_err = StorageError::Other("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .client
                .copy_object()
                .copy_source(format!("{}/{}", src_bucket, src_key))
                .bucket(dst_bucket)
                .key(dst_key)
                .send()
                .await
            {
                Ok(_) => {
                    debug!(
                        "[S3] Copied {}/{} to {}/{}",
                        src_bucket, src_key, dst_bucket, dst_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    let err = StorageError::ServiceUnavailable(e.to_string());
                    self.backoff(attempt, "copy", &err).await;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        if self.dry_run {
            debug!("[S3] Dry run: would delete {} from bucket {}", key, bucket);
            return Ok(());
        }
        let mut last_err = StorageError::Other("no attempts made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err = StorageError::ServiceUnavailable(e.to_string());
                    self.backoff(attempt, "delete", &err).await;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn list_folder(&self, bucket: &str, folder: &str) -> Result<Vec<String>> {
        let folder = if folder.ends_with('/') {
            folder.to_string()
        } else {
            format!("{}/", folder)
        };
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&folder)
            .delimiter("/")
            .into_paginator()
            .send();
        let mut contents = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::ServiceUnavailable(e.to_string()))?;
            for common in page.common_prefixes() {
                if let Some(prefix) = common.prefix() {
                    contents.push(prefix.to_string());
                }
            }
            for object in page.contents() {
                if let Some(key) = object.key() {
                    contents.push(key.to_string());
                }
            }
        }
        Ok(contents)
    }
}

//! Edge cache capability and the CloudFront adapter.
//!
//! The invalidator only needs two operations from the CDN layer: resolving
//! a distribution from a domain, and submitting batched invalidations.

use async_trait::async_trait;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use aws_sdk_cloudfront::Client;
use tracing::{debug, warn};

use super::{Result, StorageError};

/// Batch size for invalidation requests without wildcards.
pub const INVALIDATION_BATCH_DEFAULT: usize = 3000;

/// Batch size when any requested path contains a wildcard.
pub const INVALIDATION_BATCH_WILDCARD: usize = 15;

/// Terminal status of a completed invalidation.
pub const INVALIDATION_STATUS_COMPLETED: &str = "Completed";

/// Status of one submitted invalidation batch.
#[derive(Debug, Clone)]
pub struct InvalidationStatus {
    /// The invalidation request id.
    pub id: String,
    /// The reported status, `Completed` when done.
    pub status: String,
}

/// Capability over the CDN layer fronting the artifact buckets.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Resolve the distribution id serving a domain, if any.
    async fn distribution_id(&self, domain: &str) -> Result<Option<String>>;

    /// Submit invalidations for the given paths in chunks of `batch_size`,
    /// returning the status of each submitted batch.
    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
        batch_size: usize,
    ) -> Result<Vec<InvalidationStatus>>;
}

/// The well-known domains served from each production bucket, used when a
/// target does not configure a domain of its own.
pub fn domain_for_bucket(bucket: &str) -> Option<&'static str> {
    match bucket {
        "prod-ga" | "prod-maven-ga" | "prod-ea" | "prod-maven-ea" => {
            Some("maven.repository.redhat.com")
        }
        "stage-ga" | "stage-maven-ga" | "stage-ea" | "stage-maven-ea" => {
            Some("maven.stage.repository.redhat.com")
        }
        "prod-npm" | "prod-npm-npmjs" => Some("npm.registry.redhat.com"),
        "stage-npm" | "stage-npm-npmjs" => Some("npm.stage.registry.redhat.com"),
        _ => None,
    }
}

/// Edge cache adapter over CloudFront.
pub struct CloudFrontCache {
    client: Client,
}

impl CloudFrontCache {
    /// Build a client from the shared AWS configuration, optionally pinned
    /// to a named profile.
    pub async fn new(aws_profile: &str) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if !aws_profile.trim().is_empty() {
            loader = loader.profile_name(aws_profile);
        }
        let config = loader.load().await;
        Self {
            client: Client::new(&config),
        }
    }
}

#[async_trait]
impl EdgeCache for CloudFrontCache {
    async fn distribution_id(&self, domain: &str) -> Result<Option<String>> {
        let output = self
            .client
            .list_distributions()
            .send()
            .await
            .map_err(|e| StorageError::ServiceUnavailable(e.to_string()))?;
        if let Some(list) = output.distribution_list() {
            for distribution in list.items() {
                let aliases = distribution
                    .aliases()
                    .map(|a| a.items())
                    .unwrap_or_default();
                if aliases.iter().any(|a| a == domain) {
                    return Ok(Some(distribution.id().to_string()));
                }
            }
        }
        Ok(None)
    }

    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
        batch_size: usize,
    ) -> Result<Vec<InvalidationStatus>> {
        let mut statuses = Vec::new();
        for (index, chunk) in paths.chunks(batch_size).enumerate() {
            debug!(
                "Invalidating batch {} with {} paths on distribution {}",
                index,
                chunk.len(),
                distribution_id
            );
            let caller_reference = format!(
                "charon-{}-{}",
                chrono::Utc::now().timestamp_millis(),
                index
            );
            let batch_paths = Paths::builder()
                .quantity(chunk.len() as i32)
                .set_items(Some(chunk.to_vec()))
                .build()
                .map_err(|e| StorageError::Other(e.to_string()))?;
            let batch = InvalidationBatch::builder()
                .paths(batch_paths)
                .caller_reference(caller_reference)
                .build()
                .map_err(|e| StorageError::Other(e.to_string()))?;
            match self
                .client
                .create_invalidation()
                .distribution_id(distribution_id)
                .invalidation_batch(batch)
                .send()
                .await
            {
                Ok(output) => {
                    if let Some(invalidation) = output.invalidation() {
                        statuses.push(InvalidationStatus {
                            id: invalidation.id().to_string(),
                            status: invalidation.status().to_string(),
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Invalidation batch {} on distribution {} failed: {}",
                        index, distribution_id, e
                    );
                    return Err(StorageError::ServiceUnavailable(e.to_string()));
                }
            }
        }
        Ok(statuses)
    }
}

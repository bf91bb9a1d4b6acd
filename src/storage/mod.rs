//! Object store and edge cache capabilities.
//!
//! The publishing pipeline talks to remote storage exclusively through the
//! [`ObjectStore`] trait, and to the CDN through [`cloudfront::EdgeCache`].
//! Production runs use the AWS-backed adapters; tests run against the
//! in-memory store.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod cloudfront;
pub mod memory;
pub mod s3;

pub use cloudfront::{CloudFrontCache, EdgeCache, InvalidationStatus};
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Content type recorded when none can be guessed from the file name.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Object metadata key holding the SHA-1 checksum of the body.
pub const CHECKSUM_META_KEY: &str = "checksum";

/// Default worker pool width for each upload phase.
pub const DEFAULT_CONCURRENT_LIMIT: usize = 10;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by storage backends. `NotFound` is kept separate from
/// the transient kinds because existence probing drives upload decisions.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or kept failing after retries.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The backend rejected the credentials for this operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Local I/O error while streaming bodies.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

/// Capability over an S3-compatible object store.
///
/// All side-effecting operations honor the adapter's dry-run mode: they
/// log the would-be action and return success without calling through.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List keys under a prefix, optionally filtered by suffix.
    async fn list(&self, bucket: &str, prefix: &str, suffix: Option<&str>) -> Result<Vec<String>>;

    /// Whether a key exists. `Ok(false)` means a definite miss; transient
    /// failures surface as errors so callers never mistake them for one.
    async fn head(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Fetch an object's body and user metadata.
    async fn get(&self, bucket: &str, key: &str) -> Result<(Vec<u8>, HashMap<String, String>)>;

    /// Store an object with a content type and user metadata.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Server-side copy between buckets.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;

    /// Delete a key.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// List the immediate contents of a folder, using `/` as delimiter.
    /// Yields both sub-prefixes (with a trailing `/`) and leaf keys; not
    /// recursive.
    async fn list_folder(&self, bucket: &str, folder: &str) -> Result<Vec<String>>;
}

/// Join an in-bucket prefix and a repository-relative path into a key.
pub fn join_key(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let rel = rel.trim_start_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", prefix, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("ga", "org/foo/bar.jar"), "ga/org/foo/bar.jar");
        assert_eq!(join_key("", "org/foo/bar.jar"), "org/foo/bar.jar");
        assert_eq!(join_key("ga/", "/org/foo"), "ga/org/foo");
    }
}

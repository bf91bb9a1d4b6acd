//! The upload engine and the product-ref registry.
//!
//! Artifact uploads are idempotent and never overwrite an existing body:
//! an existing key is reconciled against the local file's SHA-1 and, when
//! the checksums agree, the uploading product is added to the key's
//! `.prodinfo` sidecar. The first target is the primary; secondaries are
//! populated with server-side copies from it. Generated fixtures
//! (metadata, digests, catalogs) are uploaded with an empty product so no
//! ref-counting is performed on them.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::checksum;
use crate::config::Target;
use crate::storage::{
    join_key, ObjectStore, Result as StorageResult, CHECKSUM_META_KEY, DEFAULT_MIME_TYPE,
};
use crate::PROD_INFO_SUFFIX;

/// The upload engine, bound to one object store and a worker pool width.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    con_limit: usize,
}

impl Uploader {
    /// Create an engine over the given store with the given per-phase
    /// concurrency limit.
    pub fn new(store: Arc<dyn ObjectStore>, con_limit: usize) -> Self {
        Self {
            store,
            con_limit: con_limit.max(1),
        }
    }

    /// Upload a list of files to the configured targets.
    ///
    /// The object key is the file path cut down against `root`. New keys
    /// are stored with a `checksum` metadata entry and a `.prodinfo`
    /// sidecar naming the owning product; existing keys are never
    /// overwritten, only reconciled. Returns the paths that failed.
    pub async fn upload_files(
        &self,
        file_paths: &[PathBuf],
        targets: &[Target],
        product: &str,
        root: &Path,
    ) -> Vec<PathBuf> {
        if targets.is_empty() {
            warn!("No targets configured, nothing to upload");
            return Vec::new();
        }
        let total = file_paths.len();
        stream::iter(file_paths.iter().enumerate())
            .map(|(index, path)| async move {
                if self
                    .upload_one(path, index + 1, total, targets, product, root)
                    .await
                {
                    None
                } else {
                    Some(path.clone())
                }
            })
            .buffer_unordered(self.con_limit)
            .filter_map(|failed| async move { failed })
            .collect()
            .await
    }

    async fn upload_one(
        &self,
        full_path: &Path,
        index: usize,
        total: usize,
        targets: &[Target],
        product: &str,
        root: &Path,
    ) -> bool {
        if !full_path.is_file() {
            warn!(
                "[S3] Warning: file {} does not exist during uploading. Product: {}",
                full_path.display(),
                product
            );
            return false;
        }
        let rel = cut_path(full_path, root);
        let primary = &targets[0];
        let main_key = join_key(&primary.prefix, &rel);
        debug!(
            "[S3] ({}/{}) Uploading {} to bucket {}",
            index,
            total,
            full_path.display(),
            primary.bucket
        );

        let sha1 = match checksum::read_sha1(full_path) {
            Ok(sha1) => sha1,
            Err(e) => {
                error!(
                    "[S3] Error: can not read checksum of {}: {}",
                    full_path.display(),
                    e
                );
                return false;
            }
        };

        match self.store.head(&primary.bucket, &main_key).await {
            Ok(false) => {
                let body = match tokio::fs::read(full_path).await {
                    Ok(body) => body,
                    Err(e) => {
                        error!("[S3] Error: can not read file {}: {}", full_path.display(), e);
                        return false;
                    }
                };
                let mut metadata = HashMap::new();
                metadata.insert(CHECKSUM_META_KEY.to_string(), sha1.clone());
                if let Err(e) = self
                    .store
                    .put(
                        &primary.bucket,
                        &main_key,
                        body,
                        &guess_content_type(full_path),
                        metadata,
                    )
                    .await
                {
                    error!(
                        "[S3] ERROR: file {} not uploaded to bucket {}: {}",
                        full_path.display(),
                        primary.bucket,
                        e
                    );
                    return false;
                }
                if !product.is_empty() {
                    if let Err(e) = self
                        .put_product_refs(&primary.bucket, &main_key, &[product.to_string()])
                        .await
                    {
                        error!(
                            "[S3] ERROR: failed to record product info for {}: {}",
                            main_key, e
                        );
                        return false;
                    }
                }
                debug!("[S3] Uploaded {} to bucket {}", rel, primary.bucket);
            }
            Ok(true) => {
                // A primary-side failure is not propagated to secondaries.
                if !self
                    .reconcile_existing(&sha1, &primary.bucket, &main_key, product)
                    .await
                {
                    return false;
                }
            }
            Err(e) => {
                error!("[S3] Error: file existence check failed: {}", e);
                return false;
            }
        }

        let mut ok = true;
        for target in &targets[1..] {
            let extra_key = join_key(&target.prefix, &rel);
            debug!(
                "Copying {} from bucket {} to bucket {}",
                rel, primary.bucket, target.bucket
            );
            match self.store.head(&target.bucket, &extra_key).await {
                Ok(false) => {
                    if let Err(e) = self
                        .store
                        .copy(&primary.bucket, &main_key, &target.bucket, &extra_key)
                        .await
                    {
                        error!(
                            "[S3] ERROR: copying failure happened for file {} to bucket {}: {}",
                            rel, target.bucket, e
                        );
                        ok = false;
                        continue;
                    }
                    if !product.is_empty() {
                        if let Err(e) = self
                            .put_product_refs(&target.bucket, &extra_key, &[product.to_string()])
                            .await
                        {
                            error!(
                                "[S3] ERROR: failed to record product info for {}: {}",
                                extra_key, e
                            );
                            ok = false;
                        }
                    }
                }
                Ok(true) => {
                    if !self
                        .reconcile_existing(&sha1, &target.bucket, &extra_key, product)
                        .await
                    {
                        ok = false;
                    }
                }
                Err(e) => {
                    error!("[S3] Error: file existence check failed: {}", e);
                    ok = false;
                }
            }
        }
        ok
    }

    /// Reconcile an already-present key: verify the stored checksum against
    /// the local file and union the uploading product into the sidecar. The
    /// body is never overwritten.
    async fn reconcile_existing(&self, sha1: &str, bucket: &str, key: &str, product: &str) -> bool {
        debug!(
            "File {} already exists in bucket {}, check if need to update product.",
            key, bucket
        );
        let metadata = match self.store.get(bucket, key).await {
            Ok((_, metadata)) => metadata,
            Err(e) => {
                error!("[S3] Can not get object for {}: {}", key, e);
                return false;
            }
        };
        if let Some(stored) = metadata.get(CHECKSUM_META_KEY) {
            if !stored.trim().is_empty() && stored.trim() != sha1 {
                warn!(
                    "Warning: checksum check failed. The file {} is different from the one in bucket {}. Product: {}",
                    key, bucket, product
                );
                return false;
            }
        }
        if product.is_empty() {
            return true;
        }
        let (mut products, _) = self.product_refs(bucket, key).await;
        if !products.iter().any(|p| p == product) {
            debug!("File {} has new product, updating the product {}", key, product);
            products.push(product.to_string());
            if let Err(e) = self.put_product_refs(bucket, key, &products).await {
                error!("[S3] ERROR: failed to update product info for {}: {}", key, e);
                return false;
            }
        }
        true
    }

    /// Read the product set owning a key from its `.prodinfo` sidecar.
    /// Returns `(products, found)`; a missing sidecar is `(empty, false)`.
    pub async fn product_refs(&self, bucket: &str, key: &str) -> (Vec<String>, bool) {
        let info_key = format!("{}{}", key, PROD_INFO_SUFFIX);
        match self.store.get(bucket, &info_key).await {
            Ok((body, _)) => {
                let content = String::from_utf8_lossy(&body);
                let products = content
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                debug!("[S3] Got product information as below {:?}", products);
                (products, true)
            }
            Err(e) => {
                debug!("[S3] Can not get product info for file {}: {}", key, e);
                (Vec::new(), false)
            }
        }
    }

    /// Overwrite the `.prodinfo` sidecar of a key with the given products.
    pub async fn put_product_refs(
        &self,
        bucket: &str,
        key: &str,
        products: &[String],
    ) -> StorageResult<()> {
        let info_key = format!("{}{}", key, PROD_INFO_SUFFIX);
        let body = products.join(", ").into_bytes();
        let mut metadata = HashMap::new();
        metadata.insert(
            CHECKSUM_META_KEY.to_string(),
            checksum::digest_bytes(&body, checksum::HashAlgorithm::Sha1),
        );
        self.store
            .put(bucket, &info_key, body, "text/plain", metadata)
            .await
    }

    /// Upload generated fixture files (aggregated metadata, digest
    /// sidecars, catalogs) to a target. Fixtures are regenerated on every
    /// release, so existing keys are overwritten and no product refs are
    /// recorded. Returns the paths that failed.
    pub async fn upload_metadatas(
        &self,
        meta_paths: &[PathBuf],
        target: &Target,
        root: &Path,
    ) -> Vec<PathBuf> {
        stream::iter(meta_paths.iter())
            .map(|path| async move {
                if self.upload_fixture(path, target, root, true).await {
                    None
                } else {
                    Some(path.clone())
                }
            })
            .buffer_unordered(self.con_limit)
            .filter_map(|failed| async move { failed })
            .collect()
            .await
    }

    /// Upload detached signature files to a target. Signatures for keys
    /// that already exist remotely are left untouched. Returns the paths
    /// that failed.
    pub async fn upload_signatures(
        &self,
        signature_paths: &[PathBuf],
        target: &Target,
        root: &Path,
    ) -> Vec<PathBuf> {
        stream::iter(signature_paths.iter())
            .map(|path| async move {
                if self.upload_fixture(path, target, root, false).await {
                    None
                } else {
                    Some(path.clone())
                }
            })
            .buffer_unordered(self.con_limit)
            .filter_map(|failed| async move { failed })
            .collect()
            .await
    }

    async fn upload_fixture(
        &self,
        full_path: &Path,
        target: &Target,
        root: &Path,
        overwrite: bool,
    ) -> bool {
        let rel = cut_path(full_path, root);
        let key = join_key(&target.prefix, &rel);
        if !overwrite {
            match self.store.head(&target.bucket, &key).await {
                Ok(true) => {
                    debug!("File {} already exists in bucket {}, skipped", key, target.bucket);
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("[S3] Error: file existence check failed: {}", e);
                    return false;
                }
            }
        }
        let body = match tokio::fs::read(full_path).await {
            Ok(body) => body,
            Err(e) => {
                error!("[S3] Error: can not read file {}: {}", full_path.display(), e);
                return false;
            }
        };
        let sha1 = checksum::digest_bytes(&body, checksum::HashAlgorithm::Sha1);
        let mut metadata = HashMap::new();
        metadata.insert(CHECKSUM_META_KEY.to_string(), sha1);
        if let Err(e) = self
            .store
            .put(
                &target.bucket,
                &key,
                body,
                &guess_content_type(full_path),
                metadata,
            )
            .await
        {
            error!(
                "[S3] ERROR: file {} not uploaded to bucket {}: {}",
                full_path.display(),
                target.bucket,
                e
            );
            return false;
        }
        debug!("[S3] Uploaded {} to bucket {}", key, target.bucket);
        true
    }

    /// Delete generated fixture keys (repository-relative) from a target.
    /// Missing keys are skipped. Returns the keys that failed to delete.
    pub async fn delete_metadatas(&self, rel_keys: &[String], target: &Target) -> Vec<String> {
        let mut failed = Vec::new();
        for rel in rel_keys {
            let key = join_key(&target.prefix, rel);
            match self.store.head(&target.bucket, &key).await {
                Ok(true) => {
                    if let Err(e) = self.store.delete(&target.bucket, &key).await {
                        error!(
                            "[S3] ERROR: can not delete {} from bucket {}: {}",
                            key, target.bucket, e
                        );
                        failed.push(rel.clone());
                    } else {
                        info!("[S3] Deleted {} from bucket {}", key, target.bucket);
                    }
                }
                Ok(false) => {
                    debug!(
                        "File {} does not exist in bucket {}, skip deletion.",
                        key, target.bucket
                    );
                }
                Err(e) => {
                    error!("[S3] Error: file existence check failed: {}", e);
                    failed.push(rel.clone());
                }
            }
        }
        failed
    }

    /// Upload the per-release manifest into the manifest bucket, under a
    /// folder named after the target bucket.
    pub async fn upload_manifest(
        &self,
        manifest_name: &str,
        manifest_path: &Path,
        folder: &str,
        manifest_bucket: &str,
    ) -> bool {
        let key = join_key(folder, manifest_name);
        let body = match tokio::fs::read(manifest_path).await {
            Ok(body) => body,
            Err(e) => {
                error!(
                    "[S3] Error: can not read manifest {}: {}",
                    manifest_path.display(),
                    e
                );
                return false;
            }
        };
        let mut metadata = HashMap::new();
        metadata.insert(
            CHECKSUM_META_KEY.to_string(),
            checksum::digest_bytes(&body, checksum::HashAlgorithm::Sha1),
        );
        if let Err(e) = self
            .store
            .put(manifest_bucket, &key, body, "text/plain", metadata)
            .await
        {
            error!(
                "[S3] ERROR: manifest {} not uploaded to bucket {}: {}",
                key, manifest_bucket, e
            );
            return false;
        }
        true
    }
}

/// Cut a file path down against the repository root to get the
/// repository-relative path used as the object key suffix.
fn cut_path(full_path: &Path, root: &Path) -> String {
    full_path
        .strip_prefix(root)
        .unwrap_or(full_path)
        .to_string_lossy()
        .trim_start_matches('/')
        .to_string()
}

fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use tempfile::TempDir;

    fn target(bucket: &str, prefix: &str) -> Target {
        Target {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            registry: "localhost".to_string(),
            domain: String::new(),
        }
    }

    fn write_artifact(root: &Path, rel: &str, body: &[u8]) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_new_file_records_checksum_and_product() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(dir.path(), "org/foo/1.0/foo-1.0.jar", b"jar bytes");
        let store = Arc::new(MemoryObjectStore::new());
        let uploader = Uploader::new(store.clone(), 2);

        let failed = uploader
            .upload_files(
                &[artifact],
                &[target("bucket", "ga")],
                "product-a",
                dir.path(),
            )
            .await;
        assert!(failed.is_empty());
        assert_eq!(
            store.body("bucket", "ga/org/foo/1.0/foo-1.0.jar").unwrap(),
            b"jar bytes"
        );
        let metadata = store
            .metadata("bucket", "ga/org/foo/1.0/foo-1.0.jar")
            .unwrap();
        assert_eq!(
            metadata.get(CHECKSUM_META_KEY).map(String::as_str),
            Some(checksum::digest_bytes(b"jar bytes", checksum::HashAlgorithm::Sha1).as_str())
        );
        let prodinfo = store
            .body("bucket", "ga/org/foo/1.0/foo-1.0.jar.prodinfo")
            .unwrap();
        assert_eq!(prodinfo, b"product-a");
    }

    #[tokio::test]
    async fn test_reupload_unions_products_without_touching_body() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(dir.path(), "org/foo/1.0/foo-1.0.jar", b"jar bytes");
        let store = Arc::new(MemoryObjectStore::new());
        let uploader = Uploader::new(store.clone(), 2);
        let targets = [target("bucket", "ga")];

        let failed = uploader
            .upload_files(std::slice::from_ref(&artifact), &targets, "product-a", dir.path())
            .await;
        assert!(failed.is_empty());
        let failed = uploader
            .upload_files(std::slice::from_ref(&artifact), &targets, "product-b", dir.path())
            .await;
        assert!(failed.is_empty());

        let prodinfo = store
            .body("bucket", "ga/org/foo/1.0/foo-1.0.jar.prodinfo")
            .unwrap();
        assert_eq!(String::from_utf8(prodinfo).unwrap(), "product-a, product-b");

        // Re-uploading an already-owned file changes nothing.
        let failed = uploader
            .upload_files(std::slice::from_ref(&artifact), &targets, "product-a", dir.path())
            .await;
        assert!(failed.is_empty());
        let prodinfo = store
            .body("bucket", "ga/org/foo/1.0/foo-1.0.jar.prodinfo")
            .unwrap();
        assert_eq!(String::from_utf8(prodinfo).unwrap(), "product-a, product-b");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_marks_failed_and_preserves_state() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(dir.path(), "org/foo/1.0/foo-1.0.jar", b"local bytes");
        let store = Arc::new(MemoryObjectStore::new());
        let mut metadata = HashMap::new();
        metadata.insert(CHECKSUM_META_KEY.to_string(), "deadbeef".to_string());
        store
            .put(
                "bucket",
                "ga/org/foo/1.0/foo-1.0.jar",
                b"remote bytes".to_vec(),
                DEFAULT_MIME_TYPE,
                metadata,
            )
            .await
            .unwrap();
        store
            .put(
                "bucket",
                "ga/org/foo/1.0/foo-1.0.jar.prodinfo",
                b"other-product".to_vec(),
                "text/plain",
                HashMap::new(),
            )
            .await
            .unwrap();

        let uploader = Uploader::new(store.clone(), 2);
        let failed = uploader
            .upload_files(
                &[artifact.clone()],
                &[target("bucket", "ga")],
                "product-a",
                dir.path(),
            )
            .await;
        assert_eq!(failed, vec![artifact]);
        assert_eq!(
            store.body("bucket", "ga/org/foo/1.0/foo-1.0.jar").unwrap(),
            b"remote bytes"
        );
        assert_eq!(
            store
                .body("bucket", "ga/org/foo/1.0/foo-1.0.jar.prodinfo")
                .unwrap(),
            b"other-product"
        );
    }

    #[tokio::test]
    async fn test_secondary_target_copied_from_primary() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(dir.path(), "org/foo/1.0/foo-1.0.jar", b"jar bytes");
        let store = Arc::new(MemoryObjectStore::new());
        let uploader = Uploader::new(store.clone(), 2);

        let failed = uploader
            .upload_files(
                &[artifact],
                &[target("primary", "ga"), target("secondary", "ga")],
                "product-a",
                dir.path(),
            )
            .await;
        assert!(failed.is_empty());
        assert_eq!(
            store.body("secondary", "ga/org/foo/1.0/foo-1.0.jar").unwrap(),
            b"jar bytes"
        );
        assert_eq!(
            store
                .body("secondary", "ga/org/foo/1.0/foo-1.0.jar.prodinfo")
                .unwrap(),
            b"product-a"
        );
    }

    #[tokio::test]
    async fn test_sidecar_sha1_short_circuits_digest() {
        let dir = TempDir::new().unwrap();
        let artifact = write_artifact(dir.path(), "org/foo/1.0/foo-1.0.jar", b"jar bytes");
        // The sidecar carries a bogus hash; the engine must trust it.
        write_artifact(dir.path(), "org/foo/1.0/foo-1.0.jar.sha1", b"cafef00d");
        let store = Arc::new(MemoryObjectStore::new());
        let uploader = Uploader::new(store.clone(), 2);

        let failed = uploader
            .upload_files(
                &[artifact],
                &[target("bucket", "ga")],
                "product-a",
                dir.path(),
            )
            .await;
        assert!(failed.is_empty());
        let metadata = store
            .metadata("bucket", "ga/org/foo/1.0/foo-1.0.jar")
            .unwrap();
        assert_eq!(
            metadata.get(CHECKSUM_META_KEY).map(String::as_str),
            Some("cafef00d")
        );
    }

    #[tokio::test]
    async fn test_fixture_upload_skips_refcounting() {
        let dir = TempDir::new().unwrap();
        let meta = write_artifact(dir.path(), "org/foo/maven-metadata.xml", b"<metadata/>");
        let store = Arc::new(MemoryObjectStore::new());
        let uploader = Uploader::new(store.clone(), 2);

        let failed = uploader
            .upload_metadatas(&[meta], &target("bucket", "ga"), dir.path())
            .await;
        assert!(failed.is_empty());
        assert!(store.body("bucket", "ga/org/foo/maven-metadata.xml").is_some());
        assert!(store
            .body("bucket", "ga/org/foo/maven-metadata.xml.prodinfo")
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_metadatas() {
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put(
                "bucket",
                "ga/org/foo/maven-metadata.xml",
                b"x".to_vec(),
                "text/xml",
                HashMap::new(),
            )
            .await
            .unwrap();
        let uploader = Uploader::new(store.clone(), 2);
        let failed = uploader
            .delete_metadatas(
                &[
                    "org/foo/maven-metadata.xml".to_string(),
                    "org/foo/maven-metadata.xml.md5".to_string(),
                ],
                &target("bucket", "ga"),
            )
            .await;
        assert!(failed.is_empty());
        assert!(store.body("bucket", "ga/org/foo/maven-metadata.xml").is_none());
    }
}

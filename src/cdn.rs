//! Edge cache invalidation for uploaded keys.
//!
//! Aggregated metadata keys are collapsed to wildcard paths so one
//! invalidation covers the body and its digest sidecars; explicit sidecar
//! keys are dropped as subsumed. Batches shrink when wildcards are present
//! because the CDN rations wildcard invalidations much more tightly.

use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::Target;
use crate::storage::cloudfront::{
    domain_for_bucket, EdgeCache, InvalidationStatus, INVALIDATION_BATCH_DEFAULT,
    INVALIDATION_BATCH_WILDCARD, INVALIDATION_STATUS_COMPLETED,
};
use crate::maven::{MAVEN_ARCH_FILE, MAVEN_METADATA_FILE};

/// Suffixes of digest sidecar keys that are subsumed by a wildcard.
const HASH_SUFFIXES: &[&str] = &[".md5", ".sha1", ".sha128", ".sha256"];

/// Collapse metadata paths for invalidation: metadata and catalog keys
/// become `<name>.*` wildcards, their digest sidecars are dropped, and
/// everything else passes through unchanged.
pub fn wildcard_metadata_paths(paths: &[String]) -> Vec<String> {
    let mut collapsed = Vec::new();
    for path in paths {
        if path.ends_with(MAVEN_METADATA_FILE) || path.ends_with(MAVEN_ARCH_FILE) {
            collapsed.push(format!("{}.*", path.trim_end_matches(".xml")));
        } else if HASH_SUFFIXES.iter().any(|s| path.ends_with(s)) {
            continue;
        } else {
            collapsed.push(path.clone());
        }
    }
    collapsed
}

/// Invalidate the edge cache for the given scratch-side paths on one
/// target: collapse metadata paths to wildcards, cut them down against the
/// repository root, join the target prefix, resolve the distribution and
/// submit in batches. Batch statuses other than `Completed` are reported.
pub async fn invalidate_paths(
    cache: &dyn EdgeCache,
    target: &Target,
    invalidate_paths: &[String],
    root: &Path,
) -> Vec<InvalidationStatus> {
    info!("Invalidating CF cache for {}", target.bucket);
    let collapsed = wildcard_metadata_paths(invalidate_paths);

    let mut slash_root = root.to_string_lossy().into_owned();
    if !slash_root.ends_with('/') {
        slash_root.push('/');
    }
    let prefix = target.prefix.trim_matches('/');
    let final_paths: Vec<String> = collapsed
        .iter()
        .map(|path| {
            let rel = path.strip_prefix(&slash_root).unwrap_or(path);
            if prefix.is_empty() {
                format!("/{}", rel.trim_start_matches('/'))
            } else {
                format!("/{}/{}", prefix, rel.trim_start_matches('/'))
            }
        })
        .collect();
    debug!(
        "Invalidating paths: {:?}, size: {}",
        final_paths,
        final_paths.len()
    );
    if final_paths.is_empty() {
        return Vec::new();
    }

    let domain = if target.domain.trim().is_empty() {
        domain_for_bucket(&target.bucket).map(str::to_string)
    } else {
        Some(target.domain.clone())
    };
    let Some(domain) = domain else {
        error!(
            "CF invalidating will not be performed because domain not found for bucket {}.",
            target.bucket
        );
        return Vec::new();
    };

    let distribution_id = match cache.distribution_id(&domain).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            error!("No distribution found for domain {}.", domain);
            return Vec::new();
        }
        Err(e) => {
            error!("Cannot do CF cache invalidating due to error: {}", e);
            return Vec::new();
        }
    };

    let batch_size = if final_paths.iter().any(|p| p.contains('*')) {
        INVALIDATION_BATCH_WILDCARD
    } else {
        INVALIDATION_BATCH_DEFAULT
    };
    match cache
        .invalidate(&distribution_id, &final_paths, batch_size)
        .await
    {
        Ok(statuses) => {
            let non_completed: Vec<&str> = statuses
                .iter()
                .filter(|s| s.status != INVALIDATION_STATUS_COMPLETED)
                .map(|s| s.id.as_str())
                .collect();
            if !non_completed.is_empty() {
                info!(
                    "The CF invalidating requests done, following requests are not completed \
                     yet: {:?}. Please use 'cf check' command to check their details.",
                    non_completed
                );
            }
            statuses
        }
        Err(e) => {
            warn!("CF invalidation request failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_wildcard_collapse() {
        let paths = vec![
            "/tmp/x/org/foo/maven-metadata.xml".to_string(),
            "/tmp/x/org/foo/maven-metadata.xml.sha1".to_string(),
            "/tmp/x/org/foo/bar.jar".to_string(),
        ];
        let collapsed = wildcard_metadata_paths(&paths);
        assert_eq!(
            collapsed,
            vec![
                "/tmp/x/org/foo/maven-metadata.*".to_string(),
                "/tmp/x/org/foo/bar.jar".to_string(),
            ]
        );
    }

    #[test]
    fn test_wildcard_collapse_archetype() {
        let paths = vec![
            "/tmp/x/archetype-catalog.xml".to_string(),
            "/tmp/x/archetype-catalog.xml.md5".to_string(),
            "/tmp/x/archetype-catalog.xml.sha256".to_string(),
        ];
        assert_eq!(
            wildcard_metadata_paths(&paths),
            vec!["/tmp/x/archetype-catalog.*".to_string()]
        );
    }

    struct RecordingCache {
        batches: Mutex<Vec<(String, Vec<String>, usize)>>,
    }

    #[async_trait]
    impl EdgeCache for RecordingCache {
        async fn distribution_id(
            &self,
            _domain: &str,
        ) -> crate::storage::Result<Option<String>> {
            Ok(Some("DIST123".to_string()))
        }

        async fn invalidate(
            &self,
            distribution_id: &str,
            paths: &[String],
            batch_size: usize,
        ) -> crate::storage::Result<Vec<InvalidationStatus>> {
            self.batches.lock().unwrap().push((
                distribution_id.to_string(),
                paths.to_vec(),
                batch_size,
            ));
            Ok(vec![InvalidationStatus {
                id: "INV1".to_string(),
                status: INVALIDATION_STATUS_COMPLETED.to_string(),
            }])
        }
    }

    fn target_with_domain() -> Target {
        Target {
            bucket: "bucket".to_string(),
            prefix: "ga".to_string(),
            registry: "localhost".to_string(),
            domain: "maven.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invalidate_paths_wildcards_and_prefixes() {
        let cache = RecordingCache {
            batches: Mutex::new(Vec::new()),
        };
        let paths = vec![
            "/tmp/x/org/foo/maven-metadata.xml".to_string(),
            "/tmp/x/org/foo/maven-metadata.xml.sha1".to_string(),
            "/tmp/x/org/foo/bar.jar".to_string(),
        ];
        let statuses = invalidate_paths(
            &cache,
            &target_with_domain(),
            &paths,
            Path::new("/tmp/x"),
        )
        .await;
        assert_eq!(statuses.len(), 1);
        let batches = cache.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let (dist, submitted, batch_size) = &batches[0];
        assert_eq!(dist, "DIST123");
        assert_eq!(
            submitted,
            &vec![
                "/ga/org/foo/maven-metadata.*".to_string(),
                "/ga/org/foo/bar.jar".to_string(),
            ]
        );
        // Any wildcard shrinks the batch size.
        assert_eq!(*batch_size, INVALIDATION_BATCH_WILDCARD);
    }

    #[tokio::test]
    async fn test_invalidate_paths_without_domain_is_noop() {
        let cache = RecordingCache {
            batches: Mutex::new(Vec::new()),
        };
        let mut target = target_with_domain();
        target.domain = String::new();
        target.bucket = "dev-unknown".to_string();
        let statuses = invalidate_paths(
            &cache,
            &target,
            &["/tmp/x/a.jar".to_string()],
            Path::new("/tmp/x"),
        )
        .await;
        assert!(statuses.is_empty());
        assert!(cache.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_default_batch_without_wildcards() {
        let cache = RecordingCache {
            batches: Mutex::new(Vec::new()),
        };
        invalidate_paths(
            &cache,
            &target_with_domain(),
            &["/tmp/x/org/foo/bar.jar".to_string()],
            Path::new("/tmp/x"),
        )
        .await;
        let batches = cache.batches.lock().unwrap();
        assert_eq!(batches[0].2, INVALIDATION_BATCH_DEFAULT);
    }
}

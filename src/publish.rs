//! The Maven release publisher.
//!
//! Drives a release run end to end: extract, scan, upload artifacts to
//! every target, then per target regenerate and upload the aggregated
//! metadata, reconcile the archetype catalog, emit signatures and the
//! manifest, and invalidate the edge cache. Once uploading has started no
//! failure aborts the run; failures accumulate into per-target reports
//! and flip the overall result.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::archive::extract_archive;
use crate::cdn;
use crate::checksum;
use crate::config::{CharonConfig, Target};
use crate::error::{CharonError, Result};
use crate::maven::{archetype, metadata, MAVEN_ARCH_FILE};
use crate::scan::scan_paths;
use crate::sign;
use crate::storage::{EdgeCache, ObjectStore};
use crate::upload::Uploader;
use crate::PACKAGE_TYPE_MAVEN;

/// Per-invocation inputs of a Maven release upload.
#[derive(Debug, Clone)]
pub struct MavenUploadOptions {
    /// The release archive on the local filesystem.
    pub archive_path: PathBuf,
    /// Identifies which product this release belongs to; used as the
    /// owning token on every uploaded object.
    pub product_key: String,
    /// Directory name inside the archive anchoring the repository layout;
    /// `maven-repository` when blank.
    pub root: String,
    /// The targets to publish to; the first is the primary.
    pub targets: Vec<Target>,
    /// Base directory for the scratch extraction; system temp when absent.
    pub base_dir: Option<PathBuf>,
    /// Whether to generate and upload detached signatures.
    pub generate_signature: bool,
    /// Worker pool width per phase.
    pub con_limit: usize,
}

/// Handle the Maven product release archive uploading process.
///
/// Returns the scratch directory used for archive processing and whether
/// the whole run succeeded. The caller owns the scratch directory and is
/// expected to remove it.
pub async fn handle_maven_uploading(
    options: &MavenUploadOptions,
    config: &CharonConfig,
    store: Arc<dyn ObjectStore>,
    edge_cache: Option<Arc<dyn EdgeCache>>,
) -> Result<(PathBuf, bool)> {
    let real_root = if options.root.trim().is_empty() {
        "maven-repository"
    } else {
        options.root.as_str()
    };

    // step 1. extract the archive into a scratch dir
    let scratch = extract_archive(
        &options.archive_path,
        &options.product_key,
        options.base_dir.as_deref(),
    )?;

    // step 2. scan for paths, filter out the ignored ones, and collect
    // poms for the later metadata generation
    let scanned = scan_paths(&config.ignore_patterns, &scratch, real_root);
    let top_level = scanned.top_level.clone();
    if !top_level.is_dir() {
        return Err(CharonError::Archive(format!(
            "the extracted top-level path {} does not exist",
            top_level.display()
        )));
    }

    // step 3. validation hook for the files, like product version checking
    info!("Validating paths with rules.");
    let (err_msgs, passed) = validate_maven(&scanned.mvn_paths);
    if !passed {
        for msg in &err_msgs {
            error!("{}", msg);
        }
    }

    // step 4. upload artifacts to all targets in one engine pass
    let fixed_targets: Vec<Target> = options
        .targets
        .iter()
        .map(|t| Target {
            bucket: t.bucket.clone(),
            prefix: t.prefix.trim_start_matches('/').to_string(),
            registry: t.registry.clone(),
            domain: t.domain.clone(),
        })
        .collect();
    let buckets: Vec<&str> = fixed_targets.iter().map(|t| t.bucket.as_str()).collect();
    info!("Start uploading files to s3 buckets: {:?}", buckets);
    let uploader = Uploader::new(store.clone(), options.con_limit);
    let failed_files = uploader
        .upload_files(
            &scanned.mvn_paths,
            &fixed_targets,
            &options.product_key,
            &top_level,
        )
        .await;
    info!("Files uploading done");

    let mut succeeded = true;
    for target in &fixed_targets {
        let mut cf_invalidate_paths: Vec<String> = Vec::new();
        let mut failed_metas: Vec<String> = Vec::new();

        // step 5. manifest uploading
        if config.manifest_bucket.trim().is_empty() {
            warn!(
                "Warning: No manifest bucket is provided, will ignore the process of manifest \
                 uploading"
            );
        } else {
            info!(
                "Start uploading manifest to s3 bucket {}",
                config.manifest_bucket
            );
            match sign::write_manifest(&scanned.mvn_paths, &top_level, &options.product_key) {
                Ok((manifest_name, manifest_path)) => {
                    if !uploader
                        .upload_manifest(
                            &manifest_name,
                            &manifest_path,
                            &target.bucket,
                            &config.manifest_bucket,
                        )
                        .await
                    {
                        warn!("Manifest uploading failed for bucket {}", target.bucket);
                    }
                }
                Err(e) => warn!("Can not write manifest: {}", e),
            }
            info!("Manifest uploading is done");
        }

        // step 6. use the uploaded poms to scan the bucket for metadata
        // refreshment; the listing happens strictly after the artifact
        // phase so the regenerated files reflect present state
        info!(
            "Start generating maven-metadata.xml files for bucket {}",
            target.bucket
        );
        let plan = metadata::generate_metadatas(
            store.as_ref(),
            &scanned.poms,
            &target.bucket,
            &target.prefix,
            &top_level,
            options.con_limit,
        )
        .await;
        info!("maven-metadata.xml files generation done");
        failed_metas.extend(plan.fail.iter().cloned());

        // step 7. upload all regenerated maven-metadata.xml and digests
        if !plan.generate.is_empty() {
            info!(
                "Start updating maven-metadata.xml to s3 bucket {}",
                target.bucket
            );
            let failed = uploader
                .upload_metadatas(&plan.generate, target, &top_level)
                .await;
            failed_metas.extend(failed.iter().map(|p| p.to_string_lossy().into_owned()));
            info!(
                "maven-metadata.xml updating done in bucket {}",
                target.bucket
            );
            cf_invalidate_paths.extend(
                plan.generate
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );
        }
        if !plan.delete.is_empty() {
            let failed = uploader.delete_metadatas(&plan.delete, target).await;
            failed_metas.extend(failed);
        }

        // step 8. refresh archetype-catalog.xml when the archive has one
        if top_level.join(MAVEN_ARCH_FILE).is_file() {
            info!(
                "Start generating archetype-catalog.xml for bucket {}",
                target.bucket
            );
            let upload_archetype = archetype::reconcile_archetype_catalog(
                store.as_ref(),
                &target.bucket,
                &top_level,
                &target.prefix,
            )
            .await;
            info!(
                "archetype-catalog.xml files generation done in bucket {}",
                target.bucket
            );
            if upload_archetype {
                let mut archetype_files = vec![top_level.join(MAVEN_ARCH_FILE)];
                for algorithm in checksum::HashAlgorithm::all() {
                    archetype_files.push(
                        top_level.join(format!("{}{}", MAVEN_ARCH_FILE, algorithm.extension())),
                    );
                }
                archetype_files.retain(|p| p.is_file());
                info!(
                    "Start updating archetype-catalog.xml to s3 bucket {}",
                    target.bucket
                );
                let failed = uploader
                    .upload_metadatas(&archetype_files, target, &top_level)
                    .await;
                failed_metas.extend(failed.iter().map(|p| p.to_string_lossy().into_owned()));
                info!(
                    "archetype-catalog.xml updating done in bucket {}",
                    target.bucket
                );
                cf_invalidate_paths.extend(
                    archetype_files
                        .iter()
                        .map(|p| p.to_string_lossy().into_owned()),
                );
            }
        }

        // step 9. generate and upload signature files when requested
        if options.generate_signature {
            let suffix_list = config.ignore_signature_suffix(PACKAGE_TYPE_MAVEN);
            let artifacts: Vec<PathBuf> = scanned
                .mvn_paths
                .iter()
                .filter(|p| {
                    let name = p.to_string_lossy();
                    !suffix_list.iter().any(|s| name.ends_with(s.as_str()))
                })
                .cloned()
                .collect();
            info!(
                "Start generating signature for s3 bucket {}",
                target.bucket
            );
            let (generated, sign_failed) = sign::generate_signatures(
                &artifacts,
                &config.signature_command,
                options.con_limit,
            )
            .await;
            failed_metas.extend(sign_failed.iter().map(|p| p.to_string_lossy().into_owned()));
            info!("Signature generation done.");
            info!(
                "Start uploading signature files to s3 bucket {}",
                target.bucket
            );
            let failed = uploader
                .upload_signatures(&generated, target, &top_level)
                .await;
            failed_metas.extend(failed.iter().map(|p| p.to_string_lossy().into_owned()));
            info!("Signature uploading done.");
        }

        // Directory indexes are regenerated by a separate process; the
        // publisher only notes the skip to keep run logs comparable.
        debug!("Bypassing indexing");

        // step 10. finally, edge cache invalidation for the refreshed keys
        if config.aws_cf_enable && !cf_invalidate_paths.is_empty() {
            match edge_cache.as_deref() {
                Some(cache) => {
                    cdn::invalidate_paths(cache, target, &cf_invalidate_paths, &top_level).await;
                }
                None => warn!(
                    "Cannot do CF cache invalidating: no edge cache client available"
                ),
            }
        }

        upload_post_process(
            &failed_files,
            &failed_metas,
            &options.product_key,
            &target.bucket,
        );
        succeeded = succeeded && failed_files.is_empty() && failed_metas.is_empty();
    }

    Ok((scratch, succeeded))
}

/// Validation hook for scanned paths, like product version checking.
fn validate_maven(paths: &[PathBuf]) -> (Vec<String>, bool) {
    debug!("Need to validate {} mvn paths", paths.len());
    (Vec::new(), true)
}

fn upload_post_process(
    failed_files: &[PathBuf],
    failed_metas: &[String],
    product_key: &str,
    bucket: &str,
) {
    if failed_files.is_empty() && failed_metas.is_empty() {
        info!(
            "Product release {} is successfully uploaded to bucket {}",
            product_key, bucket
        );
    } else {
        let total = failed_files.len() + failed_metas.len();
        error!(
            "{} file(s) occur errors/warnings in bucket {}, please see the failure lists below.",
            total, bucket
        );
        error!(
            "Product release {} is uploaded to bucket {}, but has some failures as below:",
            product_key, bucket
        );
        if !failed_files.is_empty() {
            error!("Failed files: {:?}", failed_files);
        }
        if !failed_metas.is_empty() {
            error!("Failed metadata files: {:?}", failed_metas);
        }
    }
}

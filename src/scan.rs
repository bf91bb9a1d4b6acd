//! Scratch-tree scanning and path classification.
//!
//! After extraction the scratch tree is walked once, in lexicographic
//! order so that top-level discovery is deterministic. The directory whose
//! basename equals the configured root anchors the repository; files under
//! it are classified into Maven paths and POMs, files outside it are
//! reported and discarded.

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::maven::STANDARD_GENERATED_IGNORES;

/// The classified result of scanning a scratch tree.
#[derive(Debug, Clone)]
pub struct ScannedPaths {
    /// The directory anchoring the repository layout.
    pub top_level: PathBuf,
    /// Files to upload, as absolute paths inside the scratch tree.
    pub mvn_paths: Vec<PathBuf>,
    /// The subset of `mvn_paths` ending in `.pom`.
    pub poms: Vec<PathBuf>,
    /// Directories strictly under `top_level`.
    pub dirs: Vec<PathBuf>,
}

/// Scan the scratch tree for files to upload, filtering out ignored paths
/// and collecting POMs for the later metadata generation.
pub fn scan_paths(ignore_patterns: &[String], files_root: &Path, root: &str) -> ScannedPaths {
    info!("Scan {} to collect files", files_root.display());

    let patterns: Vec<Regex> = ignore_patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Skipping invalid ignore pattern {}: {}", p, e);
                None
            }
        })
        .collect();

    // One filesystem pass. Classification needs the top level, which can
    // surface anywhere in the walk, so the entries are collected first and
    // classified from memory.
    let entries: Vec<(PathBuf, bool)> = WalkDir::new(files_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| (e.path().to_path_buf(), e.file_type().is_dir()))
        .collect();

    let top_level = entries
        .iter()
        .find(|(path, is_dir)| {
            *is_dir && path.file_name().is_some_and(|name| name.to_string_lossy() == root)
        })
        .map(|(path, _)| path.clone())
        .unwrap_or_else(|| {
            warn!(
                "Warning: the root path {} does not exist in tarball, will use the scratch \
                 root for the uploading",
                root
            );
            files_root.to_path_buf()
        });

    let mut mvn_paths = Vec::new();
    let mut poms = Vec::new();
    let mut dirs = Vec::new();
    let mut non_mvn_paths = Vec::new();

    for (path, is_dir) in &entries {
        if *is_dir {
            if path != &top_level && path.starts_with(&top_level) {
                dirs.push(path.clone());
            }
            continue;
        }
        if !path.starts_with(&top_level) {
            non_mvn_paths.push(path.clone());
            continue;
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_ignored(&file_name, &patterns) {
            continue;
        }
        mvn_paths.push(path.clone());
        if file_name.ends_with(".pom") {
            poms.push(path.clone());
        }
    }

    if !non_mvn_paths.is_empty() {
        let shown: Vec<String> = non_mvn_paths
            .iter()
            .map(|p| {
                p.strip_prefix(files_root)
                    .unwrap_or(p)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        info!(
            "These files are not in the specified root dir {}, so will be ignored: {:?}",
            root, shown
        );
    }
    info!("Files scanning done.");

    ScannedPaths {
        top_level,
        mvn_paths,
        poms,
        dirs,
    }
}

/// Whether a file basename is excluded from uploading. Standard generated
/// Maven files are always excluded; they are regenerated from remote state
/// after the artifact upload. Configured patterns are checked afterwards,
/// first match wins.
fn is_ignored(file_name: &str, ignore_patterns: &[Regex]) -> bool {
    for ignored in STANDARD_GENERATED_IGNORES {
        if !file_name.trim().is_empty() && file_name.starts_with(ignored) {
            info!("Ignoring standard generated Maven path: {}", file_name);
            return true;
        }
    }
    ignore_patterns.iter().any(|p| p.is_match(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_scan_classifies_poms_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("maven-repository/org/foo/bar/1.0/bar-1.0.pom"));
        touch(&root.join("maven-repository/org/foo/bar/1.0/bar-1.0.jar"));
        touch(&root.join("README.md"));

        let scanned = scan_paths(&[], root, "maven-repository");
        assert_eq!(scanned.top_level, root.join("maven-repository"));
        assert_eq!(scanned.mvn_paths.len(), 2);
        assert_eq!(scanned.poms.len(), 1);
        assert!(scanned.poms[0].ends_with("bar-1.0.pom"));
        // README.md is outside the top level and discarded.
        assert!(!scanned.mvn_paths.iter().any(|p| p.ends_with("README.md")));
        // Directories strictly under the top level are collected.
        assert!(scanned
            .dirs
            .contains(&root.join("maven-repository/org/foo/bar/1.0")));
        assert!(!scanned.dirs.contains(&root.join("maven-repository")));
    }

    #[test]
    fn test_scan_skips_standard_generated_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("maven-repository/org/foo/maven-metadata.xml"));
        touch(&root.join("maven-repository/org/foo/maven-metadata.xml.sha1"));
        touch(&root.join("maven-repository/archetype-catalog.xml"));
        touch(&root.join("maven-repository/org/foo/1.0/foo-1.0.jar"));

        let scanned = scan_paths(&[], root, "maven-repository");
        assert_eq!(scanned.mvn_paths.len(), 1);
        assert!(scanned.mvn_paths[0].ends_with("foo-1.0.jar"));
    }

    #[test]
    fn test_scan_applies_ignore_patterns() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("maven-repository/org/foo/1.0/foo-1.0.jar"));
        touch(&root.join("maven-repository/org/foo/1.0/example-settings.xml"));

        let scanned = scan_paths(
            &["^example-settings\\.xml$".to_string()],
            root,
            "maven-repository",
        );
        assert_eq!(scanned.mvn_paths.len(), 1);
        assert!(scanned.mvn_paths[0].ends_with("foo-1.0.jar"));
    }

    #[test]
    fn test_scan_falls_back_to_scratch_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("org/foo/1.0/foo-1.0.jar"));

        let scanned = scan_paths(&[], root, "maven-repository");
        assert_eq!(scanned.top_level, root);
        assert_eq!(scanned.mvn_paths.len(), 1);
    }

    #[test]
    fn test_scan_first_candidate_wins() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("a/maven-repository/org/x/1.0/x-1.0.jar"));
        touch(&root.join("b/maven-repository/org/y/1.0/y-1.0.jar"));

        let scanned = scan_paths(&[], root, "maven-repository");
        assert_eq!(scanned.top_level, root.join("a/maven-repository"));
        assert_eq!(scanned.mvn_paths.len(), 1);
    }
}

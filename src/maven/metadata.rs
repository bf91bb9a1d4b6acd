//! Aggregated per-GA `maven-metadata.xml` handling.
//!
//! Metadata is never uploaded from the archive. After the artifact phase
//! the remote bucket is listed per touched GA, so the regenerated file
//! reflects the merged repository state, old releases included.

use futures::stream::{self, StreamExt};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::checksum;
use crate::error::{CharonError, Result};
use crate::maven::coordinates::{parse_gavs, version_compare};
use crate::maven::MAVEN_METADATA_FILE;
use crate::storage::{join_key, ObjectStore};

/// The data content of one `maven-metadata.xml` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenMetadata {
    /// The group id.
    pub group_id: String,
    /// The artifact id.
    pub artifact_id: String,
    /// Rendered as `<lastUpdated>` only when present.
    pub last_update_time: Option<String>,
    versions: Vec<String>,
}

impl MavenMetadata {
    /// Build metadata for a GA from an unordered version list. Versions
    /// are sorted ascending under the repository version ordering.
    pub fn new(group_id: String, artifact_id: String, mut versions: Vec<String>) -> Self {
        versions.sort_by(|a, b| version_compare(a, b));
        Self {
            group_id,
            artifact_id,
            last_update_time: None,
            versions,
        }
    }

    /// The versions, ascending.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// The greatest version under the repository ordering.
    pub fn latest_version(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }

    /// The greatest release version. Snapshots are filtered out upstream,
    /// so this equals the latest version.
    pub fn release_version(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }

    /// Render the canonical XML document.
    pub fn render(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write_start(&mut writer, "metadata")?;
        if !self.group_id.is_empty() {
            write_text_element(&mut writer, "groupId", &self.group_id)?;
        }
        if !self.artifact_id.is_empty() {
            write_text_element(&mut writer, "artifactId", &self.artifact_id)?;
        }
        if !self.versions.is_empty() {
            write_start(&mut writer, "versioning")?;
            if let Some(latest) = self.latest_version() {
                write_text_element(&mut writer, "latest", latest)?;
            }
            if let Some(release) = self.release_version() {
                write_text_element(&mut writer, "release", release)?;
            }
            write_start(&mut writer, "versions")?;
            for version in &self.versions {
                write_text_element(&mut writer, "version", version)?;
            }
            write_end(&mut writer, "versions")?;
            if let Some(last_updated) = &self.last_update_time {
                write_text_element(&mut writer, "lastUpdated", last_updated)?;
            }
            write_end(&mut writer, "versioning")?;
        }
        write_end(&mut writer, "metadata")?;
        let mut content = String::from_utf8(writer.into_inner())
            .map_err(|e| CharonError::Xml(e.to_string()))?;
        content.push('\n');
        Ok(content)
    }

    /// Parse a `maven-metadata.xml` document. `latest` and `release` are
    /// derived from the version list, not read back.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut group_id = String::new();
        let mut artifact_id = String::new();
        let mut versions = Vec::new();
        let mut last_update_time = None;
        let mut element_stack: Vec<String> = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    element_stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| CharonError::Xml(e.to_string()))?
                        .into_owned();
                    match element_stack.last().map(String::as_str) {
                        Some("groupId") => group_id = text,
                        Some("artifactId") => artifact_id = text,
                        Some("version") => versions.push(text),
                        Some("lastUpdated") => last_update_time = Some(text),
                        _ => {}
                    }
                }
                Ok(Event::End(_)) => {
                    element_stack.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(CharonError::Xml(e.to_string())),
                _ => {}
            }
        }
        let mut metadata = Self::new(group_id, artifact_id, versions);
        metadata.last_update_time = last_update_time;
        Ok(metadata)
    }
}

fn write_start<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| CharonError::Xml(e.to_string()))
}

fn write_end<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| CharonError::Xml(e.to_string()))
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    write_start(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| CharonError::Xml(e.to_string()))?;
    write_end(writer, name)
}

/// Render one GA's metadata into the scratch tree and emit its digest
/// sidecars. Returns the metadata path followed by the sidecar paths.
pub fn write_metadata_files(
    group_id: &str,
    artifact_id: &str,
    versions: Vec<String>,
    root: &Path,
) -> Result<Vec<PathBuf>> {
    let metadata = MavenMetadata::new(group_id.to_string(), artifact_id.to_string(), versions);
    let content = metadata.render()?;
    let group_path = group_id.replace('.', "/");
    let meta_path = root
        .join(group_path)
        .join(artifact_id)
        .join(MAVEN_METADATA_FILE);
    if let Some(parent) = meta_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&meta_path, content)?;
    let mut files = vec![meta_path.clone()];
    files.extend(checksum::write_digest_files(&meta_path));
    Ok(files)
}

/// The partitioned result of metadata reconciliation.
#[derive(Debug, Default)]
pub struct MetadataPlan {
    /// Scratch files to upload (metadata bodies and digest sidecars).
    pub generate: Vec<PathBuf>,
    /// Repository-relative keys to remove: GAs with no POM left remotely.
    pub delete: Vec<String>,
    /// Repository-relative keys that could not be reconciled.
    pub fail: Vec<String>,
}

/// Collect GAs touched by the uploaded POMs and regenerate their metadata
/// from the remote repository state.
///
/// The new POMs are already on the server when this runs, so the per-GA
/// listing reflects the merged state including versions from prior
/// releases.
pub async fn generate_metadatas(
    store: &dyn ObjectStore,
    poms: &[PathBuf],
    bucket: &str,
    prefix: &str,
    top_level: &Path,
    con_limit: usize,
) -> MetadataPlan {
    let pom_strings: Vec<String> = poms.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let root_str = top_level.to_string_lossy().into_owned();
    debug!("Valid poms: {:?}", pom_strings);

    let mut ga_paths = BTreeSet::new();
    for (group, artifacts) in parse_gavs(&pom_strings, &root_str) {
        for artifact in artifacts.keys() {
            ga_paths.insert(format!("{}/{}", group.replace('.', "/"), artifact));
        }
    }

    let listings: Vec<(String, crate::storage::Result<Vec<String>>)> =
        stream::iter(ga_paths.into_iter())
            .map(|ga| async move {
                // The trailing slash avoids prefix bleed, like searching
                // org/apache and also matching org/apache-commons.
                let mut ga_prefix = join_key(prefix, &ga);
                if !ga_prefix.ends_with('/') {
                    ga_prefix.push('/');
                }
                let result = store.list(bucket, &ga_prefix, Some(".pom")).await;
                (ga, result)
            })
            .buffer_unordered(con_limit.max(1))
            .collect()
            .await;

    let mut plan = MetadataPlan::default();
    let mut all_poms = Vec::new();
    for (ga, result) in listings {
        match result {
            Ok(keys) if keys.is_empty() => {
                debug!("No poms found in bucket {} for GA path {}", bucket, ga);
                plan.delete.extend(metadata_keys(&ga));
            }
            Ok(keys) => {
                debug!("Got poms in bucket {} for GA path {}: {:?}", bucket, ga, keys);
                all_poms.extend(keys.into_iter().map(|k| strip_prefix(&k, prefix)));
            }
            Err(e) => {
                warn!(
                    "An error happened when scanning remote artifacts under GA path {}: {}",
                    ga, e
                );
                plan.fail.extend(metadata_keys(&ga));
            }
        }
    }

    for (group, artifacts) in parse_gavs(&all_poms, "/") {
        for (artifact, versions) in artifacts {
            match write_metadata_files(&group, &artifact, versions, top_level) {
                Ok(files) => plan.generate.extend(files),
                Err(e) => warn!(
                    "Failed to create or update metadata file for GA {}:{}: {}. \
                     Please check if aligned Maven GA is correct in your tarball.",
                    group, artifact, e
                ),
            }
        }
    }
    plan
}

/// The metadata key and its digest sidecar keys for a GA path.
fn metadata_keys(ga: &str) -> Vec<String> {
    let mut keys = vec![format!("{}/{}", ga, MAVEN_METADATA_FILE)];
    for algorithm in checksum::HashAlgorithm::all() {
        keys.push(format!(
            "{}/{}{}",
            ga,
            MAVEN_METADATA_FILE,
            algorithm.extension()
        ));
    }
    keys
}

fn strip_prefix(key: &str, prefix: &str) -> String {
    if prefix.trim().is_empty() {
        return key.to_string();
    }
    let with_slash = format!("{}/", prefix.trim_end_matches('/'));
    key.strip_prefix(&with_slash).unwrap_or(key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_render_single_version() {
        let metadata = MavenMetadata::new(
            "org.apache.commons".to_string(),
            "commons-lang3".to_string(),
            vec!["3.10".to_string()],
        );
        let content = metadata.render().unwrap();
        assert_eq!(
            content,
            "<metadata>\n  <groupId>org.apache.commons</groupId>\n  \
             <artifactId>commons-lang3</artifactId>\n  <versioning>\n    \
             <latest>3.10</latest>\n    <release>3.10</release>\n    <versions>\n      \
             <version>3.10</version>\n    </versions>\n  </versioning>\n</metadata>\n"
        );
    }

    #[test]
    fn test_render_orders_versions() {
        let metadata = MavenMetadata::new(
            "org.foo".to_string(),
            "bar".to_string(),
            vec!["3.11".to_string(), "3.10".to_string(), "3.9".to_string()],
        );
        let content = metadata.render().unwrap();
        assert_eq!(metadata.latest_version(), Some("3.11"));
        assert_eq!(metadata.release_version(), Some("3.11"));
        let v39 = content.find("<version>3.9<").unwrap();
        let v310 = content.find("<version>3.10<").unwrap();
        let v311 = content.find("<version>3.11<").unwrap();
        assert!(v39 < v310 && v310 < v311);
    }

    #[test]
    fn test_render_includes_last_updated_only_when_given() {
        let mut metadata = MavenMetadata::new(
            "org.foo".to_string(),
            "bar".to_string(),
            vec!["1.0".to_string()],
        );
        assert!(!metadata.render().unwrap().contains("lastUpdated"));
        metadata.last_update_time = Some("20240101000000".to_string());
        assert!(metadata
            .render()
            .unwrap()
            .contains("<lastUpdated>20240101000000</lastUpdated>"));
    }

    #[test]
    fn test_parse_render_round_trip() {
        let metadata = MavenMetadata::new(
            "org.foo".to_string(),
            "bar".to_string(),
            vec!["1.0".to_string(), "1.1".to_string()],
        );
        let content = metadata.render().unwrap();
        let parsed = MavenMetadata::parse(&content).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.render().unwrap(), content);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MavenMetadata::parse("<metadata><unclosed").is_err());
    }

    #[test]
    fn test_write_metadata_files() {
        let dir = TempDir::new().unwrap();
        let files = write_metadata_files(
            "org.foo",
            "bar",
            vec!["1.0".to_string()],
            dir.path(),
        )
        .unwrap();
        assert_eq!(files.len(), 4);
        assert!(dir.path().join("org/foo/bar/maven-metadata.xml").is_file());
        assert!(dir
            .path()
            .join("org/foo/bar/maven-metadata.xml.sha256")
            .is_file());
    }

    #[tokio::test]
    async fn test_generate_metadatas_reflects_remote_state() {
        let store = MemoryObjectStore::new();
        // Remote already has 3.10 from an earlier release; 3.11 was just
        // uploaded by the artifact phase.
        for key in [
            "ga/org/foo/bar/3.10/bar-3.10.pom",
            "ga/org/foo/bar/3.11/bar-3.11.pom",
        ] {
            store
                .put("bucket", key, b"<project/>".to_vec(), "text/xml", HashMap::new())
                .await
                .unwrap();
        }
        let scratch = TempDir::new().unwrap();
        let local_pom = scratch.path().join("org/foo/bar/3.11/bar-3.11.pom");
        std::fs::create_dir_all(local_pom.parent().unwrap()).unwrap();
        std::fs::write(&local_pom, b"<project/>").unwrap();

        let plan = generate_metadatas(
            &store,
            &[local_pom],
            "bucket",
            "ga",
            scratch.path(),
            4,
        )
        .await;
        assert!(plan.delete.is_empty());
        assert!(plan.fail.is_empty());
        assert_eq!(plan.generate.len(), 4);
        let content = std::fs::read_to_string(
            scratch.path().join("org/foo/bar/maven-metadata.xml"),
        )
        .unwrap();
        assert!(content.contains("<latest>3.11</latest>"));
        assert!(content.contains("<release>3.11</release>"));
        assert!(content.contains("<version>3.10</version>"));
        assert!(content.contains("<version>3.11</version>"));
    }

    #[tokio::test]
    async fn test_generate_metadatas_empty_listing_schedules_deletion() {
        let store = MemoryObjectStore::new();
        let scratch = TempDir::new().unwrap();
        let local_pom = scratch.path().join("org/foo/bar/1.0/bar-1.0.pom");
        std::fs::create_dir_all(local_pom.parent().unwrap()).unwrap();
        std::fs::write(&local_pom, b"<project/>").unwrap();

        // Nothing remote: the artifact phase must have failed for this GA.
        let plan =
            generate_metadatas(&store, &[local_pom], "bucket", "ga", scratch.path(), 4).await;
        assert!(plan.generate.is_empty());
        assert_eq!(
            plan.delete,
            vec![
                "org/foo/bar/maven-metadata.xml".to_string(),
                "org/foo/bar/maven-metadata.xml.md5".to_string(),
                "org/foo/bar/maven-metadata.xml.sha1".to_string(),
                "org/foo/bar/maven-metadata.xml.sha256".to_string(),
            ]
        );
    }
}

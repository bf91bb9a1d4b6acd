//! Repository-wide `archetype-catalog.xml` reconciliation.
//!
//! When the archive carries a catalog, the local entries are merged into
//! whatever already exists remotely and the merged catalog is re-rendered
//! in canonical sorted form. A sibling backup of the original local file
//! is kept so multi-target reconciliation always starts from the same
//! input regardless of what earlier targets rewrote.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use tracing::{error, warn};

use crate::checksum;
use crate::error::{CharonError, Result};
use crate::maven::coordinates::version_compare;
use crate::maven::MAVEN_ARCH_FILE;
use crate::storage::{join_key, ObjectStore};

/// One `<archetype>` entry in an archetype catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchetypeRef {
    /// The group id.
    pub group_id: String,
    /// The artifact id.
    pub artifact_id: String,
    /// The version.
    pub version: String,
    /// The source repository, kept when parsing but not rendered.
    pub repository: String,
    /// The human-readable description.
    pub description: String,
}

impl fmt::Display for ArchetypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// Catalog ordering: by `groupId:artifactId`, then by version under the
/// repository version ordering.
pub fn archetype_compare(a: &ArchetypeRef, b: &ArchetypeRef) -> Ordering {
    let x = format!("{}:{}", a.group_id, a.artifact_id);
    let y = format!("{}:{}", b.group_id, b.artifact_id);
    match x.cmp(&y) {
        Ordering::Equal => version_compare(&a.version, &b.version),
        other => other,
    }
}

/// An `archetype-catalog.xml` document, kept sorted for deterministic
/// rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenArchetypeCatalog {
    archetypes: Vec<ArchetypeRef>,
}

impl MavenArchetypeCatalog {
    /// Build a catalog from unordered entries; sorts on construction.
    pub fn new(mut archetypes: Vec<ArchetypeRef>) -> Self {
        archetypes.sort_by(archetype_compare);
        Self { archetypes }
    }

    /// The entries, in catalog order.
    pub fn archetypes(&self) -> &[ArchetypeRef] {
        &self.archetypes
    }

    /// Render the canonical XML document.
    pub fn render(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write_start(&mut writer, "archetype-catalog")?;
        write_start(&mut writer, "archetypes")?;
        for archetype in &self.archetypes {
            write_start(&mut writer, "archetype")?;
            write_text_element(&mut writer, "groupId", &archetype.group_id)?;
            write_text_element(&mut writer, "artifactId", &archetype.artifact_id)?;
            write_text_element(&mut writer, "version", &archetype.version)?;
            write_text_element(&mut writer, "description", &archetype.description)?;
            write_end(&mut writer, "archetype")?;
        }
        write_end(&mut writer, "archetypes")?;
        write_end(&mut writer, "archetype-catalog")?;
        let mut content = String::from_utf8(writer.into_inner())
            .map_err(|e| CharonError::Xml(e.to_string()))?;
        content.push('\n');
        Ok(content)
    }

    /// Parse the `<archetype>` entries out of a catalog document.
    pub fn parse(xml: &str) -> Result<Vec<ArchetypeRef>> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut archetypes = Vec::new();
        let mut current: Option<ArchetypeRef> = None;
        let mut element_stack: Vec<String> = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name == "archetype" {
                        current = Some(ArchetypeRef::default());
                    }
                    element_stack.push(name);
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| CharonError::Xml(e.to_string()))?
                        .into_owned();
                    if let Some(archetype) = current.as_mut() {
                        match element_stack.last().map(String::as_str) {
                            Some("groupId") => archetype.group_id = text,
                            Some("artifactId") => archetype.artifact_id = text,
                            Some("version") => archetype.version = text,
                            Some("repository") => archetype.repository = text,
                            Some("description") => archetype.description = text,
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"archetype" {
                        if let Some(archetype) = current.take() {
                            archetypes.push(archetype);
                        }
                    }
                    element_stack.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(CharonError::Xml(e.to_string())),
                _ => {}
            }
        }
        Ok(archetypes)
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

/// Determine whether the local archetype catalog should be uploaded to the
/// given bucket, merging it with the remote catalog when one exists.
///
/// The original local file is snapshotted to `<name>.charon.bak` on first
/// use; every target starts its reconciliation from that snapshot. On a
/// merge the local file is rewritten with the canonical merged catalog and
/// fresh digest sidecars so the caller can upload it as-is.
pub async fn reconcile_archetype_catalog(
    store: &dyn ObjectStore,
    bucket: &str,
    top_level: &Path,
    prefix: &str,
) -> bool {
    let remote_key = join_key(prefix, MAVEN_ARCH_FILE);
    let local = top_level.join(MAVEN_ARCH_FILE);
    let local_bak = top_level.join(format!("{}.charon.bak", MAVEN_ARCH_FILE));

    if local.is_file() && !local_bak.is_file() {
        if let Err(e) = std::fs::copy(&local, &local_bak) {
            warn!("Can not snapshot file {}: {}", local.display(), e);
        }
    }
    // No local catalog, nothing to reconcile.
    if !local_bak.is_file() {
        return false;
    }
    let local_content = match std::fs::read_to_string(&local_bak) {
        Ok(content) => content,
        Err(e) => {
            warn!("Can not open file {}: {}", local_bak.display(), e);
            return false;
        }
    };
    let restore_local = |content: &str| -> bool {
        if let Err(e) = std::fs::write(&local, content) {
            error!("Error: Can not create file {}: {}", local.display(), e);
            return false;
        }
        checksum::write_digest_files(&local);
        true
    };

    let existed = match store.head(bucket, &remote_key).await {
        Ok(existed) => existed,
        Err(e) => {
            error!("Error: Can not generate archetype-catalog.xml due to: {}", e);
            return false;
        }
    };
    if !existed {
        // Nothing in the bucket. Just push what we have locally.
        return restore_local(&local_content);
    }

    let local_archetypes = match MavenArchetypeCatalog::parse(&local_content) {
        Ok(archetypes) => archetypes,
        Err(e) => {
            warn!(
                "Failed to parse archetype-catalog.xml from local archive with root {}: {}. \
                 SKIPPING invalid archetype processing.",
                top_level.display(),
                e
            );
            return false;
        }
    };
    if local_archetypes.is_empty() {
        warn!(
            "No archetypes found in local archetype-catalog.xml, even though the file exists! \
             Skipping."
        );
        return false;
    }

    let remote_archetypes = match store.get(bucket, &remote_key).await {
        Ok((body, _)) => match MavenArchetypeCatalog::parse(&String::from_utf8_lossy(&body)) {
            Ok(archetypes) => archetypes,
            Err(e) => {
                warn!(
                    "Failed to parse archetype-catalog.xml from bucket {}: {}. \
                     OVERWRITING bucket archetype-catalog.xml with the valid, local copy.",
                    bucket, e
                );
                return restore_local(&local_content);
            }
        },
        Err(e) => {
            warn!(
                "Failed to get archetype-catalog.xml from bucket {}: {}. \
                 OVERWRITING bucket archetype-catalog.xml with the valid, local copy.",
                bucket, e
            );
            return restore_local(&local_content);
        }
    };
    if remote_archetypes.is_empty() {
        return restore_local(&local_content);
    }

    let original_remote_size = remote_archetypes.len();
    let mut merged = remote_archetypes;
    for local_ref in local_archetypes {
        // A collision on archetype GAV should never happen; archetypes
        // belong with specific product releases. WARN, not ERROR.
        if merged.contains(&local_ref) {
            warn!(
                "DUPLICATE ARCHETYPE: {}. This makes rollback of the current release UNSAFE!",
                local_ref
            );
        } else {
            merged.push(local_ref);
        }
    }
    if merged.len() != original_remote_size {
        let catalog = MavenArchetypeCatalog::new(merged);
        match catalog.render() {
            Ok(content) => restore_local(&content),
            Err(e) => {
                error!("Error: Can not render file {}: {}", local.display(), e);
                false
            }
        }
    } else {
        false
    }
}

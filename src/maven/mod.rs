//! Maven repository layout knowledge: coordinates, aggregated metadata and
//! the archetype catalog.

pub mod archetype;
pub mod coordinates;
pub mod metadata;

/// Aggregated per-GA metadata file name.
pub const MAVEN_METADATA_FILE: &str = "maven-metadata.xml";

/// Repository-wide archetype catalog file name.
pub const MAVEN_ARCH_FILE: &str = "archetype-catalog.xml";

/// Basenames that are never uploaded from an archive. These files are
/// regenerated from the post-upload repository state instead.
pub const STANDARD_GENERATED_IGNORES: &[&str] = &[MAVEN_METADATA_FILE, MAVEN_ARCH_FILE];

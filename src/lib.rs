//! # charon
//!
//! charon synchronizes Maven artifact repository releases, packaged as
//! archives of the standard directory layout, to S3-compatible object
//! stores. The interesting part is not the upload itself but the
//! consistency protocol around it: reference-counted ownership of shared
//! files across product releases, aggregated `maven-metadata.xml` files
//! regenerated from the post-upload repository state, integrity
//! checksumming, multi-target fan-out and CDN invalidation.

pub mod archive;
pub mod cdn;
pub mod checksum;
pub mod config;
pub mod error;
pub mod maven;
pub mod publish;
pub mod scan;
pub mod sign;
pub mod storage;
pub mod upload;

/// Suffix of the sidecar object recording which products own a key.
pub const PROD_INFO_SUFFIX: &str = ".prodinfo";

/// Suffix of the per-release manifest file.
pub const MANIFEST_SUFFIX: &str = ".txt";

/// Registry assigned to targets that do not configure one.
pub const DEFAULT_REGISTRY: &str = "localhost";

/// Configuration file name, looked up under `$HOME/.charon/` by default.
pub const CONFIG_FILE: &str = "charon.yaml";

/// Package type key for Maven repositories.
pub const PACKAGE_TYPE_MAVEN: &str = "maven";

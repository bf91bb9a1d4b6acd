//! Configuration management for the charon tools.
//!
//! The configuration file is named `charon.yaml` and is stored in
//! `$HOME/.charon/` by default. It is loaded once, validated, and threaded
//! through the publisher as a value; there is no process-wide singleton.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{CharonError, Result};
use crate::{CONFIG_FILE, DEFAULT_REGISTRY};

/// One destination of a multi-target publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Bucket that stores the repository. Required.
    pub bucket: String,

    /// In-bucket root under which the repository is laid out.
    #[serde(default)]
    pub prefix: String,

    /// Registry host name, defaulted to `localhost` when missing.
    #[serde(default)]
    pub registry: String,

    /// CDN domain fronting this bucket. Optional; when empty the domain is
    /// looked up from the built-in bucket table at invalidation time.
    #[serde(default)]
    pub domain: String,
}

/// Configuration for the charon tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharonConfig {
    /// AWS profile used for object store and CDN clients.
    #[serde(default)]
    pub aws_profile: String,

    /// Whether CDN invalidation runs after an upload.
    #[serde(default)]
    pub aws_cf_enable: bool,

    /// Regexes matched against file basenames; matches are not uploaded.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Named target sets; each name maps to one or more targets.
    #[serde(default)]
    pub targets: HashMap<String, Vec<Target>>,

    /// Bucket that receives the per-release manifest files.
    #[serde(default)]
    pub manifest_bucket: String,

    /// Per package type, suffixes of files that must not be signed.
    #[serde(default)]
    pub ignore_signature_suffix: HashMap<String, Vec<String>>,

    /// Command template producing a detached signature; `{{ file }}` is
    /// substituted with the artifact path as a single argument.
    #[serde(default, rename = "detach_signature_command")]
    pub signature_command: String,
}

impl CharonConfig {
    /// Load configuration from the given file, falling back to
    /// `$HOME/.charon/charon.yaml` when the path is absent or missing.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) if p.is_file() => p.to_path_buf(),
            _ => default_config_path(),
        };
        let contents = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| {
                CharonError::invalid_config(format!(
                    "cannot read config file {}: {}",
                    config_path.display(),
                    e
                ))
            })?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: CharonConfig = serde_yaml::from_str(contents)?;
        for targets in config.targets.values_mut() {
            for target in targets.iter_mut() {
                if target.registry.trim().is_empty() {
                    target.registry = DEFAULT_REGISTRY.to_string();
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(CharonError::invalid_config(
                "'targets' is a required property",
            ));
        }
        for targets in self.targets.values() {
            for target in targets {
                if target.bucket.trim().is_empty() {
                    return Err(CharonError::invalid_config(
                        "'bucket' is a required property",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Look up a named target set.
    pub fn target(&self, name: &str) -> Option<&[Target]> {
        let targets = self.targets.get(name).map(|t| t.as_slice());
        if targets.is_none() {
            warn!("The target {} is not found in charon configuration.", name);
        }
        targets
    }

    /// Suffixes of files that must not be signed for the given package type.
    pub fn ignore_signature_suffix(&self, package_type: &str) -> &[String] {
        match self.ignore_signature_suffix.get(package_type) {
            Some(suffixes) => suffixes,
            None => {
                warn!(
                    "package type {} does not have ignore artifact config.",
                    package_type
                );
                &[]
            }
        }
    }
}

/// The default configuration file location: `$HOME/.charon/charon.yaml`.
pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    Path::new(&home).join(".charon").join(CONFIG_FILE)
}

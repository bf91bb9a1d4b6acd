//! Error types for the charon publishing pipeline.

use thiserror::Error;

/// Result type alias for charon operations.
pub type Result<T> = std::result::Result<T, CharonError>;

/// Errors that abort a release run before or during setup. Per-file
/// failures during an upload do not use this type; they accumulate into
/// the failed lists reported at the end of the run.
#[derive(Debug, Error)]
pub enum CharonError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The release archive is unreadable or of an unknown kind.
    #[error("Unsupported or corrupt archive: {0}")]
    Archive(String),

    /// An archive entry would extract outside the scratch directory.
    #[error("Archive entry escapes extraction root: {0}")]
    UnsafeArchivePath(String),

    /// Zip-specific extraction error.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML rendering or parsing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// Object store operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

impl CharonError {
    /// Create a new invalid configuration error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

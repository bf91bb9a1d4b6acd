//! Digest support for artifacts and generated metadata files.

use sha1::Digest;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Hash algorithms used for artifact checksums and digest sidecar files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// MD5 hash algorithm.
    Md5,
    /// SHA-1 hash algorithm.
    Sha1,
    /// SHA-256 hash algorithm.
    Sha256,
}

impl HashAlgorithm {
    /// The sidecar file extension for this algorithm.
    pub fn extension(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => ".md5",
            HashAlgorithm::Sha1 => ".sha1",
            HashAlgorithm::Sha256 => ".sha256",
        }
    }

    /// All algorithms emitted as digest sidecars for metadata files.
    pub fn all() -> &'static [HashAlgorithm] {
        &[
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
        ]
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "MD5"),
            HashAlgorithm::Sha1 => write!(f, "SHA1"),
            HashAlgorithm::Sha256 => write!(f, "SHA256"),
        }
    }
}

/// Suffixes of files that are themselves hash files. They have no `.sha1`
/// sidecar of their own, so the sidecar shortcut does not apply to them.
const HASH_FILE_SUFFIXES: &[&str] = &[".md5", ".sha1", ".sha256", ".sha512"];

/// Hash a byte slice and return the lowercase hex digest.
pub fn digest_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Md5 => format!("{:x}", md5::compute(data)),
        HashAlgorithm::Sha1 => {
            let mut hasher = sha1::Sha1::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        }
    }
}

/// Hash a file's contents and return the lowercase hex digest.
pub fn digest_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    match algorithm {
        HashAlgorithm::Md5 => {
            let mut context = md5::Context::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                context.consume(&buf[..n]);
            }
            Ok(format!("{:x}", context.compute()))
        }
        HashAlgorithm::Sha1 => {
            let mut hasher = sha1::Sha1::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Read the SHA-1 checksum of a file, preferring the Maven `.sha1` sidecar
/// when one exists next to the file. Hash files themselves never have
/// sidecars and are always digested directly. Skipping the digest of big
/// jars via the sidecar is a meaningful performance win on large releases.
pub fn read_sha1(path: &Path) -> io::Result<String> {
    let name = path.to_string_lossy();
    let is_hash_file = HASH_FILE_SUFFIXES.iter().any(|s| name.ends_with(s));
    if !is_hash_file {
        let sidecar = PathBuf::from(format!("{}.sha1", name));
        if sidecar.is_file() {
            let content = std::fs::read_to_string(&sidecar)?;
            // Sidecars may carry a trailing newline or a "<hex> <name>" form.
            if let Some(hex) = content.split_whitespace().next() {
                return Ok(hex.to_string());
            }
        }
    }
    digest_file(path, HashAlgorithm::Sha1)
}

/// Write the `.md5`, `.sha1` and `.sha256` digest sidecars for a file and
/// return the paths of the ones that were written.
pub fn write_digest_files(path: &Path) -> Vec<PathBuf> {
    let mut written = Vec::new();
    for &algorithm in HashAlgorithm::all() {
        let sidecar = PathBuf::from(format!(
            "{}{}",
            path.to_string_lossy(),
            algorithm.extension()
        ));
        match digest_file(path, algorithm) {
            Ok(digest) => match std::fs::write(&sidecar, digest) {
                Ok(()) => written.push(sidecar),
                Err(e) => warn!(
                    "Can not create digest file {} for {}: {}",
                    sidecar.display(),
                    path.display(),
                    e
                ),
            },
            Err(e) => warn!(
                "Can not create digest file {} for {}: {}",
                sidecar.display(),
                path.display(),
                e
            ),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_bytes() {
        let data = b"hello world";
        assert_eq!(
            digest_bytes(data, HashAlgorithm::Md5),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            digest_bytes(data, HashAlgorithm::Sha1),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            digest_bytes(data, HashAlgorithm::Sha256),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"test data").unwrap();
        assert_eq!(
            digest_file(&path, HashAlgorithm::Sha1).unwrap(),
            digest_bytes(b"test data", HashAlgorithm::Sha1)
        );
    }

    #[test]
    fn test_read_sha1_prefers_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.jar");
        std::fs::write(&path, b"jar bytes").unwrap();
        std::fs::write(dir.path().join("lib.jar.sha1"), "cafef00d\n").unwrap();
        assert_eq!(read_sha1(&path).unwrap(), "cafef00d");
    }

    #[test]
    fn test_read_sha1_ignores_sidecar_for_hash_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.jar.md5");
        std::fs::write(&path, b"abc").unwrap();
        // Even with a bogus sidecar present, hash files are digested.
        std::fs::write(dir.path().join("lib.jar.md5.sha1"), "deadbeef").unwrap();
        assert_eq!(
            read_sha1(&path).unwrap(),
            digest_bytes(b"abc", HashAlgorithm::Sha1)
        );
    }

    #[test]
    fn test_write_digest_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("maven-metadata.xml");
        std::fs::write(&path, b"<metadata/>").unwrap();
        let written = write_digest_files(&path);
        assert_eq!(written.len(), 3);
        let sha1 = std::fs::read_to_string(dir.path().join("maven-metadata.xml.sha1")).unwrap();
        assert_eq!(sha1, digest_bytes(b"<metadata/>", HashAlgorithm::Sha1));
    }
}

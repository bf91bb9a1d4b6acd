//! Release archive detection and extraction.
//!
//! Release tarballs arrive as zip, plain tar or gzipped tar archives. The
//! kind is detected by sniffing the leading bytes rather than trusting the
//! file name. Extraction lands in a fresh `charon-<productKey>-*` scratch
//! directory and rejects entries that would escape it.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CharonError, Result};

/// The supported release archive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Zip archive.
    Zip,
    /// Uncompressed tar archive.
    Tar,
    /// Gzip-compressed tar archive.
    TarGz,
}

/// Detect the archive kind by sniffing the first 512 bytes.
pub fn detect_archive_kind(path: &Path) -> Result<ArchiveKind> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 512];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    let buf = &buf[..read];

    if buf.starts_with(b"PK\x03\x04") {
        return Ok(ArchiveKind::Zip);
    }
    if buf.starts_with(&[0x1f, 0x8b]) {
        return Ok(ArchiveKind::TarGz);
    }
    if buf.len() > 262 && &buf[257..262] == b"ustar" {
        return Ok(ArchiveKind::Tar);
    }
    Err(CharonError::Archive(format!(
        "unknown archive kind: {}",
        path.display()
    )))
}

/// Extract a release archive into a fresh scratch directory named
/// `charon-<productKey>-*` under `base_dir` (system temp when absent).
/// Returns the scratch directory; the caller owns it for the duration of
/// the run and removes it on exit.
pub fn extract_archive(
    archive: &Path,
    product_key: &str,
    base_dir: Option<&Path>,
) -> Result<PathBuf> {
    if !archive.is_file() {
        return Err(CharonError::Archive(format!(
            "archive {} does not exist",
            archive.display()
        )));
    }
    info!("Extracting archive: {}", archive.display());

    let mut builder = tempfile::Builder::new();
    let prefix = format!("charon-{}-", product_key);
    builder.prefix(&prefix);
    let scratch = match base_dir {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    }
    .into_path();

    match detect_archive_kind(archive)? {
        ArchiveKind::Zip => extract_zip(archive, &scratch)?,
        ArchiveKind::Tar => extract_tar(File::open(archive)?, &scratch)?,
        ArchiveKind::TarGz => extract_tar(GzDecoder::new(File::open(archive)?), &scratch)?,
    }
    Ok(scratch)
}

fn extract_zip(archive: &Path, target: &Path) -> Result<()> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                return Err(CharonError::UnsafeArchivePath(entry.name().to_string()));
            }
        };
        let out_path = target.join(&rel);
        debug!("Unzipping {}", entry.name());
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, target: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    for entry in tar.entries()? {
        let mut entry = entry?;
        let rel = entry.path()?.to_path_buf();
        let safe = safe_join(target, &rel)?;
        debug!("Unpacking {}", rel.display());
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&safe)?;
        } else {
            if let Some(parent) = safe.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&safe)?;
        }
    }
    Ok(())
}

/// Join an archive entry path onto the scratch root, rejecting absolute
/// entries and parent-directory traversal.
fn safe_join(root: &Path, rel: &Path) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => {
                return Err(CharonError::UnsafeArchivePath(
                    rel.to_string_lossy().into_owned(),
                ));
            }
        }
    }
    Ok(joined)
}

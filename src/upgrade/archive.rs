//! Zip archive reading and extraction.
//!
//! All functions here are blocking; async callers run them on
//! `tokio::task::spawn_blocking`.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::UpdateError;

fn invalid(path: &Path, reason: impl Into<String>) -> UpdateError {
    UpdateError::InvalidArchive {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Open `path` as a zip archive and return its entry count.
///
/// Used to reject downloads and backups that are not readable archives.
pub fn verify_archive(path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let archive = zip::ZipArchive::new(file).map_err(|e| invalid(path, e.to_string()))?;
    if archive.is_empty() {
        return Err(invalid(path, "archive has no entries").into());
    }
    Ok(archive.len())
}

/// Extract every entry of `archive_path` below `dest`.
///
/// Entries whose names would resolve outside `dest` (absolute paths, `..`)
/// fail the whole extraction with [`UpdateError::InvalidArchive`]. Returns the
/// number of files written.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| invalid(archive_path, e.to_string()))?;

    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| invalid(archive_path, e.to_string()))?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(invalid(
                archive_path,
                format!("entry '{}' escapes the extraction directory", entry.name()),
            )
            .into());
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("Failed to create directory: {}", out_path.display()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut outfile = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| {
            invalid(archive_path, format!("failed to extract '{}': {e}", entry.name()))
        })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))
                .with_context(|| format!("Failed to set permissions on {}", out_path.display()))?;
        }

        files += 1;
    }

    debug!("Extracted {} file(s) from {}", files, archive_path.display());
    Ok(files)
}

/// Directory that holds the installable files of an extracted archive.
///
/// Release archives are sometimes packed inside a single folder. When `dir`
/// contains exactly one entry and it is a directory, that directory is the
/// content root; otherwise `dir` itself is.
pub fn content_root(dir: &Path) -> Result<PathBuf> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(dir.to_path_buf()),
    };
    if entries.next().is_some() {
        return Ok(dir.to_path_buf());
    }

    if first.file_type()?.is_dir() {
        debug!("Using nested content root {}", first.path().display());
        Ok(first.path())
    } else {
        Ok(dir.to_path_buf())
    }
}

//! Copying new files over the live application directory.
//!
//! A pass walks every file of the source tree and copies it to the same
//! relative path under the target. Files that cannot be written now are
//! deferred instead of failing the pass:
//!
//! - files whose name matches a running executable from the application
//!   directory are deferred without trying
//! - any other copy failure (locked, permission denied) is logged and deferred
//!
//! The caller decides what deferral means: finalize when nothing was deferred,
//! otherwise persist a ledger. Copies are not transactional; a crash mid-pass
//! leaves a mixed tree, which the preceding backup makes recoverable.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::upgrade::processes::RunningExecutableSet;
use crate::utils::fs::{clear_readonly, join_slash_path, relative_slash_path};

/// Outcome of one install pass. Paths are relative and `/`-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub copied: Vec<String>,
    pub deferred: Vec<String>,
}

impl InstallReport {
    /// Whether every file was written.
    pub fn is_complete(&self) -> bool {
        self.deferred.is_empty()
    }
}

/// Copy the tree under `source_root` onto `target_dir`.
///
/// Top-level files named in `skip_names` (the updater's own state files) are
/// never installed. `on_file(done, total)` is called after each file.
pub fn install_tree<F>(
    source_root: &Path,
    target_dir: &Path,
    running: &RunningExecutableSet,
    skip_names: &[String],
    mut on_file: F,
) -> Result<InstallReport>
where
    F: FnMut(usize, usize),
{
    let files = collect_files(source_root)?;
    let total = files.len();
    let mut report = InstallReport::default();

    for (index, relative) in files.into_iter().enumerate() {
        if !relative.contains('/') && skip_names.iter().any(|s| s.eq_ignore_ascii_case(&relative)) {
            debug!("Not installing updater state file {}", relative);
        } else {
            let source = join_slash_path(source_root, &relative);
            if running.matches(&source) {
                debug!("Deferring running executable {}", relative);
                report.deferred.push(relative);
            } else {
                match copy_over(&source, &join_slash_path(target_dir, &relative)) {
                    Ok(()) => report.copied.push(relative),
                    Err(e) => {
                        warn!("Deferring {}: {:#}", relative, e);
                        report.deferred.push(relative);
                    }
                }
            }
        }
        on_file(index + 1, total);
    }

    Ok(report)
}

/// Outcome of completing a deferred list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedReport {
    /// Files that exist but still could not be written.
    pub remaining: Vec<String>,
    /// Files found nowhere under the scratch directory.
    pub missing: Vec<String>,
}

/// Where a deferred file's new content lives.
///
/// The recorded path under `source_root` wins; otherwise the first file with
/// the same name anywhere under `search_root`.
pub fn locate_listed(source_root: &Path, search_root: &Path, relative: &str) -> Option<PathBuf> {
    let expected = join_slash_path(source_root, relative);
    if expected.is_file() {
        return Some(expected);
    }
    let name = relative.rsplit('/').next().unwrap_or(relative);
    WalkDir::new(search_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name().to_str() == Some(name))
        .map(|entry| entry.into_path())
}

/// Listed paths with no source anywhere under `search_root`.
pub fn missing_listed(source_root: &Path, search_root: &Path, relatives: &[String]) -> Vec<String> {
    relatives
        .iter()
        .filter(|relative| locate_listed(source_root, search_root, relative).is_none())
        .cloned()
        .collect()
}

/// Copy only the listed relative paths.
///
/// Used when completing a deferred operation.
pub fn install_listed(
    source_root: &Path,
    search_root: &Path,
    target_dir: &Path,
    relatives: &[String],
) -> ListedReport {
    let mut report = ListedReport::default();
    for relative in relatives {
        let Some(source) = locate_listed(source_root, search_root, relative) else {
            warn!("Deferred file {} is missing from {}", relative, search_root.display());
            report.missing.push(relative.clone());
            continue;
        };
        if let Err(e) = copy_over(&source, &join_slash_path(target_dir, relative)) {
            warn!("Still unable to replace {}: {:#}", relative, e);
            report.remaining.push(relative.clone());
        }
    }
    report
}

/// All regular files under `root`, relative, sorted.
fn collect_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = relative_slash_path(root, entry.path()) {
            files.push(relative);
        }
    }
    Ok(files)
}

fn copy_over(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    clear_readonly(target)
        .with_context(|| format!("Failed to clear read-only flag on {}", target.display()))?;
    fs::copy(source, target).with_context(|| {
        format!("Failed to copy {} to {}", source.display(), target.display())
    })?;
    Ok(())
}

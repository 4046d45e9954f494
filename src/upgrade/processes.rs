//! Which executables under the application directory are currently running.
//!
//! The installer consults this once per pass to decide whether a target file
//! can be overwritten now or must be deferred. Enumeration goes through the
//! [`ProcessProbe`] trait so tests can script the answer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of running process image paths.
pub trait ProcessProbe: Send + Sync {
    /// Image paths of running processes. Entries that cannot be read are skipped.
    fn running_executables(&self) -> Vec<PathBuf>;
}

/// Probe backed by the operating system.
///
/// On Linux every `/proc/<pid>/exe` link readable by this user is reported.
/// Elsewhere only the current process is known. The current executable is
/// always included.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    fn running_executables(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = Vec::new();
        if let Ok(current) = std::env::current_exe() {
            found.push(current);
        }

        #[cfg(target_os = "linux")]
        if let Ok(entries) = std::fs::read_dir("/proc") {
            for entry in entries.flatten() {
                let is_pid = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.chars().all(|c| c.is_ascii_digit()));
                if !is_pid {
                    continue;
                }
                if let Ok(exe) = std::fs::read_link(entry.path().join("exe")) {
                    found.push(exe);
                }
            }
        }

        found
    }
}

/// File names of running executables that live under the application directory.
///
/// Computed once at the start of an install pass and never persisted. Matching
/// is by file name, ignoring case on Windows, because a file in the scratch
/// tree is compared against the live image it would replace.
#[derive(Debug, Clone, Default)]
pub struct RunningExecutableSet {
    names: HashSet<String>,
}

impl RunningExecutableSet {
    /// Snapshot the processes running from inside `app_dir`.
    pub fn capture(probe: &dyn ProcessProbe, app_dir: &Path) -> Self {
        let root = canonical_or_self(app_dir);
        let names: HashSet<String> = probe
            .running_executables()
            .into_iter()
            .filter(|exe| canonical_or_self(exe).starts_with(&root))
            .filter_map(|exe| exe.file_name().map(|n| fold_case(&n.to_string_lossy())))
            .collect();

        debug!("{} running executable(s) under {}", names.len(), app_dir.display());
        Self { names }
    }

    /// Whether a file with this name is one of the running images.
    pub fn contains_name(&self, file_name: &str) -> bool {
        self.names.contains(&fold_case(file_name))
    }

    /// Whether the file at `path` shares its name with a running image.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|n| self.contains_name(&n.to_string_lossy()))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    // `/proc/<pid>/exe` may carry a " (deleted)" suffix once the image is replaced
    let cleaned = path
        .to_str()
        .and_then(|s| s.strip_suffix(" (deleted)"))
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf());
    std::fs::canonicalize(&cleaned).unwrap_or(cleaned)
}

#[cfg(windows)]
fn fold_case(name: &str) -> String {
    name.to_lowercase()
}

#[cfg(not(windows))]
fn fold_case(name: &str) -> String {
    name.to_string()
}

//! On-disk layout of a managed installation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::constants::{
    BACKUPS_DIR, HANDOFF_SCRIPT_STEM, LOGS_DIR, ROLLBACK_LEDGER_FILE, TEMP_DIR,
    UPDATE_LEDGER_FILE, VERSION_MARKER_FILE, VERSION_RECORD_FILE,
};

/// Every path the updater reads or writes, derived from the application directory.
///
/// ```rust
/// use overlay_updater::upgrade::AppPaths;
///
/// let paths = AppPaths::new("/games/overlay", "GameOverlay", "GameOverlay.exe");
/// assert!(paths.update_ledger().ends_with("pending_update.json"));
/// assert!(paths.backups_dir().ends_with("Backups"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    app_dir: PathBuf,
    app_name: String,
    executable: String,
}

impl AppPaths {
    /// Layout rooted at `app_dir` whose main executable is `executable`.
    pub fn new(
        app_dir: impl Into<PathBuf>,
        app_name: impl Into<String>,
        executable: impl Into<String>,
    ) -> Self {
        Self {
            app_dir: app_dir.into(),
            app_name: app_name.into(),
            executable: executable.into(),
        }
    }

    /// Resolve the layout from configuration.
    ///
    /// Unset values fall back to the running executable's directory and file
    /// name; `app_dir_override` (the `--app-dir` flag) beats both.
    pub fn from_config(app: &AppConfig, app_dir_override: Option<PathBuf>) -> Result<Self> {
        let current_exe = std::env::current_exe().context("Failed to locate running executable")?;

        let app_dir = match app_dir_override.or_else(|| app.dir.clone()) {
            Some(dir) => dir,
            None => current_exe
                .parent()
                .map(Path::to_path_buf)
                .context("Running executable has no parent directory")?,
        };

        let executable = match &app.executable {
            Some(name) => name.clone(),
            None => current_exe
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("Running executable has no file name")?,
        };

        Ok(Self::new(app_dir, app.name.clone(), executable))
    }

    /// Application root.
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Application name used in backup file names.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// File name of the main executable.
    pub fn executable_name(&self) -> &str {
        &self.executable
    }

    /// Full path of the main executable.
    pub fn executable(&self) -> PathBuf {
        self.app_dir.join(&self.executable)
    }

    pub fn version_marker(&self) -> PathBuf {
        self.app_dir.join(VERSION_MARKER_FILE)
    }

    pub fn version_record(&self) -> PathBuf {
        self.app_dir.join(VERSION_RECORD_FILE)
    }

    pub fn update_ledger(&self) -> PathBuf {
        self.app_dir.join(UPDATE_LEDGER_FILE)
    }

    pub fn rollback_ledger(&self) -> PathBuf {
        self.app_dir.join(ROLLBACK_LEDGER_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.app_dir.join(BACKUPS_DIR)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.app_dir.join(TEMP_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.app_dir.join(LOGS_DIR)
    }

    /// Path of the generated finalize script (`.cmd` on Windows, `.sh` elsewhere).
    pub fn handoff_script(&self) -> PathBuf {
        let extension = if cfg!(windows) { "cmd" } else { "sh" };
        self.app_dir.join(format!("{HANDOFF_SCRIPT_STEM}.{extension}"))
    }

    /// Top-level file names that are updater state, never application content.
    ///
    /// Backups skip them and installs never overwrite them.
    pub fn state_file_names(&self) -> Vec<String> {
        [UPDATE_LEDGER_FILE, ROLLBACK_LEDGER_FILE]
            .iter()
            .map(ToString::to_string)
            .chain(
                self.handoff_script()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
            )
            .collect()
    }
}

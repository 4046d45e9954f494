//! Installed-application fixtures and archive builders.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::constants::{BACKUPS_DIR, LOGS_DIR, TEMP_DIR};
use crate::upgrade::AppPaths;
use crate::upgrade::config::UpgradeConfig;

/// Application name and executable used by every fixture.
pub const FIXTURE_APP: &str = "GameOverlay";

/// An application directory in a temporary location.
///
/// The directory is removed when the fixture is dropped.
pub struct AppFixture {
    temp: TempDir,
    pub paths: AppPaths,
}

impl AppFixture {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new().context("Failed to create temp directory")?;
        let app_dir = temp.path().join(FIXTURE_APP);
        fs::create_dir_all(&app_dir)?;
        let paths = AppPaths::new(app_dir, FIXTURE_APP, FIXTURE_APP);
        Ok(Self { temp, paths })
    }

    /// An installed version: `files` plus a version record.
    pub fn installed(version: &str, files: &[(&str, &str)]) -> Result<Self> {
        let fixture = Self::new()?;
        for (relative, content) in files {
            fixture.write(relative, content)?;
        }
        fixture.write(
            "version.json",
            &format!(r#"{{"Version": "{version}", "UpdatedOn": "2025-01-01T00:00:00Z"}}"#),
        )?;
        Ok(fixture)
    }

    pub fn app_dir(&self) -> &Path {
        self.paths.app_dir()
    }

    /// A scratch location outside the application directory.
    pub fn outside(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.app_dir().join(relative)
    }

    /// Write `content` at `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.path(relative);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    /// Every installed file and its bytes, ignoring updater working directories.
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(self.app_dir()).min_depth(1).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() != 1 || ![BACKUPS_DIR, TEMP_DIR, LOGS_DIR].iter().any(|dir| *dir == name)
        });
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(self.app_dir())?
                    .to_string_lossy()
                    .replace('\\', "/");
                files.insert(relative, fs::read(entry.path())?);
            }
        }
        Ok(files)
    }
}

/// Configuration that accepts the tiny archives tests build.
pub fn test_config() -> UpgradeConfig {
    UpgradeConfig {
        min_download_bytes: 16,
        min_backup_bytes: 16,
        use_system_proxy: false,
        ..UpgradeConfig::default()
    }
}

/// Write a zip archive with the given entries. Names are stored verbatim.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(content)?;
    }
    writer.finish()?;
    Ok(())
}

/// Bytes of a zip archive with the given entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let temp = TempDir::new()?;
    let path = temp.path().join("package.zip");
    write_zip(&path, entries)?;
    Ok(fs::read(&path)?)
}

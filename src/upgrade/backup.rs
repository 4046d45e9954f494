use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::constants::{ARCHIVE_EXTENSION, BACKUPS_DIR, BACKUP_TIMESTAMP_FORMAT, TEMP_DIR};
use crate::core::UpdateError;
use crate::upgrade::archive::verify_archive;
use crate::upgrade::config::UpgradeConfig;
use crate::upgrade::paths::AppPaths;
use crate::utils::fs::relative_slash_path;

/// A backup archive found on disk.
///
/// Everything except the size is derived from the file name
/// `<AppName>_v<version>_<yyyyMMdd_HHmmss>.zip`; backups are never modified,
/// only enumerated and deleted by retention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub file_name: String,
    pub version: String,
    pub creation_date: NaiveDateTime,
    pub size_in_mb: f64,
}

impl BackupInfo {
    /// Split a backup file name into `(version, creation time)`.
    ///
    /// ```rust
    /// use overlay_updater::upgrade::backup::BackupInfo;
    ///
    /// let (version, created) =
    ///     BackupInfo::parse_file_name("GameOverlay_v1.5.12_20250301_094500.zip").unwrap();
    /// assert_eq!(version, "1.5.12");
    /// assert_eq!(created.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-03-01 09:45:00");
    /// ```
    pub fn parse_file_name(file_name: &str) -> Option<(String, NaiveDateTime)> {
        let stem = file_name.strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))?;
        // "yyyyMMdd_HHmmss" is 15 characters, preceded by '_'
        if stem.len() < 17 || !stem.is_char_boundary(stem.len() - 15) {
            return None;
        }
        let (head, timestamp) = stem.split_at(stem.len() - 15);
        let created = NaiveDateTime::parse_from_str(timestamp, BACKUP_TIMESTAMP_FORMAT).ok()?;

        let head = head.strip_suffix('_')?;
        let version_start = head.rfind("_v")? + 2;
        let version = &head[version_start..];
        if version.is_empty() {
            return None;
        }
        Some((version.to_string(), created))
    }
}

/// Creates, enumerates and prunes full-directory backup archives.
///
/// A backup is a zip of the whole application directory minus the volatile
/// subtrees named in [`UpgradeConfig::excluded_dirs`] and the updater's own
/// state files. Every backup is verified after writing: it must reach the
/// configured minimum size and open as a zip archive, otherwise the file is
/// deleted and [`UpdateError::BackupTooSmall`] or
/// [`UpdateError::InvalidArchive`] is returned. The orchestrator treats any
/// backup failure as fatal for the operation, so nothing destructive ever runs
/// without a fresh backup.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_updater::config::UpgradeConfig;
/// use overlay_updater::upgrade::AppPaths;
/// use overlay_updater::upgrade::backup::BackupManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let paths = AppPaths::new("/games/overlay", "GameOverlay", "GameOverlay.exe");
/// let manager = BackupManager::new(&paths, &UpgradeConfig::default());
///
/// let archive = manager.create_backup("1.5.12").await?;
/// println!("Backed up to {}", archive.display());
///
/// for backup in manager.list_backups().await? {
///     println!("{} ({:.2} MB)", backup.file_name, backup.size_in_mb);
/// }
///
/// let removed = manager.cleanup_old_backups(5).await?;
/// println!("Removed {removed} old backup(s)");
/// # Ok(())
/// # }
/// ```
pub struct BackupManager {
    app_dir: PathBuf,
    backups_dir: PathBuf,
    app_name: String,
    excluded_dirs: Vec<String>,
    excluded_files: Vec<String>,
    min_backup_bytes: u64,
}

impl BackupManager {
    pub fn new(paths: &AppPaths, config: &UpgradeConfig) -> Self {
        Self {
            app_dir: paths.app_dir().to_path_buf(),
            backups_dir: paths.backups_dir(),
            app_name: paths.app_name().to_string(),
            excluded_dirs: always_excluded(&config.excluded_dirs),
            excluded_files: paths.state_file_names(),
            min_backup_bytes: config.min_backup_bytes,
        }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    /// Archive the application directory, tagged with `version`.
    ///
    /// Returns the path of the verified archive.
    pub async fn create_backup(&self, version: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.backups_dir).await.with_context(|| {
            format!("Failed to create backup directory: {}", self.backups_dir.display())
        })?;

        let target = self.next_backup_path(version).await;
        info!("Creating backup at {}", target.display());

        let app_dir = self.app_dir.clone();
        let excluded_dirs = self.excluded_dirs.clone();
        let excluded_files = self.excluded_files.clone();
        let archive_path = target.clone();
        let written = tokio::task::spawn_blocking(move || {
            write_directory_archive(&app_dir, &archive_path, &excluded_dirs, &excluded_files)
        })
        .await
        .context("Backup task panicked")?;

        if let Err(e) = written {
            let _ = fs::remove_file(&target).await;
            return Err(e.context("Failed to write backup archive"));
        }

        if let Err(e) = self.verify_backup(&target).await {
            let _ = fs::remove_file(&target).await;
            return Err(e);
        }

        info!("Backup created successfully");
        Ok(target)
    }

    async fn verify_backup(&self, path: &Path) -> Result<()> {
        let size = fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat backup {}", path.display()))?
            .len();
        if size < self.min_backup_bytes {
            return Err(UpdateError::BackupTooSmall {
                path: path.display().to_string(),
                size,
                minimum: self.min_backup_bytes,
            }
            .into());
        }

        let path = path.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || verify_archive(&path))
            .await
            .context("Backup verification task panicked")??;
        debug!("Backup verified: {} bytes, {} entries", size, entries);
        Ok(())
    }

    /// First free `<App>_v<version>_<timestamp>.zip`, bumping the timestamp by
    /// a second on collision.
    async fn next_backup_path(&self, version: &str) -> PathBuf {
        let mut stamp = Local::now().naive_local();
        loop {
            let name = format!(
                "{}_v{}_{}.{}",
                self.app_name,
                version,
                stamp.format(BACKUP_TIMESTAMP_FORMAT),
                ARCHIVE_EXTENSION
            );
            let candidate = self.backups_dir.join(name);
            if !fs::try_exists(&candidate).await.unwrap_or(false) {
                return candidate;
            }
            stamp += ChronoDuration::seconds(1);
        }
    }

    /// All parseable backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        let mut entries = match fs::read_dir(&self.backups_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(backups),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read backup directory: {}", self.backups_dir.display())
                });
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some((version, creation_date)) = BackupInfo::parse_file_name(&file_name) else {
                debug!("Skipping unrecognised file in backups: {}", file_name);
                continue;
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            backups.push(BackupInfo {
                file_name,
                version,
                creation_date,
                size_in_mb: (metadata.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            });
        }

        backups.sort_by(|a, b| {
            b.creation_date
                .cmp(&a.creation_date)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(backups)
    }

    /// Delete every backup beyond the `keep` newest. Returns how many were deleted.
    pub async fn cleanup_old_backups(&self, keep: usize) -> Result<usize> {
        let mut deleted = 0;
        for backup in self.list_backups().await?.into_iter().skip(keep) {
            let path = self.backups_dir.join(&backup.file_name);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Deleted old backup {}", backup.file_name);
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete old backup {}: {}", backup.file_name, e),
            }
        }
        if deleted > 0 {
            info!("Removed {} old backup(s), keeping {}", deleted, keep);
        }
        Ok(deleted)
    }

    /// Path of the backup called `file_name`, which must exist.
    ///
    /// Names containing path separators are rejected so callers cannot reach
    /// outside the backups directory.
    pub fn backup_path(&self, file_name: &str) -> Result<PathBuf> {
        let not_found = || UpdateError::BackupNotFound {
            name: file_name.to_string(),
        };
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name == "."
            || file_name == ".."
        {
            return Err(not_found().into());
        }
        let path = self.backups_dir.join(file_name);
        if !path.is_file() {
            return Err(not_found().into());
        }
        Ok(path)
    }
}

/// Zip `root` into `archive_path`, skipping excluded top-level entries.
/// Configured exclusions plus the updater's own working directories, which a
/// backup must never contain.
fn always_excluded(configured: &[String]) -> Vec<String> {
    let mut dirs = configured.to_vec();
    for required in [BACKUPS_DIR, TEMP_DIR] {
        if !dirs.iter().any(|d| d.eq_ignore_ascii_case(required)) {
            dirs.push(required.to_string());
        }
    }
    dirs
}

fn write_directory_archive(
    root: &Path,
    archive_path: &Path,
    excluded_dirs: &[String],
    excluded_files: &[String],
) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let base_options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let walker = WalkDir::new(root).min_depth(1).into_iter().filter_entry(|entry| {
        if entry.depth() != 1 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        let excluded = if entry.file_type().is_dir() {
            excluded_dirs
        } else {
            excluded_files
        };
        !excluded.iter().any(|x| x.eq_ignore_ascii_case(&name))
    });

    for entry in walker {
        let entry = entry.context("Failed to walk application directory")?;
        let Some(name) = relative_slash_path(root, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), base_options)?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let options = file_options(base_options, entry.path());
        writer.start_file(name.as_str(), options)?;
        let mut source = File::open(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        io::copy(&mut source, &mut writer)
            .with_context(|| format!("Failed to archive {}", entry.path().display()))?;
    }

    writer.finish().context("Failed to finalize backup archive")?;
    Ok(())
}

#[cfg(unix)]
fn file_options(options: SimpleFileOptions, path: &Path) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(metadata) => options.unix_permissions(metadata.permissions().mode() & 0o777),
        Err(_) => options,
    }
}

#[cfg(not(unix))]
fn file_options(options: SimpleFileOptions, _path: &Path) -> SimpleFileOptions {
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, UpdateFailure};
    use crate::test_utils::{AppFixture, test_config};
    use tempfile::TempDir;

    #[test]
    fn test_parse_file_name() {
        let (version, created) =
            BackupInfo::parse_file_name("GameOverlay_v1.5.12_20250301_094500.zip").unwrap();
        assert_eq!(version, "1.5.12");
        assert_eq!(created.to_string(), "2025-03-01 09:45:00");

        let (version, _) =
            BackupInfo::parse_file_name("My_very_app_v2.0.0_20250301_094500.zip").unwrap();
        assert_eq!(version, "2.0.0");

        assert!(BackupInfo::parse_file_name("GameOverlay_v1.5.12_20250301_094500.tar").is_none());
        assert!(BackupInfo::parse_file_name("GameOverlay_1.5.12_20250301_094500.zip").is_none());
        assert!(BackupInfo::parse_file_name("GameOverlay_v1.5.12_2025.zip").is_none());
        assert!(BackupInfo::parse_file_name("notes.zip").is_none());
    }

    #[tokio::test]
    async fn test_create_backup_excludes_volatile_dirs() -> Result<()> {
        let fixture = AppFixture::new()?;
        fixture.write("GameOverlay", "binary")?;
        fixture.write("data/maps.json", "{\"maps\": []}")?;
        fixture.write("logs/old.log", "log")?;
        fixture.write("temp/scratch.bin", "scratch")?;
        fixture.write("WebView2/cache.db", "cache")?;
        fixture.write("pending_update.json", "{}")?;

        let manager = BackupManager::new(&fixture.paths, &test_config());
        let archive = manager.create_backup("1.5.12").await?;

        let name = archive.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("GameOverlay_v1.5.12_"));

        let restored = TempDir::new()?;
        crate::upgrade::archive::extract_archive(&archive, restored.path())?;
        assert!(restored.path().join("GameOverlay").exists());
        assert!(restored.path().join("data").join("maps.json").exists());
        assert!(!restored.path().join("logs").exists());
        assert!(!restored.path().join("temp").exists());
        assert!(!restored.path().join("WebView2").exists());
        assert!(!restored.path().join("Backups").exists());
        assert!(!restored.path().join("pending_update.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_exclusions_still_skip_backups_and_temp() -> Result<()> {
        let fixture = AppFixture::new()?;
        fixture.write("GameOverlay", "binary content")?;
        fixture.write("temp/update_1.6.0.zip", "package")?;
        fixture.write("WebView2/cache.db", "cache")?;

        let mut config = test_config();
        config.excluded_dirs = vec!["logs".to_string()];
        let manager = BackupManager::new(&fixture.paths, &config);

        manager.create_backup("1.5.0").await?;
        let second = manager.create_backup("1.5.0").await?;

        let archive = zip::ZipArchive::new(File::open(&second)?)?;
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"GameOverlay"));
        assert!(names.iter().any(|n| n.starts_with("WebView2/")));
        assert!(!names.iter().any(|n| n.starts_with("Backups/") || n.starts_with("temp/")));
        Ok(())
    }

    #[tokio::test]
    async fn test_undersized_backup_is_rejected_and_removed() -> Result<()> {
        let fixture = AppFixture::new()?;
        fixture.write("GameOverlay", "x")?;

        let mut config = test_config();
        config.min_backup_bytes = 10 * 1024 * 1024;
        let manager = BackupManager::new(&fixture.paths, &config);

        let err = manager.create_backup("1.0.0").await.unwrap_err();
        assert_eq!(UpdateFailure::from_anyhow(&err).kind, ErrorKind::Integrity);
        assert!(manager.list_backups().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_same_second_backups_do_not_collide() -> Result<()> {
        let fixture = AppFixture::new()?;
        fixture.write("GameOverlay", "binary content")?;
        let manager = BackupManager::new(&fixture.paths, &test_config());

        let first = manager.create_backup("1.0.0").await?;
        let second = manager.create_backup("1.0.0").await?;
        assert_ne!(first, second);
        assert_eq!(manager.list_backups().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_cleanup_keeps_newest() -> Result<()> {
        let fixture = AppFixture::new()?;
        let manager = BackupManager::new(&fixture.paths, &test_config());
        for day in 1..=7 {
            fixture.write(
                &format!("Backups/GameOverlay_v1.0.{day}_2025010{day}_120000.zip"),
                "zip",
            )?;
        }
        fixture.write("Backups/readme.txt", "not a backup")?;

        let backups = manager.list_backups().await?;
        assert_eq!(backups.len(), 7);
        assert_eq!(backups[0].version, "1.0.7");
        assert_eq!(backups[6].version, "1.0.1");

        assert_eq!(manager.cleanup_old_backups(5).await?, 2);
        let remaining: Vec<String> =
            manager.list_backups().await?.into_iter().map(|b| b.version).collect();
        assert_eq!(remaining, vec!["1.0.7", "1.0.6", "1.0.5", "1.0.4", "1.0.3"]);

        assert_eq!(manager.cleanup_old_backups(5).await?, 0);
        assert!(fixture.paths.backups_dir().join("readme.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_without_backups_dir() -> Result<()> {
        let fixture = AppFixture::new()?;
        let manager = BackupManager::new(&fixture.paths, &test_config());
        assert!(manager.list_backups().await?.is_empty());
        assert_eq!(manager.cleanup_old_backups(0).await?, 0);
        Ok(())
    }

    #[test]
    fn test_backup_path_rejects_traversal() -> Result<()> {
        let fixture = AppFixture::new()?;
        fixture.write("Backups/GameOverlay_v1.0.0_20250101_120000.zip", "zip")?;
        let manager = BackupManager::new(&fixture.paths, &test_config());

        assert!(manager.backup_path("GameOverlay_v1.0.0_20250101_120000.zip").is_ok());
        assert!(manager.backup_path("../version.json").is_err());
        assert!(manager.backup_path("missing.zip").is_err());
        assert!(manager.backup_path("").is_err());
        Ok(())
    }
}

//! Global configuration management for the updater.
//!
//! The global configuration file holds user-wide settings: which application
//! directory to manage and how updates behave. It is optional; a missing file
//! yields defaults that manage the directory of the running executable.
//!
//! # Configuration File Location
//!
//! - **Unix/macOS**: `~/.overlay-updater/config.toml`
//! - **Windows**: `%LOCALAPPDATA%\overlay-updater\config.toml`
//!
//! The location can be overridden with the `OVERLAY_UPDATER_CONFIG` environment
//! variable or the `--config` flag.
//!
//! # File Format
//!
//! ```toml
//! [app]
//! name = "GameOverlay"
//! dir = "C:/Games/GameOverlay"
//! executable = "GameOverlay.exe"
//!
//! [upgrade]
//! repo_owner = "overlay-team"
//! repo_name = "game-overlay"
//! backup_retention = 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::DEFAULT_APP_NAME;
use crate::upgrade::config::UpgradeConfig;

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "OVERLAY_UPDATER_CONFIG";

/// The `[app]` table: which installation is managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name used in backup archive names.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application directory. Defaults to the running executable's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// File name of the main executable inside `dir`.
    /// Defaults to the running executable's file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            dir: None,
            executable: None,
        }
    }
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

/// Global configuration for the updater.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_updater::config::GlobalConfig;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = GlobalConfig::load().await?;
/// println!("Keeping {} backups", config.upgrade.backup_retention);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Managed application.
    #[serde(default)]
    pub app: AppConfig,

    /// Update behavior.
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

impl GlobalConfig {
    /// Load from the default location, or defaults if the file doesn't exist.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from an explicit path, falling back to the default location.
    ///
    /// A missing file is not an error; an unreadable or invalid one is.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Save to a specific file, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Default config file path.
    ///
    /// `OVERLAY_UPDATER_CONFIG` wins; otherwise a per-user location.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("overlay-updater")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".overlay-updater")
        };

        Ok(config_dir.join("config.toml"))
    }
}

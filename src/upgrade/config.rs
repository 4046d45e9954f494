use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration settings for update, backup and rollback behavior.
///
/// `UpgradeConfig` is the `[upgrade]` table of the global configuration file.
/// Every field has a serde default, so a partial table (or none at all) yields a
/// working configuration.
///
/// # Configuration Categories
///
/// ## Release Feed
/// - **Repository**: `repo_owner` / `repo_name` on the hosted releases API
/// - **Pre-releases**: whether to query "all releases" instead of "latest stable"
///
/// ## Safety Settings
/// - **Minimum sizes** for downloads and backups, rejecting error pages saved as packages
/// - **Retention**: how many backup archives to keep
///
/// ## Transport
/// - **Download timeout**: overall deadline for one package download
/// - **System proxy**: whether to honor proxy environment variables
///
/// # TOML Example
/// ```toml
/// [upgrade]
/// repo_owner = "overlay-team"
/// repo_name = "game-overlay"
/// include_prereleases = false
/// backup_retention = 5
/// download_timeout_secs = 300
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Owner of the repository whose releases are polled.
    #[serde(default = "default_repo_owner")]
    pub repo_owner: String,

    /// Name of the repository whose releases are polled.
    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    /// Base URL of the releases API.
    ///
    /// # Default: `https://api.github.com`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Whether pre-releases are candidates.
    ///
    /// When `false` only the "latest stable" release is queried. When `true`
    /// the full release list is walked newest-first.
    ///
    /// # Default: `false`
    #[serde(default)]
    pub include_prereleases: bool,

    /// Whether callers should check for updates at startup.
    ///
    /// # Default: `true`
    #[serde(default = "default_check_on_startup")]
    pub check_on_startup: bool,

    /// Number of backup archives kept after a successful update.
    ///
    /// # Default: `5`
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,

    /// Overall deadline for one package download in seconds.
    ///
    /// A download that exceeds it is aborted and reported; it is never retried
    /// automatically.
    ///
    /// # Default: `300` (5 minutes)
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Downloads smaller than this are rejected as not being a real package.
    ///
    /// # Default: `102400` (100 KiB)
    #[serde(default = "default_min_download_bytes")]
    pub min_download_bytes: u64,

    /// Backups smaller than this fail verification and abort the update.
    ///
    /// # Default: `1024`
    #[serde(default = "default_min_backup_bytes")]
    pub min_backup_bytes: u64,

    /// Top-level directories of the application left out of backups.
    ///
    /// # Default: `Backups`, `temp`, `logs`, `WebView2`
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,

    /// Whether HTTP clients honor proxy environment variables.
    ///
    /// # Default: `true`
    #[serde(default = "default_use_system_proxy")]
    pub use_system_proxy: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            repo_owner: default_repo_owner(),
            repo_name: default_repo_name(),
            api_base_url: default_api_base_url(),
            include_prereleases: false,
            check_on_startup: default_check_on_startup(),
            backup_retention: default_backup_retention(),
            download_timeout_secs: default_download_timeout_secs(),
            min_download_bytes: default_min_download_bytes(),
            min_backup_bytes: default_min_backup_bytes(),
            excluded_dirs: default_excluded_dirs(),
            use_system_proxy: default_use_system_proxy(),
        }
    }
}

fn default_repo_owner() -> String {
    "overlay-team".to_string()
}

fn default_repo_name() -> String {
    "game-overlay".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_check_on_startup() -> bool {
    true
}

fn default_backup_retention() -> usize {
    5
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_min_download_bytes() -> u64 {
    100 * 1024
}

fn default_min_backup_bytes() -> u64 {
    1024
}

fn default_excluded_dirs() -> Vec<String> {
    ["Backups", "temp", "logs", "WebView2"].iter().map(ToString::to_string).collect()
}

fn default_use_system_proxy() -> bool {
    true
}

impl UpgradeConfig {
    /// Create a new `UpgradeConfig` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Download deadline as a [`Duration`].
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Build an HTTP client honoring the proxy setting.
    pub(crate) fn http_client_builder(&self) -> reqwest::ClientBuilder {
        let builder = reqwest::Client::builder().user_agent(crate::constants::USER_AGENT);
        if self.use_system_proxy {
            builder
        } else {
            builder.no_proxy()
        }
    }
}

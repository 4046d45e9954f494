//! Polling the hosted release feed.
//!
//! Two feeds exist: "latest stable" (`/releases/latest`, a single release) and
//! "all releases" (`/releases`, newest first), chosen by
//! [`UpgradeConfig::include_prereleases`]. Both go through the same selection
//! rule, [`select_candidate`]:
//!
//! - drafts are skipped
//! - the tag is normalized ([`normalize_tag`]) and compared with the installed
//!   version; only strictly newer releases qualify
//! - a qualifying release must carry a `.zip` asset; one without is skipped
//!   and the search continues
//!
//! The first release passing all three is the candidate.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::constants::{ARCHIVE_EXTENSION, RELEASE_FEED_TIMEOUT};
use crate::core::UpdateError;
use crate::upgrade::config::UpgradeConfig;
use crate::upgrade::events::{UpdateCandidate, UpdateEvent};
use crate::upgrade::version::{is_newer, normalize_tag};
use crate::upgrade::version_resolver::VersionResolver;

/// A release as returned by the feed. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// Download URL of the first installable archive asset.
    pub fn archive_url(&self) -> Option<&str> {
        let suffix = format!(".{ARCHIVE_EXTENSION}");
        self.assets
            .iter()
            .find(|a| a.name.to_ascii_lowercase().ends_with(&suffix))
            .map(|a| a.browser_download_url.as_str())
    }
}

/// Pick the release to offer, if any. `releases` is newest first.
pub fn select_candidate(releases: &[Release], current: &str) -> Option<UpdateCandidate> {
    for release in releases {
        if release.draft {
            debug!("Skipping draft {}", release.tag_name);
            continue;
        }
        let version = normalize_tag(&release.tag_name);
        if !is_newer(version, current) {
            continue;
        }
        let Some(download_url) = release.archive_url() else {
            info!("Release {} is newer but has no .{} asset, skipping", version, ARCHIVE_EXTENSION);
            continue;
        };
        return Some(UpdateCandidate {
            version: version.to_string(),
            download_url: download_url.to_string(),
            notes: release.body.clone().unwrap_or_default(),
            html_url: release.html_url.clone(),
        });
    }
    None
}

/// Queries the release feed and announces newer versions.
pub struct ReleaseChecker {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    include_prereleases: bool,
    events: Option<broadcast::Sender<UpdateEvent>>,
}

impl ReleaseChecker {
    pub fn new(config: &UpgradeConfig) -> Result<Self> {
        let client = config
            .http_client_builder()
            .timeout(RELEASE_FEED_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            owner: config.repo_owner.clone(),
            repo: config.repo_name.clone(),
            include_prereleases: config.include_prereleases,
            events: None,
        })
    }

    /// Publish `UpdateAvailable` on `sender` when a candidate is found.
    #[must_use]
    pub fn with_events(mut self, sender: broadcast::Sender<UpdateEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    fn feed_url(&self) -> String {
        let base = format!("{}/repos/{}/{}/releases", self.api_base, self.owner, self.repo);
        if self.include_prereleases {
            base
        } else {
            format!("{base}/latest")
        }
    }

    /// Fetch the configured feed, newest first.
    pub async fn fetch_releases(&self) -> Result<Vec<Release>> {
        let url = self.feed_url();
        debug!("Querying release feed {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| feed_error(&url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && !self.include_prereleases {
            debug!("No published release yet");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                url,
                status: status.as_u16(),
            }
            .into());
        }

        if self.include_prereleases {
            response
                .json::<Vec<Release>>()
                .await
                .with_context(|| format!("Failed to parse release list from {url}"))
        } else {
            let release = response
                .json::<Release>()
                .await
                .with_context(|| format!("Failed to parse latest release from {url}"))?;
            Ok(vec![release])
        }
    }

    /// Compare the feed with the installed version.
    ///
    /// Emits `UpdateAvailable` with the returned candidate, or `UpToDate`.
    pub async fn check_for_updates(
        &self,
        resolver: &VersionResolver,
    ) -> Result<Option<UpdateCandidate>> {
        let current = resolver.current_version();
        let releases = self.fetch_releases().await?;
        let candidate = select_candidate(&releases, &current);

        match &candidate {
            Some(candidate) => {
                info!("Update available: {} -> {}", current, candidate.version);
                if let Some(events) = &self.events {
                    let _ = events.send(UpdateEvent::UpdateAvailable(candidate.clone()));
                }
            }
            None => {
                info!("No update available (installed {})", current);
                if let Some(events) = &self.events {
                    let _ = events.send(UpdateEvent::UpToDate { current });
                }
            }
        }
        Ok(candidate)
    }
}

fn feed_error(url: &str, error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        UpdateError::Timeout {
            url: url.to_string(),
            seconds: RELEASE_FEED_TIMEOUT.as_secs(),
        }
        .into()
    } else {
        UpdateError::Network {
            operation: "release feed query".to_string(),
            reason: error.to_string(),
        }
        .into()
    }
}

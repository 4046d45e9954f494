//! Resolution of "which version is installed".
//!
//! Several signals disagree about the installed version after some historical
//! update paths, so the resolver consults an ordered list of [`VersionSource`]s
//! and takes the first usable answer:
//!
//! 1. the override marker (`version.txt`), if present and non-empty
//! 2. the version record (`version.json`), if present and parseable
//! 3. the version embedded in the running binary
//! 4. an optional legacy source, for installations older than the record
//!
//! A source that fails to read is logged and skipped; resolution itself never
//! fails and falls back to `0.0.0`. The result is cached until
//! [`VersionResolver::invalidate`] is called.
//!
//! The marker always beats the record. That precedence is intentional: the
//! marker is the explicit fix for installs whose embedded version lags behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::constants::UNKNOWN_VERSION;
use crate::upgrade::paths::AppPaths;
use crate::utils::fs::{atomic_write, read_json_file, write_json_file};

/// The structured version sidecar, `version.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionRecord {
    pub version: String,
    pub updated_on: DateTime<Utc>,
}

impl VersionRecord {
    pub fn now(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            updated_on: Utc::now(),
        }
    }
}

/// One place a version string may come from.
pub trait VersionSource: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "nothing here"; `Err` means "something here, but unreadable".
    fn read_version(&self) -> Result<Option<String>>;
}

/// Plain-text override marker.
pub struct OverrideMarkerSource {
    path: PathBuf,
}

impl OverrideMarkerSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl VersionSource for OverrideMarkerSource {
    fn name(&self) -> &'static str {
        "override marker"
    }

    fn read_version(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let version = content.lines().next().unwrap_or_default().trim();
        Ok((!version.is_empty()).then(|| version.to_string()))
    }
}

/// Structured version record.
pub struct VersionRecordSource {
    path: PathBuf,
}

impl VersionRecordSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl VersionSource for VersionRecordSource {
    fn name(&self) -> &'static str {
        "version record"
    }

    fn read_version(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let record: VersionRecord = read_json_file(&self.path)?;
        let version = record.version.trim();
        Ok((!version.is_empty()).then(|| version.to_string()))
    }
}

/// Version compiled into the binary.
///
/// `0.0.0` and empty values are treated as absent.
pub struct BuildMetadataSource {
    version: String,
}

impl BuildMetadataSource {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for BuildMetadataSource {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl VersionSource for BuildMetadataSource {
    fn name(&self) -> &'static str {
        "build metadata"
    }

    fn read_version(&self) -> Result<Option<String>> {
        let version = self.version.trim();
        Ok((!version.is_empty() && version != UNKNOWN_VERSION).then(|| version.to_string()))
    }
}

type TextProvider = Box<dyn Fn() -> Result<String> + Send + Sync>;

/// Extracts a version from free text supplied by a host surface, e.g. an
/// "About" label such as `"Overlay v1.4.2 (beta)"`.
pub struct LegacyTextSource {
    provider: TextProvider,
}

impl LegacyTextSource {
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn() -> Result<String> + Send + Sync + 'static,
    {
        Self {
            provider: Box::new(provider),
        }
    }

    fn extract(text: &str) -> Option<String> {
        let pattern = Regex::new(r"\bv?(\d+\.\d+(?:\.\d+)?)\b").ok()?;
        pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl VersionSource for LegacyTextSource {
    fn name(&self) -> &'static str {
        "legacy text"
    }

    fn read_version(&self) -> Result<Option<String>> {
        let text = (self.provider)()?;
        Ok(Self::extract(&text))
    }
}

/// Resolves and caches the installed version.
///
/// One instance is shared (via `Arc`) by everything in the process that needs
/// the installed version; there is no global cache.
pub struct VersionResolver {
    marker_path: PathBuf,
    record_path: PathBuf,
    sources: Vec<Box<dyn VersionSource>>,
    cached: Mutex<Option<String>>,
}

impl VersionResolver {
    /// Resolver over the standard sources for `paths`.
    pub fn new(paths: &AppPaths) -> Self {
        Self::from_sources(paths, Self::default_sources(paths, env!("CARGO_PKG_VERSION")))
    }

    /// The standard source list with an explicit embedded version.
    pub fn default_sources(paths: &AppPaths, build_version: &str) -> Vec<Box<dyn VersionSource>> {
        vec![
            Box::new(OverrideMarkerSource::new(paths.version_marker())),
            Box::new(VersionRecordSource::new(paths.version_record())),
            Box::new(BuildMetadataSource::new(build_version)),
        ]
    }

    /// Resolver over an explicit source list, consulted in order.
    pub fn from_sources(paths: &AppPaths, sources: Vec<Box<dyn VersionSource>>) -> Self {
        Self {
            marker_path: paths.version_marker(),
            record_path: paths.version_record(),
            sources,
            cached: Mutex::new(None),
        }
    }

    /// Append the legacy text fallback as the last source.
    #[must_use]
    pub fn with_legacy_source(mut self, source: LegacyTextSource) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// The installed version. Cached after the first call.
    pub fn current_version(&self) -> String {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(version) = cached.as_ref() {
            return version.clone();
        }

        let version = self.resolve();
        *cached = Some(version.clone());
        version
    }

    fn resolve(&self) -> String {
        for source in &self.sources {
            match source.read_version() {
                Ok(Some(version)) => {
                    debug!("Resolved version {} from {}", version, source.name());
                    return version;
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring {}: {:#}", source.name(), e),
            }
        }
        debug!("No version source answered, using {}", UNKNOWN_VERSION);
        UNKNOWN_VERSION.to_string()
    }

    /// Drop the cached value so the next call re-resolves.
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Write the version record with the current time.
    ///
    /// Returns whether the write succeeded; failures are logged, never raised.
    /// A successful write invalidates the cache.
    pub fn record_version(&self, version: &str) -> bool {
        match write_json_file(&self.record_path, &VersionRecord::now(version)) {
            Ok(()) => {
                self.invalidate();
                true
            }
            Err(e) => {
                warn!("Failed to write version record: {:#}", e);
                false
            }
        }
    }

    /// Write the override marker. Same failure contract as [`Self::record_version`].
    pub fn write_override_marker(&self, version: &str) -> bool {
        match atomic_write(&self.marker_path, version.as_bytes()) {
            Ok(()) => {
                self.invalidate();
                true
            }
            Err(e) => {
                warn!("Failed to write version marker: {:#}", e);
                false
            }
        }
    }

    /// The version record on disk, if readable.
    pub fn read_record(&self) -> Option<VersionRecord> {
        if !self.record_path.exists() {
            return None;
        }
        read_json_file(&self.record_path)
            .map_err(|e| debug!("Unreadable version record: {:#}", e))
            .ok()
    }
}

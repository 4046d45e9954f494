//! Pending-operation ledgers.
//!
//! A ledger is written exactly when an install or rollback pass finishes with
//! files it could not replace. It names the scratch directory holding the new
//! files and the relative paths still outstanding. Its existence means "an
//! operation is incomplete" and blocks new operations until the resume step
//! consumes it on the next start.
//!
//! Forward updates and rollbacks use separate files so an interrupted rollback
//! is never mistaken for an interrupted update.
//!
//! Reading is strict and fails closed: a document with a different schema
//! version, a missing field, an empty update list, or a path escaping the
//! scratch directory is rejected as [`UpdateError::CorruptLedger`] rather than
//! partially trusted.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::LEDGER_SCHEMA_VERSION;
use crate::core::UpdateError;
use crate::upgrade::paths::AppPaths;
use crate::utils::fs::{dir_is_non_empty, is_contained_relative, remove_file_if_exists, write_json_file};

/// Which operation a ledger belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Update,
    Rollback,
}

impl LedgerKind {
    /// Ledger file for this kind.
    pub fn path(self, paths: &AppPaths) -> PathBuf {
        match self {
            Self::Update => paths.update_ledger(),
            Self::Rollback => paths.rollback_ledger(),
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => f.write_str("update"),
            Self::Rollback => f.write_str("rollback"),
        }
    }
}

/// The serialized ledger document.
///
/// ```json
/// {
///   "SchemaVersion": 1,
///   "ExtractPath": "/games/overlay/temp/update_20250101_120000",
///   "Updates": ["GameOverlay.exe", "data/maps.json"],
///   "Version": "1.6.0"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PendingOperationRecord {
    pub schema_version: u32,
    pub extract_path: PathBuf,
    /// Outstanding files, `/`-separated, relative to the content root of `extract_path`.
    pub updates: Vec<String>,
    /// Version committed once the operation completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PendingOperationRecord {
    pub fn new(extract_path: PathBuf, updates: Vec<String>, version: Option<String>) -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            extract_path,
            updates,
            version,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.schema_version != LEDGER_SCHEMA_VERSION {
            return Err(format!(
                "schema version {} is not supported (expected {})",
                self.schema_version, LEDGER_SCHEMA_VERSION
            ));
        }
        if self.extract_path.as_os_str().is_empty() {
            return Err("extract path is empty".to_string());
        }
        if self.updates.is_empty() {
            return Err("update list is empty".to_string());
        }
        if let Some(bad) = self.updates.iter().find(|u| !is_contained_relative(u)) {
            return Err(format!("update path '{bad}' escapes the extract directory"));
        }
        if self.version.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err("version is present but empty".to_string());
        }
        Ok(())
    }

    /// Whether the scratch directory still exists and holds files.
    pub fn is_actionable(&self) -> bool {
        dir_is_non_empty(&self.extract_path)
    }
}

/// Handle on one ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    kind: LedgerKind,
    path: PathBuf,
}

impl Ledger {
    pub fn new(paths: &AppPaths, kind: LedgerKind) -> Self {
        Self {
            kind,
            path: kind.path(paths),
        }
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and validate the ledger.
    ///
    /// `Ok(None)` when there is no ledger; [`UpdateError::CorruptLedger`] when
    /// the document cannot be trusted.
    pub fn read(&self) -> Result<Option<PendingOperationRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.corrupt(format!("unreadable: {e}")).into()),
        };

        let record: PendingOperationRecord =
            serde_json::from_str(&raw).map_err(|e| self.corrupt(e.to_string()))?;
        record.validate().map_err(|reason| self.corrupt(reason))?;

        debug!(
            "Read {} ledger with {} outstanding file(s)",
            self.kind,
            record.updates.len()
        );
        Ok(Some(record))
    }

    /// Persist the ledger atomically.
    pub fn write(&self, record: &PendingOperationRecord) -> Result<()> {
        write_json_file(&self.path, record)
    }

    /// Delete the ledger. Missing is fine.
    pub fn discard(&self) -> Result<()> {
        remove_file_if_exists(&self.path)
    }

    fn corrupt(&self, reason: String) -> UpdateError {
        UpdateError::CorruptLedger {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

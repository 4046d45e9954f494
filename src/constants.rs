//! Global constants used throughout the updater.
//!
//! File names that make up the on-disk contract of an installation live here,
//! next to the timeouts and size thresholds used by the update pipeline.
//! Defining them centrally keeps the resume path, the handoff script and the
//! orchestrator in agreement about where things are.

use std::time::Duration;

/// Default application name, used for backup archive names and the log header.
pub const DEFAULT_APP_NAME: &str = "GameOverlay";

/// Plain-text override marker at the application root (single version line).
pub const VERSION_MARKER_FILE: &str = "version.txt";

/// Structured version record at the application root.
pub const VERSION_RECORD_FILE: &str = "version.json";

/// Ledger describing a forward update that is waiting for a restart.
pub const UPDATE_LEDGER_FILE: &str = "pending_update.json";

/// Ledger describing a rollback that is waiting for a restart.
pub const ROLLBACK_LEDGER_FILE: &str = "pending_rollback.json";

/// Subdirectory holding backup archives.
pub const BACKUPS_DIR: &str = "Backups";

/// Subdirectory for downloads and extraction scratch space.
pub const TEMP_DIR: &str = "temp";

/// Subdirectory for per-session update logs.
pub const LOGS_DIR: &str = "logs";

/// Extension of installable archives and backups.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Base name of the generated out-of-process finalize script.
pub const HANDOFF_SCRIPT_STEM: &str = "finalize_update";

/// Current schema version written into pending-operation ledgers.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Version reported when no source yields anything usable.
pub const UNKNOWN_VERSION: &str = "0.0.0";

/// Timestamp format embedded in backup archive names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timeout for release feed queries (30 seconds).
pub const RELEASE_FEED_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for package downloads (30 seconds).
///
/// The overall download deadline comes from configuration; this only bounds
/// how long we wait for the TCP/TLS handshake.
pub const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay the handoff script waits for the parent process to exit (seconds).
pub const HANDOFF_DELAY_SECS: u64 = 2;

/// User agent sent to the release feed and download hosts.
pub const USER_AGENT: &str = concat!("overlay-updater/", env!("CARGO_PKG_VERSION"));

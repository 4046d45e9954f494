//! Self-update and rollback for an installed application directory.
//!
//! The updater replaces the files of a running desktop application with the
//! contents of a release archive, keeps timestamped backups so any previous
//! state can be restored, and survives the one thing it cannot do in-process:
//! overwrite an executable that is currently running.
//!
//! # Architecture Overview
//!
//! - **[`UpdateOrchestrator`]**: the state machine behind install, rollback
//!   and startup resume
//! - **[`release_check::ReleaseChecker`]**: polls the hosted release feed
//! - **[`download::PackageDownloader`]**: bounded, streaming package download
//! - **[`backup::BackupManager`]**: zip snapshots of the installation
//! - **[`installer`]**: per-file copy with deferral of locked files
//! - **[`ledger::Ledger`]**: the on-disk record of deferred work
//! - **[`handoff::Handoff`]**: external completion when the running
//!   executable itself is outstanding
//! - **[`version_resolver::VersionResolver`]**: the installed version,
//!   resolved from an ordered list of sources
//!
//! ## Update Process Flow
//!
//! ```text
//! 1. Download     temp/update_<version>.zip, size and checksum verified
//! 2. Backup       Backups/GameOverlay_v<current>_<timestamp>.zip, verified
//! 3. Extract      temp/update_<timestamp>/
//! 4. Install      copy every file; running or locked files are deferred
//! 5a. Finalize    write version files, remove scratch data, prune backups
//! 5b. Defer       write pending_update.json, keep the scratch directory
//! ```
//!
//! A failure in steps 1-3 leaves the application directory byte-identical.
//!
//! ## Startup
//!
//! ```text
//! resume_pending_if_any()
//!   ├── no ledger / corrupt ledger / scratch dir gone → NotActed
//!   ├── outstanding file is the running executable    → HandedOff (exit now)
//!   └── otherwise copy outstanding files              → Completed
//! ```
//!
//! # Application Directory Layout
//!
//! ```text
//! <app dir>/
//!   GameOverlay(.exe)        main executable
//!   version.txt              override marker, highest precedence
//!   version.json             version record
//!   pending_update.json      update ledger
//!   pending_rollback.json    rollback ledger
//!   Backups/                 backup archives
//!   temp/                    downloads and scratch directories
//!   logs/                    session logs
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use overlay_updater::upgrade::{AppPaths, UpdateOrchestrator};
//! use overlay_updater::config::UpgradeConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let paths = AppPaths::new("/opt/GameOverlay", "GameOverlay", "GameOverlay");
//! let orchestrator = UpdateOrchestrator::new(paths, UpgradeConfig::default());
//!
//! if let Some(candidate) = orchestrator.check_for_updates().await? {
//!     orchestrator
//!         .install_update(&candidate.version, &candidate.download_url)
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod config;
pub mod download;
pub mod events;
pub mod handoff;
pub mod installer;
pub mod ledger;
pub mod orchestrator;
pub mod paths;
pub mod processes;
pub mod release_check;
pub mod session_log;
pub mod verification;
pub mod version;
pub mod version_resolver;

pub use events::{Completion, ProgressUpdate, UpdateCandidate, UpdateEvent, UpdateState};
pub use orchestrator::{ResumeOutcome, UpdateOrchestrator};
pub use paths::AppPaths;
pub use version_resolver::VersionResolver;

#[cfg(test)]
mod tests;

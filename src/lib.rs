//! Overlay Updater - self-update and rollback for a desktop game overlay
//!
//! Keeps an installed overlay current from a hosted release feed while making
//! sure a bad update can always be undone and a half-finished one is always
//! completed.
//!
//! # Architecture Overview
//!
//! - Releases are polled from a GitHub-style feed and offered only when strictly
//!   newer than the installed version
//! - Every install or rollback is preceded by a verified zip backup of the
//!   application directory
//! - Files that cannot be replaced while the overlay runs are recorded in a
//!   pending-operation ledger and finished on the next start, by an external
//!   helper script when the main executable itself is outstanding
//!
//! # Core Modules
//!
//! - [`upgrade`] - The update state machine and its building blocks
//! - [`core`] - Error types and the failure taxonomy
//! - [`config`] - Global configuration (`config.toml`)
//! - [`cli`] - Command-line interface
//! - [`utils`] - File-system helpers and progress display
//! - [`constants`] - File names, directory names and timeouts
//!
//! # Guarantees
//!
//! - No installed file is touched before a verified backup exists
//! - A failure during download, backup or extraction leaves the application
//!   directory byte-identical
//! - A pending operation is completed or discarded at most once per start
//! - The installed version is never reported from a stale cache after an update
//!
//! # Example
//!
//! ```rust,no_run
//! use overlay_updater::config::GlobalConfig;
//! use overlay_updater::upgrade::{AppPaths, ResumeOutcome, UpdateOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?;
//! let paths = AppPaths::from_config(&config.app, None)?;
//! let orchestrator = UpdateOrchestrator::new(paths, config.upgrade);
//!
//! if orchestrator.resume_pending_if_any().await? == ResumeOutcome::HandedOff {
//!     std::process::exit(0);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

//! Command-line interface for the overlay updater.
//!
//! The CLI is a thin shell over [`UpdateOrchestrator`](crate::upgrade::UpdateOrchestrator):
//! every command builds one orchestrator for the configured application
//! directory, finishes any deferred update left by a previous run, then does its
//! own work.
//!
//! # Commands
//!
//! - `check` - Query the release feed for a newer version
//! - `install` - Download and install a release (the newest one by default)
//! - `rollback` - Restore a backup
//! - `backups` - List backups, newest first
//! - `cleanup` - Delete old backups
//! - `resume` - Complete a deferred update or rollback
//! - `status` - Show the installed version and pending work
//! - `log` - Print the current session log
//!
//! # Global Options
//!
//! - `--app-dir` - Application directory (default: from config, else next to
//!   the running executable)
//! - `--config` - Configuration file
//! - `--verbose` - Enable debug output
//! - `--quiet` - Suppress all output except errors
//! - `--no-progress` - Disable progress bars
//!
//! # Examples
//!
//! ```bash
//! overlay-updater check
//! overlay-updater install
//! overlay-updater install 1.6.0 https://example.com/GameOverlay-1.6.0.zip --sha256 9f86d0...
//! overlay-updater --app-dir "C:\Games\GameOverlay" backups
//! overlay-updater rollback GameOverlay_v1.5.12_20250101_120000.zip
//! ```

mod backup;
pub mod common;
mod update;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::CONFIG_PATH_ENV;
use crate::utils::progress::NO_PROGRESS_ENV;

/// Runtime settings derived from the global flags.
///
/// Applied once, before any command runs.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Filter for the tracing subscriber. `None` leaves logging off unless
    /// `RUST_LOG` is set.
    pub log_level: Option<String>,

    /// Disable progress bars.
    pub no_progress: bool,

    /// Configuration file overriding the default location.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export settings that other modules read from the environment.
    ///
    /// Not thread-safe; call from `main` before the runtime spawns work.
    pub fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: called once at startup before other threads read the environment
            unsafe {
                std::env::set_var(NO_PROGRESS_ENV, "1");
            }
        }

        if let Some(path) = &self.config_path {
            // SAFETY: see above
            unsafe {
                std::env::set_var(CONFIG_PATH_ENV, path);
            }
        }
    }

    /// Install the global tracing subscriber. Later calls are ignored.
    pub fn init_logging(&self) {
        let filter = match (&self.log_level, std::env::var("RUST_LOG")) {
            (_, Ok(_)) => EnvFilter::from_default_env(),
            (Some(level), Err(_)) => EnvFilter::new(format!("overlay_updater={level}")),
            (None, Err(_)) => return,
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Self-update, backup and rollback for the game overlay.
#[derive(Parser)]
#[command(
    name = "overlay-updater",
    about = "Self-update, backup and rollback for the game overlay",
    version,
    long_about = "Keeps an installed overlay up to date from its release feed, with verified backups and rollback."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Application directory to manage.
    #[arg(long, global = true, value_name = "DIR")]
    app_dir: Option<PathBuf>,

    /// Path to the configuration file.
    ///
    /// Defaults to `~/.overlay-updater/config.toml`
    /// (`%LOCALAPPDATA%\overlay-updater\config.toml` on Windows).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug output.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable progress bars.
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the release feed for a newer version
    Check(update::CheckCommand),

    /// Download and install a release
    Install(update::InstallCommand),

    /// Restore the installation from a backup
    Rollback(backup::RollbackCommand),

    /// List backups, newest first
    Backups(backup::BackupsCommand),

    /// Delete old backups
    Cleanup(backup::CleanupCommand),

    /// Complete a deferred update or rollback
    Resume(update::ResumeCommand),

    /// Show the installed version and any pending work
    Status(update::StatusCommand),

    /// Print the session log of this run
    Log(update::LogCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("warn".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress || self.quiet,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.apply_to_env();
        config.init_logging();

        let ctx = common::CommandContext::load(self.app_dir, self.quiet).await?;

        // `resume` reports its own outcome; everyone else resumes silently first.
        if !matches!(self.command, Commands::Resume(_)) && ctx.resume_before_command().await {
            return Ok(());
        }

        match self.command {
            Commands::Check(cmd) => cmd.execute(&ctx).await,
            Commands::Install(cmd) => cmd.execute(&ctx).await,
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
            Commands::Backups(cmd) => cmd.execute(&ctx).await,
            Commands::Cleanup(cmd) => cmd.execute(&ctx).await,
            Commands::Resume(cmd) => cmd.execute(&ctx).await,
            Commands::Status(cmd) => cmd.execute(&ctx).await,
            Commands::Log(cmd) => cmd.execute(&ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbose_and_quiet_levels() {
        let cli = Cli::parse_from(["overlay-updater", "--verbose", "status"]);
        assert_eq!(cli.build_config().log_level.as_deref(), Some("debug"));

        let cli = Cli::parse_from(["overlay-updater", "--quiet", "status"]);
        let config = cli.build_config();
        assert_eq!(config.log_level, None);
        assert!(config.no_progress);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["overlay-updater", "-v", "-q", "status"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["overlay-updater", "backups", "--app-dir", "/opt/overlay"]);
        assert_eq!(cli.app_dir, Some(PathBuf::from("/opt/overlay")));
    }
}

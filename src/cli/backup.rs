//! `backups`, `rollback` and `cleanup`.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::CommandContext;

/// List backups, newest first.
#[derive(Args)]
pub struct BackupsCommand {
    /// Print the list as JSON
    #[arg(long)]
    json: bool,
}

impl BackupsCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let backups = ctx.orchestrator.list_backups().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&backups)?);
            return Ok(());
        }

        if backups.is_empty() {
            ctx.say("No backups found");
            return Ok(());
        }

        println!("{:<48} {:<12} {:<20} {:>9}", "NAME".bold(), "VERSION".bold(), "CREATED".bold(), "SIZE".bold());
        for backup in &backups {
            println!(
                "{:<48} {:<12} {:<20} {:>6.2} MB",
                backup.file_name,
                backup.version,
                backup.creation_date.format("%Y-%m-%d %H:%M:%S"),
                backup.size_in_mb
            );
        }
        Ok(())
    }
}

/// Restore a backup.
#[derive(Args)]
pub struct RollbackCommand {
    /// File name of the backup, as shown by `backups`
    backup: String,
}

impl RollbackCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        ctx.say(format!("Restoring {}", self.backup.bold()));
        let completion = ctx
            .with_progress(ctx.orchestrator.rollback(&self.backup))
            .await?;
        ctx.report_completion(&completion);
        Ok(())
    }
}

/// Delete old backups.
#[derive(Args)]
pub struct CleanupCommand {
    /// Number of backups to keep (default: `backup_retention` from config)
    #[arg(long)]
    keep: Option<usize>,
}

impl CleanupCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let keep = self.keep.unwrap_or(ctx.config.upgrade.backup_retention);
        let removed = ctx.orchestrator.cleanup_old_backups(keep).await?;
        if removed == 0 {
            ctx.say(format!("Nothing to remove (keeping {keep})"));
        } else {
            ctx.say(format!("{} Removed {} old backup(s)", "✓".green(), removed));
        }
        Ok(())
    }
}

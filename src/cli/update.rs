//! `check`, `install`, `resume`, `status` and `log`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::common::CommandContext;
use crate::upgrade::ledger::{Ledger, LedgerKind};

/// Query the release feed.
#[derive(Args)]
pub struct CheckCommand {
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl CheckCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let current = ctx.orchestrator.resolver().current_version();
        let candidate = ctx.orchestrator.check_for_updates().await?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "current_version": current,
                    "update": candidate,
                }))?
            );
            return Ok(());
        }

        match candidate {
            Some(candidate) => {
                ctx.say(format!(
                    "{} Update available: {} → {}",
                    "↑".cyan(),
                    current.yellow(),
                    candidate.version.green().bold()
                ));
                if !candidate.html_url.is_empty() {
                    ctx.say(format!("  Release page: {}", candidate.html_url));
                }
                if !candidate.notes.trim().is_empty() {
                    ctx.say("");
                    ctx.say(candidate.notes.trim());
                }
                ctx.say("");
                ctx.say(format!("Run {} to install it", "overlay-updater install".cyan()));
            }
            None => ctx.say(format!("{} Up to date ({})", "✓".green(), current)),
        }
        Ok(())
    }
}

/// Download and install a release.
///
/// Without arguments the newest release from the feed is installed.
#[derive(Args)]
pub struct InstallCommand {
    /// Version to install
    #[arg(requires = "url")]
    version: Option<String>,

    /// Download URL of the release archive
    url: Option<String>,

    /// Expected SHA-256 of the archive
    #[arg(long, value_name = "HEX")]
    sha256: Option<String>,
}

impl InstallCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let (version, url) = match (self.version, self.url) {
            (Some(version), Some(url)) => (version, url),
            _ => match ctx.orchestrator.check_for_updates().await? {
                Some(candidate) => (candidate.version, candidate.download_url),
                None => {
                    ctx.say(format!(
                        "{} Already up to date ({})",
                        "✓".green(),
                        ctx.orchestrator.resolver().current_version()
                    ));
                    return Ok(());
                }
            },
        };

        ctx.say(format!("Installing version {}", version.bold()));
        let completion = ctx
            .with_progress(ctx.orchestrator.install_with_checksum(
                &version,
                &url,
                self.sha256.as_deref(),
            ))
            .await?;
        ctx.report_completion(&completion);
        Ok(())
    }
}

/// Complete a deferred update or rollback.
#[derive(Args)]
pub struct ResumeCommand {}

impl ResumeCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let outcome = ctx.orchestrator.resume_pending_if_any().await?;
        if !outcome.acted() {
            ctx.say("Nothing to resume");
        }
        ctx.report_resume(outcome);
        Ok(())
    }
}

/// Installed version and pending work.
#[derive(Args)]
pub struct StatusCommand {
    /// Print the status as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct StatusReport {
    app_dir: PathBuf,
    version: String,
    updated_on: Option<String>,
    pending_update: Option<Vec<String>>,
    pending_rollback: Option<Vec<String>>,
    backups: usize,
}

impl StatusCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let orchestrator = &ctx.orchestrator;
        let paths = orchestrator.paths();
        let pending = |kind| {
            Ledger::new(paths, kind)
                .read()
                .ok()
                .flatten()
                .map(|record| record.updates)
        };

        let report = StatusReport {
            app_dir: paths.app_dir().to_path_buf(),
            version: orchestrator.resolver().current_version(),
            updated_on: orchestrator
                .resolver()
                .read_record()
                .map(|record| record.updated_on.to_rfc3339()),
            pending_update: pending(LedgerKind::Update),
            pending_rollback: pending(LedgerKind::Rollback),
            backups: orchestrator.list_backups().await?.len(),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("{}: {}", "Application".bold(), report.app_dir.display());
        println!("{}: {}", "Version".bold(), report.version.green());
        if let Some(updated_on) = &report.updated_on {
            println!("{}: {}", "Updated on".bold(), updated_on);
        }
        for (label, files) in [
            ("Pending update", &report.pending_update),
            ("Pending rollback", &report.pending_rollback),
        ] {
            if let Some(files) = files {
                println!("{}: {} file(s) waiting for restart", label.yellow().bold(), files.len());
                for file in files {
                    println!("  {file}");
                }
            }
        }
        println!("{}: {}", "Backups".bold(), report.backups);
        Ok(())
    }
}

/// Print the newest session log.
#[derive(Args)]
pub struct LogCommand {}

impl LogCommand {
    pub fn execute(self, ctx: &CommandContext) -> Result<()> {
        let current = ctx.orchestrator.session_log_text();
        if !current.is_empty() {
            print!("{current}");
            return Ok(());
        }

        match latest_log(&ctx.orchestrator.paths().logs_dir())? {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                ctx.say(format!("{}", path.display().to_string().dimmed()));
                print!("{text}");
            }
            None => ctx.say("No session logs yet"),
        }
        Ok(())
    }
}

/// Session logs are named by timestamp, so the greatest name is the newest.
fn latest_log(logs_dir: &Path) -> Result<Option<PathBuf>> {
    if !logs_dir.exists() {
        return Ok(None);
    }
    let newest = std::fs::read_dir(logs_dir)
        .with_context(|| format!("Failed to read {}", logs_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("updater_") && n.ends_with(".log"))
        })
        .max();
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_latest_log_picks_newest_name() -> Result<()> {
        let temp = TempDir::new()?;
        for name in ["updater_20250101_120000.log", "updater_20250301_080000.log", "other.txt"] {
            std::fs::write(temp.path().join(name), "x")?;
        }
        assert_eq!(
            latest_log(temp.path())?,
            Some(temp.path().join("updater_20250301_080000.log"))
        );
        assert_eq!(latest_log(&temp.path().join("missing"))?, None);
        Ok(())
    }
}

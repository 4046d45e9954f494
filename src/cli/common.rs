//! Shared plumbing for CLI commands

use anyhow::Result;
use colored::Colorize;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

use crate::config::GlobalConfig;
use crate::core::UpdateFailure;
use crate::upgrade::{
    AppPaths, Completion, ResumeOutcome, UpdateEvent, UpdateOrchestrator, UpdateState,
};
use crate::utils::ProgressBar;

/// Everything a command needs: configuration and one orchestrator.
pub struct CommandContext {
    pub config: GlobalConfig,
    pub orchestrator: UpdateOrchestrator,
    pub quiet: bool,
}

impl CommandContext {
    /// Load configuration and resolve the application directory.
    pub async fn load(app_dir: Option<PathBuf>, quiet: bool) -> Result<Self> {
        let config = GlobalConfig::load().await?;
        let paths = AppPaths::from_config(&config.app, app_dir)?;
        let orchestrator = UpdateOrchestrator::new(paths, config.upgrade.clone());
        Ok(Self {
            config,
            orchestrator,
            quiet,
        })
    }

    /// Print unless `--quiet`.
    pub fn say(&self, message: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", message.as_ref());
        }
    }

    /// Finish leftover work from a previous run before a command.
    ///
    /// Returns `true` when a handoff took over and the process must exit.
    /// A failure here is reported but does not stop the command.
    pub async fn resume_before_command(&self) -> bool {
        match self.orchestrator.resume_pending_if_any().await {
            Ok(outcome) => self.report_resume(outcome),
            Err(failure) => {
                eprintln!(
                    "{}: pending update could not be completed: {}",
                    "warning".yellow().bold(),
                    failure
                );
                false
            }
        }
    }

    /// Print what a resume did. Returns `true` for a handoff.
    pub fn report_resume(&self, outcome: ResumeOutcome) -> bool {
        match outcome {
            ResumeOutcome::NotActed => false,
            ResumeOutcome::Completed => {
                self.say(format!("{} Completed pending update", "✓".green()));
                false
            }
            ResumeOutcome::HandedOff => {
                self.say(format!(
                    "{} Finishing the update in the background; the overlay will restart",
                    "→".cyan()
                ));
                true
            }
        }
    }

    /// Run an orchestrator operation while mirroring its events on a progress bar.
    pub async fn with_progress<T, F>(&self, operation: F) -> Result<T, UpdateFailure>
    where
        F: Future<Output = Result<T, UpdateFailure>>,
    {
        let bar = ProgressBar::new(self.quiet);
        let mut events = self.orchestrator.subscribe();
        let view = bar.clone();
        let pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(UpdateEvent::Progress(progress)) => {
                        view.update(progress.percent, &progress.message);
                    }
                    Ok(UpdateEvent::StateChanged(state)) if state != UpdateState::Idle => {
                        view.update(None, &format!("{}...", capitalize(&state.to_string())));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let result = operation.await;
        pump.abort();
        bar.finish_and_clear();
        result
    }

    pub fn report_completion(&self, completion: &Completion) {
        match completion {
            Completion::Finalized { version } => {
                self.say(format!("{} Now running version {}", "✓".green(), version.bold()));
            }
            Completion::AwaitingRestart { version, deferred } => {
                self.say(format!(
                    "{} Version {} installed; {} file(s) in use will be replaced on the next start",
                    "!".yellow(),
                    version.bold(),
                    deferred
                ));
            }
            Completion::Resumed { version } => match version {
                Some(version) => self.say(format!("{} Completed update to {}", "✓".green(), version)),
                None => self.say(format!("{} Completed pending update", "✓".green())),
            },
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("backing up"), "Backing up");
        assert_eq!(capitalize(""), "");
    }
}

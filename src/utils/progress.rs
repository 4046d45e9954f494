//! Progress indicators for the command line
//!
//! Wraps `indicatif` with the updater's styling. Progress is hidden when
//! `OVERLAY_UPDATER_NO_PROGRESS` is set, which keeps scripted runs and tests
//! free of terminal escape codes.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::time::Duration;

/// Environment variable disabling all progress output.
pub const NO_PROGRESS_ENV: &str = "OVERLAY_UPDATER_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var(NO_PROGRESS_ENV).is_ok()
}

/// A progress bar that switches between a percent bar and a spinner.
///
/// Update notifications carry either a percentage or nothing (indeterminate);
/// [`ProgressBar::update`] shows whichever fits.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
    hidden: bool,
}

impl ProgressBar {
    /// Creates a percent bar (0..=100), hidden when progress is disabled.
    pub fn new(hidden: bool) -> Self {
        let hidden = hidden || is_progress_disabled();
        let inner = if hidden {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(100);
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { inner, hidden }
    }

    /// Shows `message`, with a bar when `percent` is known.
    pub fn update(&self, percent: Option<u8>, message: &str) {
        if self.hidden {
            return;
        }
        match percent {
            Some(percent) => {
                self.inner.set_style(percent_style());
                self.inner.set_position(u64::from(percent.min(100)));
            }
            None => self.inner.set_style(spinner_style()),
        }
        self.inner.set_message(message.to_string());
    }

    /// Finishes and clears the bar from the terminal.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn percent_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

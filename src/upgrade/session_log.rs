//! Per-session update log.
//!
//! Every orchestrator step is appended to `logs/updater_<yyyyMMdd_HHmmss>.log`
//! as `[YYYY-mm-dd HH:MM:SS] [CATEGORY] message` and kept in memory so a host
//! can show the current session after a failure. Lines are mirrored to
//! `tracing`. Write failures are swallowed: logging never fails an update.

use chrono::Local;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Category column of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Info,
    Progress,
    Warn,
    Error,
    Success,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Progress => "PROGRESS",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        })
    }
}

/// Append-only session log. The file is created on the first line.
pub struct SessionLogger {
    path: PathBuf,
    text: Mutex<String>,
}

impl SessionLogger {
    /// Logger writing a new file under `logs_dir`.
    pub fn new(logs_dir: &Path) -> Self {
        let name = format!("updater_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        Self {
            path: logs_dir.join(name),
            text: Mutex::new(String::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, category: LogCategory, message: &str) {
        match category {
            LogCategory::Error => tracing::error!("{}", message),
            LogCategory::Warn => tracing::warn!("{}", message),
            LogCategory::Progress => tracing::debug!("{}", message),
            LogCategory::Info | LogCategory::Success => tracing::info!("{}", message),
        }

        let line = format!(
            "[{}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            category,
            message
        );
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(&line);

        if let Err(e) = self.append(&line) {
            tracing::debug!("Session log write failed: {}", e);
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    pub fn info(&self, message: &str) {
        self.log(LogCategory::Info, message);
    }

    pub fn progress(&self, message: &str) {
        self.log(LogCategory::Progress, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogCategory::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogCategory::Error, message);
    }

    pub fn success(&self, message: &str) {
        self.log(LogCategory::Success, message);
    }

    /// Everything logged by this session so far.
    pub fn session_text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

//! Notifications published by the orchestrator.
//!
//! Subscribers receive events on a `tokio::sync::broadcast` channel. Events may
//! be sent from worker threads; a UI host marshals them onto its own thread.
//! A subscriber that falls behind loses the oldest events, never blocks the
//! orchestrator.

use serde::Serialize;
use std::fmt;

use crate::core::UpdateFailure;

/// Orchestrator state machine.
///
/// `Idle → Downloading → BackingUp → Extracting → Installing →
/// {Finalizing | AwaitingRestart} → Idle`. Rollback skips `Downloading`.
/// A feed query is its own short session, `Idle → Checking → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateState {
    Idle,
    Checking,
    Downloading,
    BackingUp,
    Extracting,
    Installing,
    Finalizing,
    AwaitingRestart,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::BackingUp => "backing up",
            Self::Extracting => "extracting",
            Self::Installing => "installing",
            Self::Finalizing => "finalizing",
            Self::AwaitingRestart => "awaiting restart",
        })
    }
}

/// One progress notification. `percent` is `None` when the total is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub state: UpdateState,
    pub percent: Option<u8>,
    pub message: String,
}

/// How a finished operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Completion {
    /// Every file replaced and the version committed.
    Finalized { version: String },
    /// Some files are pending until the next start.
    AwaitingRestart { version: String, deferred: usize },
    /// A deferred operation was completed on startup.
    Resumed { version: Option<String> },
}

/// A release newer than the installed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCandidate {
    pub version: String,
    pub download_url: String,
    pub notes: String,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UpdateEvent {
    StateChanged(UpdateState),
    Progress(ProgressUpdate),
    Error(UpdateFailure),
    Completed(Completion),
    UpdateAvailable(UpdateCandidate),
    /// The feed has nothing newer than `current`.
    UpToDate { current: String },
}

//! Error handling for the updater
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`UpdateError`]) for precise handling inside the pipeline
//! 2. **A flat, serializable failure value** ([`UpdateFailure`]) that every public
//!    orchestrator operation returns and every error notification carries
//!
//! # Error Kinds
//!
//! Every [`UpdateError`] belongs to exactly one [`ErrorKind`]:
//! - **Transient network**: connection failures and timeouts while downloading.
//!   Abortable, retried only by the user.
//! - **Integrity**: undersized or invalid archives, checksum mismatches. Never
//!   proceeds to a destructive step.
//! - **Filesystem contention**: a target file is locked or permission-denied.
//!   During install this degrades to deferral instead of failing.
//! - **Corrupt state**: an unparseable or stale pending-operation ledger. The
//!   ledger is discarded and the operation treated as absent.
//! - **Unexpected**: anything else, caught at the step boundary.
//!
//! # Conversion
//!
//! Helpers deep in the pipeline return [`anyhow::Result`] with context, the way
//! the rest of the crate does. At a step boundary the orchestrator turns the
//! `anyhow::Error` into an [`UpdateFailure`] with [`UpdateFailure::from_anyhow`],
//! which downcasts to [`UpdateError`] to recover the kind and keeps the full
//! cause chain for the session log.
//!
//! # Examples
//!
//! ```rust,no_run
//! use overlay_updater::core::{ErrorKind, UpdateError, UpdateFailure};
//!
//! let err = UpdateError::DownloadTooSmall { size: 512, minimum: 102_400 };
//! let failure = UpdateFailure::from(err);
//! assert_eq!(failure.kind, ErrorKind::Integrity);
//! ```

use colored::Colorize;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of update failures.
///
/// The kind decides how the orchestrator reacts: integrity failures stop before
/// anything destructive happens, contention degrades to deferral, corrupt state
/// is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection failure or timeout while talking to a remote host.
    TransientNetwork,
    /// Undersized, unreadable or mismatching package or backup archive.
    Integrity,
    /// A target file is locked or permission-denied.
    FilesystemContention,
    /// Pending-operation ledger that cannot be trusted.
    CorruptState,
    /// Everything else.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TransientNetwork => "network",
            Self::Integrity => "integrity",
            Self::FilesystemContention => "file in use",
            Self::CorruptState => "corrupt state",
            Self::Unexpected => "unexpected",
        };
        f.write_str(label)
    }
}

/// The main error type for update, rollback and resume operations.
///
/// Each variant names one failure mode of the pipeline and carries the paths,
/// URLs or sizes needed to explain it to a user. Use [`UpdateError::kind`] to
/// classify it.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Connection-level failure talking to a remote host.
    #[error("Network error during {operation}: {reason}")]
    Network {
        /// What we were doing (e.g. "download", "release feed query")
        operation: String,
        /// Underlying transport error
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("Server returned HTTP {status} for {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The request did not finish within the configured deadline.
    #[error("Timed out after {seconds}s while fetching {url}")]
    Timeout {
        /// Requested URL
        url: String,
        /// Deadline that elapsed
        seconds: u64,
    },

    /// The downloaded file is too small to be a real package.
    #[error("Downloaded file is {size} bytes, expected at least {minimum} bytes")]
    DownloadTooSmall {
        /// Bytes received
        size: u64,
        /// Configured minimum
        minimum: u64,
    },

    /// The downloaded package does not match the expected digest.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest supplied by the caller
        expected: String,
        /// Digest of the downloaded file
        actual: String,
    },

    /// An archive could not be opened or contains unsafe entries.
    #[error("Invalid archive {path}: {reason}")]
    InvalidArchive {
        /// Archive path
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// A freshly written backup failed verification.
    #[error("Backup {path} is only {size} bytes, expected at least {minimum} bytes")]
    BackupTooSmall {
        /// Backup archive path
        path: String,
        /// Actual size
        size: u64,
        /// Configured minimum
        minimum: u64,
    },

    /// The requested backup archive does not exist.
    #[error("Backup '{name}' not found")]
    BackupNotFound {
        /// Backup file name as supplied by the caller
        name: String,
    },

    /// A file could not be replaced because it is in use.
    #[error("File is in use: {path}")]
    FileLocked {
        /// Target path
        path: String,
    },

    /// A pending-operation ledger failed validation.
    #[error("Pending operation record {path} is corrupt: {reason}")]
    CorruptLedger {
        /// Ledger path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// An earlier update or rollback has not been completed yet.
    #[error("An update or rollback is waiting to be completed ({ledger})")]
    OperationPending {
        /// Ledger file that gates new operations
        ledger: String,
    },

    /// Another update session is already running in this process.
    #[error("Another update operation is already in progress ({state})")]
    Busy {
        /// State of the running session
        state: String,
    },

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything without a dedicated variant.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl UpdateError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::HttpStatus { .. } | Self::Timeout { .. } => {
                ErrorKind::TransientNetwork
            }
            Self::DownloadTooSmall { .. }
            | Self::ChecksumMismatch { .. }
            | Self::InvalidArchive { .. }
            | Self::BackupTooSmall { .. } => ErrorKind::Integrity,
            Self::FileLocked { .. } => ErrorKind::FilesystemContention,
            Self::Io(e) if is_contention(e) => ErrorKind::FilesystemContention,
            Self::CorruptLedger { .. } => ErrorKind::CorruptState,
            Self::BackupNotFound { .. }
            | Self::OperationPending { .. }
            | Self::Busy { .. }
            | Self::Io(_)
            | Self::Other { .. } => ErrorKind::Unexpected,
        }
    }
}

/// Whether an I/O error means "someone else holds this file".
pub fn is_contention(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::ResourceBusy
            | std::io::ErrorKind::ExecutableFileBusy
    )
}

/// Flat failure value returned by every public orchestrator operation.
///
/// This is the error half of the tagged result; the success half is the
/// operation's own value. The same struct is the payload of
/// [`UpdateEvent::Error`](crate::upgrade::events::UpdateEvent::Error), so a
/// subscriber and a caller see identical information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateFailure {
    /// Taxonomy bucket.
    pub kind: ErrorKind,
    /// Top-level message.
    pub message: String,
    /// Remaining cause chain, outermost first, joined with `": "`.
    pub cause: Option<String>,
}

impl UpdateFailure {
    /// Create a failure without a cause chain.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Convert an `anyhow` error caught at a step boundary.
    ///
    /// The first [`UpdateError`] found in the chain decides the kind; errors that
    /// never passed through one are [`ErrorKind::Unexpected`], except bare I/O
    /// contention errors.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let kind = error
            .chain()
            .find_map(|e| {
                if let Some(update_error) = e.downcast_ref::<UpdateError>() {
                    Some(update_error.kind())
                } else if let Some(io_error) = e.downcast_ref::<std::io::Error>() {
                    is_contention(io_error).then_some(ErrorKind::FilesystemContention)
                } else {
                    None
                }
            })
            .unwrap_or(ErrorKind::Unexpected);

        let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

        Self {
            kind,
            message: error.to_string(),
            cause: (!causes.is_empty()).then(|| causes.join(": ")),
        }
    }
}

impl From<UpdateError> for UpdateFailure {
    fn from(error: UpdateError) -> Self {
        let cause = std::error::Error::source(&error).map(ToString::to_string);
        Self {
            kind: error.kind(),
            message: error.to_string(),
            cause,
        }
    }
}

impl From<anyhow::Error> for UpdateFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::from_anyhow(&error)
    }
}

impl fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for UpdateFailure {}

/// Error wrapper with user-facing suggestion and details, for CLI display.
///
/// ```rust,no_run
/// use overlay_updater::core::{ErrorContext, ErrorKind, UpdateFailure};
///
/// let ctx = ErrorContext::new(UpdateFailure::new(ErrorKind::TransientNetwork, "timed out"))
///     .with_suggestion("Check your connection and retry");
/// ctx.display();
/// ```
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying failure
    pub failure: UpdateFailure,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap a failure without suggestion or details.
    #[must_use]
    pub const fn new(failure: UpdateFailure) -> Self {
        Self {
            failure,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print to stderr with colors: error red, details yellow, suggestion green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.failure.message);

        if let Some(cause) = &self.failure.cause {
            eprintln!("{}: {}", "caused by".red(), cause);
        }

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.failure)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion for its kind.
///
/// This is the CLI's single entry point for presenting failures.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let failure = match error.downcast_ref::<UpdateFailure>() {
        Some(failure) => failure.clone(),
        None => UpdateFailure::from_anyhow(&error),
    };
    let kind = failure.kind;
    let ctx = ErrorContext::new(failure);

    match kind {
        ErrorKind::TransientNetwork => ctx
            .with_suggestion("Check your internet connection and run the command again")
            .with_details("Nothing in the application directory was changed"),
        ErrorKind::Integrity => ctx
            .with_suggestion("Retry the download; if it keeps failing the release may be broken")
            .with_details("The update stopped before touching any installed file"),
        ErrorKind::FilesystemContention => ctx.with_suggestion(
            "Close the overlay and any program using its files, then run 'overlay-updater resume'",
        ),
        ErrorKind::CorruptState => ctx
            .with_suggestion("The pending record was discarded; restore from a backup if files look mixed")
            .with_details("Use 'overlay-updater backups' to list available backups"),
        ErrorKind::Unexpected => {
            ctx.with_suggestion("Run 'overlay-updater log' to inspect the session log")
        }
    }
}

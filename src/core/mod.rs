//! Core types shared by every part of the updater
//!
//! The core module holds the error model. Every other module reports failures
//! through it:
//! - [`UpdateError`] - strongly typed failure modes of the update pipeline
//! - [`ErrorKind`] - the taxonomy deciding whether a failure aborts, defers or is discarded
//! - [`UpdateFailure`] - the flat value returned by orchestrator operations and
//!   carried by error notifications
//! - [`ErrorContext`] / [`user_friendly_error`] - CLI presentation with suggestions
//!
//! # Example
//!
//! ```rust,no_run
//! use overlay_updater::core::{UpdateError, user_friendly_error};
//!
//! let err = anyhow::Error::new(UpdateError::BackupNotFound { name: "x.zip".into() });
//! user_friendly_error(err).display();
//! ```

pub mod error;

pub use error::{
    ErrorContext, ErrorKind, UpdateError, UpdateFailure, is_contention, user_friendly_error,
};

//! Domain-specific error types using `thiserror`.
//!
//! This module defines the error enum returned by registry and subscription
//! operations. Native watcher faults are not errors in this sense: they are
//! delivered as data through the fault sink (see `watch::events::NativeFault`).

use std::{io::Error as IoError, path::PathBuf, result::Result as StdResult};

use {anyhow::Error, notify::Error as NotifyError, thiserror::Error};

/// Watch registry and subscription errors.
#[derive(Error, Debug)]
pub enum WatchError {
    /// A live subscription already uses this source identifier.
    #[error("Source identifier '{source_identifier}' is already watching path '{}'", path.display())]
    DuplicateIdentifier {
        source_identifier: String,
        path: PathBuf,
    },
    /// No live subscription uses this source identifier.
    #[error("No file system watcher registered with source identifier '{source_identifier}'")]
    NotFound { source_identifier: String },
    /// The path is neither an existing file nor an existing directory.
    #[error("Path: {} is invalid", path.display())]
    InvalidPath { path: PathBuf },
    /// Watcher options are inconsistent or incomplete.
    #[error("Invalid watcher options: {reason}")]
    InvalidOptions { reason: String },
    /// The native watch source could not be created or (re)armed.
    #[error("Native watcher error: {0}")]
    Native(#[from] NotifyError),
    /// Failure resolving a path against the working directory.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
    /// No tokio runtime is available for rate limiter timers.
    #[error("No tokio runtime available to schedule rate limiter timers")]
    RuntimeUnavailable,
}

impl WatchError {
    /// Creates a new `NotFound` error.
    pub fn not_found(source_identifier: impl Into<String>) -> Self {
        Self::NotFound {
            source_identifier: source_identifier.into(),
        }
    }

    /// Creates a new `InvalidOptions` error.
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// Whether this is the ordinary "nothing registered under that name" result.
    ///
    /// Command layers use this to report a negative result instead of
    /// treating it as a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Operational error context propagation with `anyhow`.
///
/// This type is used for operational errors that need rich context
/// but don't require specific handling logic.
pub type Result<T> = StdResult<T, Error>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::error::domain::WatchError;

    #[test]
    fn test_duplicate_identifier_display() {
        let error = WatchError::DuplicateIdentifier {
            source_identifier: "w1".to_string(),
            path: PathBuf::from("/tmp/d"),
        };
        assert_eq!(
            error.to_string(),
            "Source identifier 'w1' is already watching path '/tmp/d'"
        );
    }

    #[test]
    fn test_not_found_display() {
        let error = WatchError::not_found("w2");
        assert!(error.is_not_found());
        assert_eq!(
            error.to_string(),
            "No file system watcher registered with source identifier 'w2'"
        );
    }

    #[test]
    fn test_invalid_path_display() {
        let error = WatchError::InvalidPath {
            path: PathBuf::from("/does/not/exist"),
        };
        assert!(!error.is_not_found());
        assert_eq!(error.to_string(), "Path: /does/not/exist is invalid");
    }

    #[test]
    fn test_invalid_options_display() {
        let error = WatchError::invalid_options("pick one");
        assert_eq!(error.to_string(), "Invalid watcher options: pick one");
    }
}

//! The errors that can occur.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The possible errors that can occur.
#[derive(Debug, Error)]
pub enum Error {
    /// An error occurred while interacting with the file system.
    #[error("An IO error occurred: {0}")]
    IO(#[from] std::io::Error),

    /// The submitted request was rejected before anything was spawned.
    #[error("Invalid request: {0}")]
    Validation(String),
    /// The external tool could not be started.
    #[error("Failed to launch {program:?}: {reason}")]
    Launch {
        /// The program that was launched.
        program: PathBuf,
        /// Why the launch failed.
        reason: String,
    },
    /// The external tool reported a failure.
    #[error("{0}")]
    Tool(String),
    /// The output of an info query could not be understood.
    #[error("Failed to parse video information: {0}")]
    Parse(String),
    /// The requested artifact is unknown, expired, or gone from disk.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error occurred while running a command.
    #[error("Failed to execute command: {0}")]
    Command(String),
    /// An error occurred manipulating a path.
    #[error("An invalid path was provided: {0}")]
    Path(String),
    /// An error occurred due to a timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Whether this error was caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Whether this error means the requested resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

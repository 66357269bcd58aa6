//! Error types for the build runner

use std::path::PathBuf;
use thiserror::Error;

use keel_core::domain::job::JobError;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while preparing or executing a build
///
/// None of these escape the orchestrator: every error is folded into the
/// job's `failed` state.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Container engine did not answer
    #[error("container engine not available: {0}")]
    EngineUnavailable(String),

    /// No image definition in the checked out project
    #[error("no Dockerfile found in {}", .0.display())]
    MissingImageDefinition(PathBuf),

    /// A container engine call failed
    #[error("{operation} failed: {message}")]
    Engine {
        operation: &'static str,
        message: String,
    },

    /// A clone/fetch/checkout command exited nonzero
    #[error("setup command failed: {0}")]
    SetupFailed(String),

    /// Job description rejected before running
    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),

    /// Command string could not be split into words
    #[error("cannot tokenize command: {0}")]
    Tokenize(String),

    /// One or more containers could not be deleted
    #[error("cleanup failed: {}", .0.join("; "))]
    Cleanup(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Create an engine error for the given operation
    pub fn engine(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Engine {
            operation,
            message: message.into(),
        }
    }

    /// Fatal setup errors abort a containerized build before any user command
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::EngineUnavailable(_) | Self::MissingImageDefinition(_) | Self::SetupFailed(_)
        )
    }
}

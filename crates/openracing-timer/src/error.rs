//! Error types for the timer crate.

use thiserror::Error;

/// Errors reported by the scheduler lifecycle.
///
/// Registration, notification and tick waiting never fail; only starting,
/// stopping and configuring the scheduler do.
#[derive(Debug, Error)]
pub enum TimerError {
    /// `start` was called on a scheduler that already left the idle state.
    #[error("Timer scheduler already started")]
    AlreadyStarted,

    /// An operation that needs the worker was called while it is not running.
    #[error("Timer scheduler is not running")]
    NotRunning,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The worker thread could not be spawned.
    #[error("Failed to spawn timer thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The worker thread terminated by panicking (a callback fault).
    #[error("Timer thread panicked")]
    WorkerPanicked,
}

impl TimerError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }
}

/// A specialized `Result` type for timer operations.
pub type TimerResult<T = ()> = std::result::Result<T, TimerError>;

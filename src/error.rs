//! Error types returned by gates and barrier stages.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Reasons a gate operation can fail.
///
/// A failed entry never counts as in flight, so there is nothing to undo after receiving one of these.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The gate stayed closed (or stayed busy, when draining) for longer than the caller was willing to wait.
    #[error("timed out waiting on gate")]
    TimedOut,

    /// Another thread panicked while holding the gate's lock during this worker's wait.
    #[error("gate lock was poisoned while waiting")]
    Poisoned,
}

/// Error returned when passing a unit of work through a barrier stage.
#[derive(Debug)]
pub enum PassError<E> {
    /// The unit was never admitted through the gate and was not forwarded.
    Gate(Error),

    /// The unit was forwarded and the next stage failed with the given error.
    Stage(E),
}

impl<E> PassError<E> {
    /// Returns the next stage's error, if that is where the failure came from.
    pub fn into_stage(self) -> Option<E> {
        match self {
            PassError::Stage(e) => Some(e),
            PassError::Gate(_) => None,
        }
    }
}

impl<E> From<Error> for PassError<E> {
    fn from(error: Error) -> Self {
        PassError::Gate(error)
    }
}

impl<E: fmt::Display> fmt::Display for PassError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassError::Gate(e) => write!(f, "unit was not admitted: {}", e),
            PassError::Stage(e) => write!(f, "next stage failed: {}", e),
        }
    }
}

impl<E: StdError + 'static> StdError for PassError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PassError::Gate(e) => Some(e),
            PassError::Stage(e) => Some(e),
        }
    }
}

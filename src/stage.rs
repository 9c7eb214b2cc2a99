//! Per-cycle control flow shared by both stages.

use std::fmt;

/// Why a stage loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// No room for another average-sized item. Fatal to capture only.
    StorageExhausted,
    /// The run deadline has passed.
    DeadlineExceeded,
    /// The shared run token was cancelled (e.g. Ctrl-C).
    Cancelled,
}

impl StopReason {
    /// True for the two budget signals. The supervisor never restarts a run
    /// that ended on one of these.
    pub fn is_budget_signal(self) -> bool {
        matches!(self, Self::StorageExhausted | Self::DeadlineExceeded)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageExhausted => write!(f, "storage exhausted"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// `Ok(value)` to proceed, `Err(reason)` when the stage must stop.
pub type Decision<T> = std::result::Result<T, StopReason>;

/// Result of one loop iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cycle {
    /// Iteration completed; go again.
    Continue,
    /// Iteration failed in a recoverable way; already logged.
    Retry(String),
    /// Terminal: leave the loop.
    Exit(StopReason),
}

/// How a stage ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Stopped(StopReason),
    /// The collaborator could not be initialised; the stage never ran.
    Unavailable(String),
    /// The worker thread panicked.
    Crashed(String),
}

impl StageOutcome {
    pub fn is_budget_signal(&self) -> bool {
        matches!(self, Self::Stopped(reason) if reason.is_budget_signal())
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped(reason) => write!(f, "{}", reason),
            Self::Unavailable(why) => write!(f, "collaborator unavailable: {}", why),
            Self::Crashed(why) => write!(f, "worker crashed: {}", why),
        }
    }
}

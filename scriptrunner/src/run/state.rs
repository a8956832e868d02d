//! Run lifecycle states and terminal sub-statuses.

use std::fmt;

/// Lifecycle state of a script run.
///
/// ```text
/// Initial → Pending → Preparing → Ready → Running ⇄ Paused
///                                            ↓
///                                         Finished
/// (any non-terminal state) → Canceled
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Descriptor created, not yet placed on a queue.
    #[default]
    Initial,

    /// Waiting on a queue for preparation.
    Pending,

    /// The compiler collaborator is building the artifact.
    Preparing,

    /// Compiled and waiting to be executed.
    Ready,

    /// The script body is executing.
    Running,

    /// Suspended at a debug checkpoint.
    Paused,

    /// Reached the end of the pipeline; see [`RunStatus`] for how.
    Finished,

    /// Canceled before or during execution.
    Canceled,
}

impl RunState {
    /// Returns true for states that refuse any further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Canceled)
    }

    /// Returns true while the script body owns an execution slot.
    pub fn is_executing(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "Initial"),
            Self::Pending => write!(f, "Pending"),
            Self::Preparing => write!(f, "Preparing"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Finished => write!(f, "Finished"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Sub-status recorded alongside a terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// No verdict yet.
    #[default]
    None,

    /// The script body returned normally.
    Executed,

    /// The script body returned an error.
    RunFailed,

    /// Preparation or compilation failed.
    InitFailed,

    /// Execution was interrupted while in flight.
    Interrupted,

    /// The run never started (e.g. still queued at shutdown).
    NotStarted,

    /// Canceled while waiting on a queue.
    Canceled,
}

impl RunStatus {
    /// Returns true for statuses that describe a failed run.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RunFailed | Self::InitFailed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "-"),
            Self::Executed => write!(f, "Executed"),
            Self::RunFailed => write!(f, "RunFailed"),
            Self::InitFailed => write!(f, "InitFailed"),
            Self::Interrupted => write!(f, "Interrupted"),
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_is_terminal() {
        assert!(!RunState::Initial.is_terminal());
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Preparing.is_terminal());
        assert!(!RunState::Ready.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::Paused.is_terminal());
        assert!(RunState::Finished.is_terminal());
        assert!(RunState::Canceled.is_terminal());
    }

    #[test]
    fn test_run_state_is_executing() {
        assert!(RunState::Running.is_executing());
        assert!(RunState::Paused.is_executing());
        assert!(!RunState::Ready.is_executing());
        assert!(!RunState::Finished.is_executing());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(RunState::default(), RunState::Initial);
        assert_eq!(RunStatus::default(), RunStatus::None);
    }

    #[test]
    fn test_status_is_failure() {
        assert!(RunStatus::RunFailed.is_failure());
        assert!(RunStatus::InitFailed.is_failure());
        assert!(!RunStatus::Executed.is_failure());
        assert!(!RunStatus::Canceled.is_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(RunState::Running.to_string(), "Running");
        assert_eq!(RunStatus::InitFailed.to_string(), "InitFailed");
        assert_eq!(RunStatus::None.to_string(), "-");
    }
}

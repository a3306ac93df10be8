//! Task lifecycle states.

use std::fmt;

/// State of a [`Task`](super::Task).
///
/// ```text
/// Waiting ─► PreExecute ─► Executing ─► PostExecute ─► Complete
///    │            │             │
///    ▼            └──────┬──────┘
/// Canceled ◄── Canceling ◄┘
/// ```
///
/// `PostExecute` is the point of no return: cancellation requests are ignored
/// once a task has reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Queued, not started
    Waiting,
    /// Running the pre-execute hook on the coordinator
    PreExecute,
    /// Running on a tier worker
    Executing,
    /// Running the post-execute hook on the coordinator
    PostExecute,
    /// Finished normally
    Complete,
    /// Cancel requested while in progress
    Canceling,
    /// Finished by cancellation
    Canceled,
}

impl TaskState {
    /// Returns true if the task will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Canceled)
    }

    /// Returns true if the task has started and not yet finished.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskState::PreExecute
                | TaskState::Executing
                | TaskState::PostExecute
                | TaskState::Canceling
        )
    }

    /// Returns true if a cancel request would still take effect.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TaskState::Waiting | TaskState::PreExecute | TaskState::Executing
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Waiting => write!(f, "Waiting"),
            TaskState::PreExecute => write!(f, "PreExecute"),
            TaskState::Executing => write!(f, "Executing"),
            TaskState::PostExecute => write!(f, "PostExecute"),
            TaskState::Complete => write!(f, "Complete"),
            TaskState::Canceling => write!(f, "Canceling"),
            TaskState::Canceled => write!(f, "Canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Complete.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::Canceling.is_terminal());
        assert!(!TaskState::Waiting.is_terminal());
    }

    #[test]
    fn test_active_states() {
        assert!(!TaskState::Waiting.is_active());
        assert!(TaskState::Executing.is_active());
        assert!(TaskState::Canceling.is_active());
        assert!(!TaskState::Complete.is_active());
    }

    #[test]
    fn test_post_execute_is_past_point_of_no_return() {
        assert!(TaskState::Executing.is_cancellable());
        assert!(!TaskState::PostExecute.is_cancellable());
        assert!(!TaskState::Canceling.is_cancellable());
    }

    #[test]
    fn test_display() {
        assert_eq!(TaskState::PreExecute.to_string(), "PreExecute");
        assert_eq!(TaskState::Canceled.to_string(), "Canceled");
    }
}

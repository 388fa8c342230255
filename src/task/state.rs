//! Task state machine.

use serde::{Deserialize, Serialize};

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for admission (queued or not yet submitted).
    Todo,
    /// An attempt is running under a concurrency slot.
    InProgress,
    /// The attempt produced work awaiting human review.
    InReview,
    /// Reviewed and accepted.
    Done,
    /// The attempt failed and no automatic retry remains.
    Failed,
    /// Deliberately cancelled.
    Cancelled,
}

impl TaskState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            // From Todo
            (Todo, InProgress) | (Todo, Cancelled) | (Todo, Failed) |
            // From InProgress
            (InProgress, InReview) | (InProgress, Failed) | (InProgress, Cancelled) |
            // Acquisition failure sends the task back to the queue
            (InProgress, Todo) |
            // From InReview: accept, or re-iterate with a follow-up attempt
            (InReview, Done) | (InReview, InProgress) | (InReview, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(TaskState::Todo.can_transition_to(TaskState::InProgress));
        assert!(TaskState::InProgress.can_transition_to(TaskState::InReview));
        assert!(TaskState::InProgress.can_transition_to(TaskState::Failed));
        assert!(TaskState::InProgress.can_transition_to(TaskState::Todo));
        assert!(TaskState::InReview.can_transition_to(TaskState::Done));
        assert!(TaskState::InReview.can_transition_to(TaskState::InProgress));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TaskState::Done.can_transition_to(TaskState::InProgress));
        assert!(!TaskState::Failed.can_transition_to(TaskState::InProgress));
        assert!(!TaskState::Cancelled.can_transition_to(TaskState::Todo));
        assert!(!TaskState::Todo.can_transition_to(TaskState::InReview));
        assert!(!TaskState::Todo.can_transition_to(TaskState::Done));
    }

    #[test]
    fn cancellation_reachable_from_any_active_state() {
        for state in [TaskState::Todo, TaskState::InProgress, TaskState::InReview] {
            assert!(state.can_transition_to(TaskState::Cancelled), "{state}");
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Todo.is_terminal());
        assert!(!TaskState::InProgress.is_terminal());
        assert!(!TaskState::InReview.is_terminal());
    }

    #[test]
    fn state_display_and_serde_agree() {
        let state = TaskState::InReview;
        assert_eq!(state.to_string(), "in_review");
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"in_review\"");
        let parsed: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}

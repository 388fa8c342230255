//! Task, attempt, and project records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::executor::ExecutorVariant;
use crate::resolver::ResolutionTier;
use crate::task::state::TaskState;

/// Reference to the project a task belongs to.
///
/// Projects are owned by the external CRUD layer; the engine only needs the
/// repository location and the ref to base worktrees on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: Uuid,
    /// Path to the project's git repository.
    pub repo_path: PathBuf,
    /// Ref new worktrees are rooted at (usually the default branch).
    pub base_ref: String,
}

impl ProjectRef {
    pub fn new(repo_path: impl Into<PathBuf>, base_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_path: repo_path.into(),
            base_ref: base_ref.into(),
        }
    }
}

/// A developer task to be executed by an assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub variant: ExecutorVariant,
    pub project: ProjectRef,
    pub state: TaskState,
    /// Attempt ids in creation order.
    pub attempt_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task in `Todo`.
    pub fn new(
        title: impl Into<String>,
        description: Option<String>,
        variant: ExecutorVariant,
        project: ProjectRef,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description,
            variant,
            project,
            state: TaskState::Todo,
            attempt_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state, validating against the state machine.
    pub fn transition_to(&mut self, target: TaskState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Classified result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The assistant finished its work; the task moves to review.
    Succeeded,
    /// The assistant (or its launcher, after fallback exhaustion) failed.
    Failed,
    /// The assistant produced output that itself requires review (plan mode).
    NeedsReview,
    /// The hard timeout fired and the process group was killed.
    TimedOut,
    /// The attempt was cancelled deliberately.
    Cancelled,
}

impl AttemptOutcome {
    /// Outcomes that advance the task to `InReview`.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::Succeeded | Self::NeedsReview)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NeedsReview => "needs_review",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One execution run of a task.
///
/// Mutable while the process runs; once the process has exited only the
/// outcome field is ever set again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Worktree path, set once acquisition succeeds.
    pub worktree_path: Option<PathBuf>,
    /// Branch created for the worktree.
    pub branch: Option<String>,
    /// Resolved command string, set once resolution succeeds.
    pub command: Option<String>,
    /// Tier the final command was resolved from.
    pub tier: Option<ResolutionTier>,
    /// Number of tier fallbacks taken at runtime.
    pub fallbacks: u32,
    pub exit_code: Option<i32>,
    /// Captured log file for this attempt's process output.
    pub log_path: Option<PathBuf>,
    /// Assistant session id harvested from the output stream, for follow-ups.
    pub session_id: Option<String>,
    pub outcome: Option<AttemptOutcome>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Attempt {
    /// Create a fresh attempt for a task.
    pub fn new(task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            worktree_path: None,
            branch: None,
            command: None,
            tier: None,
            fallbacks: 0,
            exit_code: None,
            log_path: None,
            session_id: None,
            outcome: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// An attempt is active until its outcome is recorded.
    pub fn is_active(&self) -> bool {
        self.outcome.is_none()
    }

    /// Record the terminal outcome and end timestamp.
    pub fn finish(&mut self, outcome: AttemptOutcome) {
        self.outcome = Some(outcome);
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_task() -> Task {
        Task::new(
            "Fix login bug",
            Some("The session cookie is dropped on refresh".to_string()),
            ExecutorVariant::Claude,
            ProjectRef::new("/tmp/repo", "main"),
        )
    }

    #[test]
    fn new_task_starts_todo() {
        let task = test_task();
        assert_eq!(task.state, TaskState::Todo);
        assert!(task.attempt_ids.is_empty());
    }

    #[test]
    fn task_transitions_update_timestamp() {
        let mut task = test_task();
        let before = task.updated_at;
        task.transition_to(TaskState::InProgress).unwrap();
        assert_eq!(task.state, TaskState::InProgress);
        assert!(task.updated_at >= before);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut task = test_task();
        let err = task.transition_to(TaskState::Done).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.state, TaskState::Todo);
    }

    #[test]
    fn attempt_active_until_finished() {
        let mut attempt = Attempt::new(Uuid::new_v4());
        assert!(attempt.is_active());
        assert!(attempt.ended_at.is_none());

        attempt.finish(AttemptOutcome::Succeeded);
        assert!(!attempt.is_active());
        assert!(attempt.ended_at.is_some());
    }

    #[test]
    fn reviewable_outcomes() {
        assert!(AttemptOutcome::Succeeded.is_reviewable());
        assert!(AttemptOutcome::NeedsReview.is_reviewable());
        assert!(!AttemptOutcome::Failed.is_reviewable());
        assert!(!AttemptOutcome::TimedOut.is_reviewable());
        assert!(!AttemptOutcome::Cancelled.is_reviewable());
    }

    #[test]
    fn outcome_serde_snake_case() {
        let json = serde_json::to_string(&AttemptOutcome::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
    }
}

//! Task store — the engine's persistence seam.
//!
//! The board's real storage lives outside this crate; the orchestrator only
//! depends on the `TaskStore` trait. `InMemoryTaskStore` ships for tests and
//! single-process use.

pub mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::task::{Attempt, Task, TaskState};

/// Backend-agnostic store for tasks and attempts.
///
/// Implementations must enforce at-most-one-active-attempt-per-task in
/// `create_attempt` — the orchestrator serializes attempts itself, but the
/// storage layer is the safety net.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert_task(&self, task: Task) -> Result<(), StoreError>;

    /// Fetch a task by id.
    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Update a task's state (and `updated_at`).
    async fn set_task_state(&self, id: Uuid, state: TaskState) -> Result<(), StoreError>;

    /// Create an attempt and append it to the owning task's attempt list.
    /// Fails with `ActiveAttemptExists` if the task already has one running.
    async fn create_attempt(&self, attempt: Attempt) -> Result<(), StoreError>;

    /// Overwrite an attempt record.
    async fn update_attempt(&self, attempt: Attempt) -> Result<(), StoreError>;

    /// Fetch an attempt by id.
    async fn get_attempt(&self, id: Uuid) -> Result<Attempt, StoreError>;

    /// The task's currently active attempt, if any.
    async fn active_attempt(&self, task_id: Uuid) -> Result<Option<Attempt>, StoreError>;

    /// Whether an attempt exists and is still active. Used by the orphan
    /// sweep: a missing attempt id reads as not-live.
    async fn attempt_is_live(&self, id: Uuid) -> Result<bool, StoreError>;
}

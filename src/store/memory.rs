//! In-memory task store for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::TaskStore;
use crate::task::{Attempt, Task, TaskState};

/// HashMap-backed store guarded by async locks.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    attempts: RwLock<HashMap<Uuid, Attempt>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound { id })
    }

    async fn set_task_state(&self, id: Uuid, state: TaskState) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound { id })?;
        task.state = state;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn create_attempt(&self, attempt: Attempt) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&attempt.task_id)
            .ok_or(StoreError::TaskNotFound { id: attempt.task_id })?;

        let mut attempts = self.attempts.write().await;
        if let Some(active) = task
            .attempt_ids
            .iter()
            .filter_map(|id| attempts.get(id))
            .find(|a| a.is_active())
        {
            return Err(StoreError::ActiveAttemptExists {
                task_id: attempt.task_id,
                attempt_id: active.id,
            });
        }

        task.attempt_ids.push(attempt.id);
        task.updated_at = Utc::now();
        attempts.insert(attempt.id, attempt);
        Ok(())
    }

    async fn update_attempt(&self, attempt: Attempt) -> Result<(), StoreError> {
        let mut attempts = self.attempts.write().await;
        if !attempts.contains_key(&attempt.id) {
            return Err(StoreError::AttemptNotFound { id: attempt.id });
        }
        attempts.insert(attempt.id, attempt);
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Attempt, StoreError> {
        self.attempts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::AttemptNotFound { id })
    }

    async fn active_attempt(&self, task_id: Uuid) -> Result<Option<Attempt>, StoreError> {
        let tasks = self.tasks.read().await;
        let task = tasks
            .get(&task_id)
            .ok_or(StoreError::TaskNotFound { id: task_id })?;
        let attempts = self.attempts.read().await;
        Ok(task
            .attempt_ids
            .iter()
            .filter_map(|id| attempts.get(id))
            .find(|a| a.is_active())
            .cloned())
    }

    async fn attempt_is_live(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .attempts
            .read()
            .await
            .get(&id)
            .map(|a| a.is_active())
            .unwrap_or(false))
    }
}

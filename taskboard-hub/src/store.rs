//! Task store port and the in-memory implementation.
//!
//! The [`TaskStore`] trait is everything the hub needs from persistence:
//! list, create, partial update, column move, delete, and attachment append.
//! Each mutating call is a single atomic read-modify-write from the caller's
//! point of view, so the hub never has to read a task and write it back
//! across an await point.

use async_trait::async_trait;
use chrono::Utc;
use taskboard_proto::task::{Attachment, Column, NewTask, Task, TaskId, TaskPatch};
use tokio::sync::RwLock;

/// Errors a store operation can fail with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No task with this id exists.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The backing store could not complete the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative task collection.
///
/// The hub is the only caller. Implementations assign ids and maintain
/// `created_at`/`updated_at`; every mutation returns the resulting task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks in creation order.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    /// Inserts a task and returns it with its generated id.
    async fn create(&self, new: NewTask) -> Result<Task, StoreError>;

    /// Applies a partial update.
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, StoreError>;

    /// Changes only the column.
    async fn move_to(&self, id: &TaskId, column: Column) -> Result<Task, StoreError>;

    /// Removes a task, returning what was removed.
    async fn delete(&self, id: &TaskId) -> Result<Task, StoreError>;

    /// Appends an attachment.
    async fn append_attachment(
        &self,
        id: &TaskId,
        attachment: Attachment,
    ) -> Result<Task, StoreError>;

    /// Whether a task exists.
    async fn contains(&self, id: &TaskId) -> Result<bool, StoreError> {
        Ok(self.list().await?.iter().any(|task| &task.id == id))
    }
}

/// Volatile task store kept in process memory.
///
/// Thread-safe via [`RwLock`]. Tasks are kept in creation order; every
/// mutation runs entirely under the write lock.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `tasks`.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    async fn modify(
        &self,
        id: &TaskId,
        change: impl FnOnce(&mut Task) + Send,
    ) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|task| &task.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        change(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.read().await.clone())
    }

    async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
        let task = Task::from_new(TaskId::generate(), new, Utc::now());
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        self.modify(id, |task| patch.apply_to(task)).await
    }

    async fn move_to(&self, id: &TaskId, column: Column) -> Result<Task, StoreError> {
        self.modify(id, |task| task.column = column).await
    }

    async fn delete(&self, id: &TaskId) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let index = tasks
            .iter()
            .position(|task| &task.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(tasks.remove(index))
    }

    async fn append_attachment(
        &self,
        id: &TaskId,
        attachment: Attachment,
    ) -> Result<Task, StoreError> {
        self.modify(id, |task| task.attachments.push(attachment))
            .await
    }

    async fn contains(&self, id: &TaskId) -> Result<bool, StoreError> {
        Ok(self.tasks.read().await.iter().any(|task| &task.id == id))
    }
}

//! Local mirror of the hub's task list.
//!
//! The mirror only changes in response to hub events, with one exception:
//! [`Mirror::set_column_optimistic`], which moves a task locally before the
//! hub confirms it. Every event application is idempotent and tolerates
//! `moved` and `updated` arriving in either order.

use taskboard_proto::board::BoardStats;
use taskboard_proto::sync::ServerEvent;
use taskboard_proto::task::{Column, Task, TaskId};

/// Client-side copy of the board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mirror {
    tasks: Vec<Task>,
}

impl Mirror {
    /// Creates an empty mirror.
    #[must_use]
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Applies one hub event. Error events leave the mirror untouched.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Snapshot(tasks) => self.apply_snapshot(tasks.clone()),
            ServerEvent::Created { task, .. } => self.apply_created(task.clone()),
            ServerEvent::Updated(task) => self.apply_updated(task.clone()),
            ServerEvent::Moved { id, column } => self.apply_moved(id, *column),
            ServerEvent::Deleted(id) => self.apply_deleted(id),
            ServerEvent::Error(_) => {}
        }
    }

    /// Replaces the whole mirror. Later duplicates of an id are dropped.
    pub fn apply_snapshot(&mut self, tasks: Vec<Task>) {
        self.tasks.clear();
        for task in tasks {
            if self.position(&task.id).is_none() {
                self.tasks.push(task);
            }
        }
    }

    /// Appends a task unless its id is already present.
    pub fn apply_created(&mut self, task: Task) {
        if self.position(&task.id).is_none() {
            self.tasks.push(task);
        }
    }

    /// Replaces the matching task wholesale; unknown ids are ignored.
    pub fn apply_updated(&mut self, task: Task) {
        if let Some(index) = self.position(&task.id) {
            self.tasks[index] = task;
        }
    }

    /// Sets only the column of the matching task; unknown ids are ignored.
    pub fn apply_moved(&mut self, id: &TaskId, column: Column) {
        if let Some(index) = self.position(id) {
            self.tasks[index].column = column;
        }
    }

    /// Removes a task; already absent is fine.
    pub fn apply_deleted(&mut self, id: &TaskId) {
        self.tasks.retain(|task| &task.id != id);
    }

    /// Moves a task locally ahead of hub confirmation.
    ///
    /// Returns `false`, changing nothing, when the task is unknown or already
    /// in `column`. Callers only emit a move intent on `true`.
    pub fn set_column_optimistic(&mut self, id: &TaskId, column: Column) -> bool {
        match self.position(id) {
            Some(index) if self.tasks[index].column != column => {
                self.tasks[index].column = column;
                true
            }
            _ => false,
        }
    }

    /// Looks up a task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    /// All tasks in hub order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks in one column, in hub order.
    pub fn by_column(&self, column: Column) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |task| task.column == column)
    }

    /// Number of mirrored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the mirror is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Per-column counts and progress.
    #[must_use]
    pub fn stats(&self) -> BoardStats {
        BoardStats::from_tasks(&self.tasks)
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| &task.id == id)
    }
}

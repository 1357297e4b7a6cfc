//! Board-level progress figures derived from a task list.

use serde::{Deserialize, Serialize};

use crate::task::{Column, Task};

/// Per-column task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStats {
    /// Tasks in `todo`.
    pub todo: usize,
    /// Tasks in `in-prog`.
    pub in_progress: usize,
    /// Tasks in `done`.
    pub done: usize,
}

impl BoardStats {
    /// Counts tasks per column.
    #[must_use]
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        tasks.into_iter().fold(Self::default(), |mut stats, task| {
            match task.column {
                Column::Todo => stats.todo += 1,
                Column::InProgress => stats.in_progress += 1,
                Column::Done => stats.done += 1,
            }
            stats
        })
    }

    /// Total number of tasks.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.todo + self.in_progress + self.done
    }

    /// Count for one column.
    #[must_use]
    pub const fn count(&self, column: Column) -> usize {
        match column {
            Column::Todo => self.todo,
            Column::InProgress => self.in_progress,
            Column::Done => self.done,
        }
    }

    /// Share of tasks in `done`, rounded to the nearest whole percent.
    /// An empty board is 0%.
    #[must_use]
    pub const fn percent_done(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        // done <= total, so the result is at most 100.
        #[allow(clippy::cast_possible_truncation)]
        let percent = ((self.done * 200 + total) / (total * 2)) as u8;
        percent
    }
}

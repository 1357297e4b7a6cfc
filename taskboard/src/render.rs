//! Plain-text rendering of the board for the CLI.

use std::fmt::Write as _;

use taskboard_proto::board::BoardStats;
use taskboard_proto::sync::ServerEvent;
use taskboard_proto::task::{Column, Task, TaskId};

use crate::client::BoardEvent;
use crate::mirror::Mirror;

/// Characters of the id shown in listings.
const SHORT_ID_LEN: usize = 8;

/// Leading characters of an id, enough to tell tasks apart on one board.
#[must_use]
pub fn short_id(id: &TaskId) -> &str {
    let s = id.as_str();
    s.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(s, |(end, _)| &s[..end])
}

/// One task as a single line.
#[must_use]
pub fn task_line(task: &Task) -> String {
    let mut line = format!("{}  {} [{}]", short_id(&task.id), task.title, task.priority);
    if let Some(category) = task.category {
        let _ = write!(line, " #{category}");
    }
    if !task.attachments.is_empty() {
        let _ = write!(line, " ({} attached)", task.attachments.len());
    }
    line
}

/// Progress summary, e.g. `2/5 done (40%)`.
#[must_use]
pub fn progress_line(stats: &BoardStats) -> String {
    format!(
        "{}/{} done ({}%)",
        stats.done,
        stats.total(),
        stats.percent_done()
    )
}

/// The whole board grouped by column, followed by progress.
#[must_use]
pub fn board(mirror: &Mirror) -> String {
    let mut out = String::new();
    for column in Column::ALL {
        let tasks: Vec<&Task> = mirror.by_column(column).collect();
        let _ = writeln!(out, "{} ({})", column.title(), tasks.len());
        for task in tasks {
            let _ = writeln!(out, "  {}", task_line(task));
        }
    }
    let _ = writeln!(out, "{}", progress_line(&mirror.stats()));
    out
}

/// A board event as one line for `watch`.
#[must_use]
pub fn event_line(event: &BoardEvent) -> String {
    match event {
        BoardEvent::Server(ServerEvent::Snapshot(tasks)) => {
            format!("synced {} tasks", tasks.len())
        }
        BoardEvent::Server(ServerEvent::Created { task, .. }) => {
            format!("+ {}", task_line(task))
        }
        BoardEvent::Server(ServerEvent::Updated(task)) => format!("~ {}", task_line(task)),
        BoardEvent::Server(ServerEvent::Moved { id, column }) => {
            format!("> {} moved to {}", short_id(id), column.title())
        }
        BoardEvent::Server(ServerEvent::Deleted(id)) => format!("- {} deleted", short_id(id)),
        BoardEvent::Server(ServerEvent::Error(err)) => format!("! {err}"),
        BoardEvent::Disconnected => "connection lost".to_string(),
        BoardEvent::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
        BoardEvent::Reconnected => "reconnected".to_string(),
        BoardEvent::GaveUp => "could not reconnect, giving up".to_string(),
    }
}

//! Sync protocol between board clients and the hub.
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": <name>, "data": <payload>}`. Clients send [`ClientIntent`]s,
//! the hub answers with [`ServerEvent`]s. Apart from [`ServerEvent::Snapshot`]
//! and [`ServerEvent::Error`], which go to a single connection, every server
//! event is broadcast to all connected clients, the originator included.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Column, NewTask, Task, TaskId, TaskPatch};

/// Client-generated token that ties a `create` intent to its `created` event.
///
/// The hub echoes it back untouched, so a client with several creates in
/// flight can match each confirmation to the right waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation requests sent by a client to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", deny_unknown_fields)]
pub enum ClientIntent {
    /// Insert a new task. Answered by a broadcast [`ServerEvent::Created`].
    #[serde(rename = "task:create")]
    Create {
        /// The task to create.
        task: NewTask,
        /// Echoed back in the matching `created` event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation: Option<CorrelationId>,
    },

    /// Partially update a task. Answered by a broadcast [`ServerEvent::Updated`].
    #[serde(rename = "task:update")]
    Update {
        /// Target task.
        id: TaskId,
        /// Fields to change.
        updates: TaskPatch,
    },

    /// Move a task to another column. Answered by a broadcast [`ServerEvent::Moved`].
    #[serde(rename = "task:move")]
    Move {
        /// Target task.
        id: TaskId,
        /// Destination column.
        column: Column,
    },

    /// Remove a task. Answered by a broadcast [`ServerEvent::Deleted`].
    #[serde(rename = "task:delete")]
    Delete {
        /// Target task.
        id: TaskId,
    },

    /// Ask for a fresh snapshot, sent to the requesting connection only.
    #[serde(rename = "sync:request")]
    Resync,
}

impl ClientIntent {
    /// Which operation this intent requests.
    #[must_use]
    pub const fn kind(&self) -> IntentKind {
        match self {
            Self::Create { .. } => IntentKind::Create,
            Self::Update { .. } => IntentKind::Update,
            Self::Move { .. } => IntentKind::Move,
            Self::Delete { .. } => IntentKind::Delete,
            Self::Resync => IntentKind::Resync,
        }
    }

    /// The task this intent targets, if it targets an existing one.
    #[must_use]
    pub const fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Update { id, .. } | Self::Move { id, .. } | Self::Delete { id } => Some(id),
            Self::Create { .. } | Self::Resync => None,
        }
    }

    /// The correlation token of a create intent.
    #[must_use]
    pub const fn correlation(&self) -> Option<CorrelationId> {
        match self {
            Self::Create { correlation, .. } => *correlation,
            _ => None,
        }
    }
}

/// Events pushed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full task collection, sent once per connection and on request.
    #[serde(rename = "sync:tasks")]
    Snapshot(Vec<Task>),

    /// A task was created.
    #[serde(rename = "task:created")]
    Created {
        /// The stored task, including its generated id.
        task: Task,
        /// Token from the originating `create` intent, if it carried one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation: Option<CorrelationId>,
    },

    /// A task changed; carries the full resulting task.
    #[serde(rename = "task:updated")]
    Updated(Task),

    /// A task changed column. Deliberately minimal.
    #[serde(rename = "task:moved")]
    Moved {
        /// Moved task.
        id: TaskId,
        /// Its new column.
        column: Column,
    },

    /// A task was removed.
    #[serde(rename = "task:deleted")]
    Deleted(TaskId),

    /// An intent from this connection failed. Never broadcast.
    #[serde(rename = "task:error")]
    Error(IntentError),
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "sync:tasks",
            Self::Created { .. } => "task:created",
            Self::Updated(_) => "task:updated",
            Self::Moved { .. } => "task:moved",
            Self::Deleted(_) => "task:deleted",
            Self::Error(_) => "task:error",
        }
    }
}

/// Operation an intent asked for, as reported back in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// `task:create`.
    Create,
    /// `task:update`.
    Update,
    /// `task:move`.
    Move,
    /// `task:delete`.
    Delete,
    /// `sync:request`.
    Resync,
    /// The frame could not be decoded far enough to tell.
    Unknown,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Resync => "resync",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Machine-readable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The target task does not exist.
    NotFound,
    /// The store could not complete the operation.
    StoreUnavailable,
    /// The frame was not a valid intent.
    Malformed,
}

/// Typed failure report sent to the connection whose intent failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentError {
    /// Operation that failed.
    pub intent: IntentKind,
    /// Target task, when the intent named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    /// Token of a failed create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationId>,
    /// Failure reason.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl IntentError {
    /// Builds an error report for a failed intent.
    pub fn for_intent(intent: &ClientIntent, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            intent: intent.kind(),
            id: intent.task_id().cloned(),
            correlation: intent.correlation(),
            code,
            message: message.into(),
        }
    }

    /// Builds an error report for a frame that did not decode.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            intent: IntentKind::Unknown,
            id: None,
            correlation: None,
            code: ErrorCode::Malformed,
            message: message.into(),
        }
    }
}

impl fmt::Display for IntentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} {} failed: {}", self.intent, id, self.message),
            None => write!(f, "{} failed: {}", self.intent, self.message),
        }
    }
}

//! Task model shared by the hub and its clients.
//!
//! A [`Task`] is the only entity on the board. Clients never construct a full
//! task themselves: they send a [`NewTask`] or a [`TaskPatch`] and receive the
//! canonical [`Task`] back from the hub.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Errors raised by client-side validation before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds [`MAX_TASK_TITLE_LENGTH`].
    #[error("task title too long (max {MAX_TASK_TITLE_LENGTH} characters)")]
    TitleTooLong,
    /// Attachment MIME type is neither `image/*` nor `application/pdf`.
    #[error("unsupported file type: {0} (only images and PDFs)")]
    UnsupportedFileType(String),
}

/// Error returned when parsing a board enum from text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Opaque task identifier in canonical string form.
///
/// Every constructor normalizes its input, so two ids that refer to the same
/// task always compare equal: UUID-shaped input (simple, braced, urn or
/// uppercase) becomes the lowercase hyphenated form, anything else is
/// whitespace-trimmed. Deserialization goes through the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task id from any textual representation, normalizing it.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        match Uuid::parse_str(trimmed) {
            Ok(uuid) => Self(uuid.hyphenated().to_string()),
            Err(_) if trimmed.len() == raw.len() => Self(raw),
            Err(_) => Self(trimmed.to_string()),
        }
    }

    /// Generates a fresh time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().hyphenated().to_string())
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for TaskId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Default priority.
    #[default]
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Wire name of this priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("priority", s))
    }
}

/// Board column a task is placed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    /// Not started. New tasks land here unless told otherwise.
    #[default]
    #[serde(rename = "todo")]
    Todo,
    /// Being worked on.
    #[serde(rename = "in-prog")]
    InProgress,
    /// Finished.
    #[serde(rename = "done")]
    Done,
}

impl Column {
    /// All columns in board order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];

    /// Wire name of this column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-prog",
            Self::Done => "done",
        }
    }

    /// Human-readable heading.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Todo => "Todo",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("column", s))
    }
}

/// Fixed category taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Work.
    Work,
    /// Personal.
    Personal,
    /// Bug.
    Bug,
    /// Feature.
    Feature,
    /// Research.
    Research,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Self; 5] = [
        Self::Work,
        Self::Personal,
        Self::Bug,
        Self::Feature,
        Self::Research,
    ];

    /// Wire name of this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Research => "research",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

/// Kind of an attached file, derived from its MIME type at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Any `image/*` type.
    Image,
    /// `application/pdf`.
    Pdf,
}

impl AttachmentKind {
    /// Classifies a MIME type, returning `None` for anything that is not an
    /// image or a PDF. Parameters (`; charset=...`) and case are ignored.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence == "application/pdf" {
            Some(Self::Pdf)
        } else if essence.len() > "image/".len() && essence.starts_with("image/") {
            Some(Self::Image)
        } else {
            None
        }
    }

    /// Like [`from_mime`](Self::from_mime) but as a validation result.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedFileType`] for other MIME types.
    pub fn require(mime: &str) -> Result<Self, ValidationError> {
        Self::from_mime(mime).ok_or_else(|| ValidationError::UnsupportedFileType(mime.to_string()))
    }
}

/// A file attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Store-relative location, e.g. `/uploads/1700000000000-1a2b3c4d-plan.pdf`.
    pub url: String,
    /// Image or PDF.
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Sanitized original file name, for display.
    pub name: String,
}

/// A task as stored by the hub and mirrored by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Optional free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Priority (defaults to low).
    #[serde(default)]
    pub priority: Priority,
    /// Board column (defaults to todo).
    #[serde(default)]
    pub column: Column,
    /// Optional category tag.
    #[serde(default)]
    pub category: Option<Category>,
    /// Attachments in upload order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// When the store created this task.
    pub created_at: DateTime<Utc>,
    /// When the store last changed this task.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds a stored task from a creation payload.
    #[must_use]
    pub fn from_new(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: new.title,
            description: new.description,
            priority: new.priority,
            column: new.column,
            category: new.category,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Creation payload: a task without id, attachments or timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Priority, defaulting to low.
    #[serde(default)]
    pub priority: Priority,
    /// Initial column, defaulting to todo.
    #[serde(default)]
    pub column: Column,
    /// Optional category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl NewTask {
    /// Creates a payload with the given title and every other field defaulted.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: Priority::default(),
            column: Column::default(),
            category: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the initial column.
    #[must_use]
    pub const fn with_column(mut self, column: Column) -> Self {
        self.column = column;
        self
    }

    /// Sets the category.
    #[must_use]
    pub const fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Client-side validation run before the create intent is sent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TitleEmpty`] or [`ValidationError::TitleTooLong`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)
    }
}

/// Partial update of the editable task fields.
///
/// Absent keys leave the field untouched. For `description` and `category`
/// an explicit `null` clears the value, which is why those are doubly
/// optional. Unknown keys are rejected during decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description, or `Some(None)` to clear it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub description: Option<Option<String>>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// New column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<Column>,
    /// New category, or `Some(None)` to clear it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub category: Option<Option<Category>>,
}

/// Marks a key that was present in the input, even when its value is `null`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl TaskPatch {
    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.column.is_none()
            && self.category.is_none()
    }

    /// Writes every present field into `task`. Timestamps are left to the caller.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(column) = self.column {
            task.column = column;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
    }

    /// Client-side validation of the fields that have constraints.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a new title is empty or too long.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.title.as_deref().map_or(Ok(()), validate_title)
    }
}

/// Checks a title against the non-empty and length constraints.
///
/// # Errors
///
/// Returns [`ValidationError::TitleEmpty`] for blank titles and
/// [`ValidationError::TitleTooLong`] past [`MAX_TASK_TITLE_LENGTH`] characters.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::TitleEmpty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(ValidationError::TitleTooLong);
    }
    Ok(())
}

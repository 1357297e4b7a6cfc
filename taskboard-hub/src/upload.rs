//! Attachment upload side channel.
//!
//! `POST /task/upload` takes a multipart body with a `taskId` text field and
//! a `file` field. Only images and PDFs are accepted; the file is written to
//! the upload directory under a collision-free name, appended to the task,
//! and the updated task is broadcast like any other update.
//!
//! `GET /uploads/{name}` serves stored files back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use taskboard_proto::task::{Attachment, AttachmentKind, Task, TaskId};
use uuid::Uuid;

use crate::hub::HubState;
use crate::store::StoreError;

/// Default upload request size limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Longest sanitized display name kept.
const MAX_FILE_NAME_LEN: usize = 100;

/// URL prefix under which stored files are served.
pub const UPLOAD_URL_PREFIX: &str = "/uploads/";

/// Errors from the upload endpoints, each mapped to an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The request had no `file` field.
    #[error("no file")]
    MissingFile,
    /// The request had no (or an empty) `taskId` field.
    #[error("missing taskId")]
    MissingTaskId,
    /// The file is not an image or a PDF.
    #[error("unsupported file type: {0} (only images and PDFs)")]
    UnsupportedType(String),
    /// The target task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// The multipart body could not be read.
    #[error("invalid upload request: {0}")]
    BadRequest(String),
    /// Requested stored name is not a plain file name.
    #[error("invalid file name")]
    InvalidName,
    /// Requested stored file does not exist.
    #[error("file not found")]
    FileNotFound,
    /// The store failed.
    #[error("store unavailable: {0}")]
    Store(String),
    /// Writing or reading the file failed.
    #[error("file storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::MissingTaskId | Self::BadRequest(_) | Self::InvalidName => {
                StatusCode::BAD_REQUEST
            }
            Self::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::TaskNotFound(_) | Self::FileNotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::TaskNotFound(id),
            StoreError::Unavailable(msg) => Self::Store(msg),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// A file received on the upload endpoint.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Name as supplied by the uploader, unsanitized.
    pub file_name: String,
    /// Declared MIME type.
    pub content_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Directory holding uploaded files.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    /// Uses `root` as the upload directory. It is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a file under `stored_name`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory or file cannot be written.
    pub async fn save(&self, stored_name: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(stored_name), bytes).await
    }

    /// Deletes a stored file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be removed.
    pub async fn remove(&self, stored_name: &str) -> std::io::Result<()> {
        tokio::fs::remove_file(self.root.join(stored_name)).await
    }

    /// Reads a stored file. Names that are not a single plain path component
    /// are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidName`] for unsafe names,
    /// [`UploadError::FileNotFound`] if nothing is stored under the name, or
    /// the I/O error.
    pub async fn read(&self, stored_name: &str) -> Result<Vec<u8>, UploadError> {
        if !is_plain_file_name(stored_name) {
            return Err(UploadError::InvalidName);
        }
        match tokio::fs::read(self.root.join(stored_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UploadError::FileNotFound),
            Err(e) => Err(UploadError::Io(e)),
        }
    }
}

/// Reduces an uploaded file name to `[A-Za-z0-9._-]`.
///
/// Any other character becomes `_`, leading dots are stripped, the result is
/// capped at 100 characters, and an empty result becomes `file`. Path
/// components in the input are discarded first.
#[must_use]
pub fn sanitize_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = cleaned
        .trim_start_matches('.')
        .chars()
        .take(MAX_FILE_NAME_LEN)
        .collect();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Builds the on-disk name `<millis>-<8 hex>-<sanitized>` so that two
/// uploads of the same name in the same millisecond do not collide.
#[must_use]
pub fn stored_file_name(sanitized: &str) -> String {
    let token = Uuid::now_v7().simple().to_string();
    let random = &token[token.len() - 8..];
    format!("{}-{random}-{sanitized}", Utc::now().timestamp_millis())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.')
}

/// Content type to serve a stored file with, from its extension.
fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Stores an uploaded file and attaches it to a task.
///
/// The MIME type is checked before anything touches disk. If the task turns
/// out not to exist, the stored file is removed again and no event is
/// broadcast.
///
/// # Errors
///
/// Returns [`UploadError::UnsupportedType`], [`UploadError::TaskNotFound`],
/// [`UploadError::Store`], or [`UploadError::Io`].
pub async fn accept_upload(
    state: &HubState,
    task_id: &TaskId,
    upload: FileUpload,
) -> Result<Task, UploadError> {
    let kind = AttachmentKind::from_mime(&upload.content_type)
        .ok_or_else(|| UploadError::UnsupportedType(upload.content_type.clone()))?;

    if !state.store().contains(task_id).await? {
        return Err(UploadError::TaskNotFound(task_id.clone()));
    }

    let name = sanitize_file_name(&upload.file_name);
    let stored = stored_file_name(&name);
    state.uploads.save(&stored, &upload.bytes).await?;
    tracing::debug!(%task_id, file = %stored, size = upload.bytes.len(), "upload stored");

    let attachment = Attachment {
        url: format!("{UPLOAD_URL_PREFIX}{stored}"),
        kind,
        name,
    };
    match state.apply_attachment(task_id, attachment).await {
        Ok(task) => Ok(task),
        Err(e) => {
            if let Err(io) = state.uploads.remove(&stored).await {
                tracing::warn!(file = %stored, error = %io, "failed to remove orphaned upload");
            }
            Err(e.into())
        }
    }
}

/// `POST /task/upload` handler.
pub async fn upload_handler(
    State(state): State<Arc<HubState>>,
    mut multipart: Multipart,
) -> Result<Json<Task>, UploadError> {
    let mut task_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("taskId") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| UploadError::BadRequest(e.to_string()))?;
                if !raw.trim().is_empty() {
                    task_id = Some(TaskId::new(raw));
                }
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                // Refuse before buffering the body.
                if AttachmentKind::from_mime(&content_type).is_none() {
                    tracing::warn!(content_type, "upload rejected: unsupported type");
                    return Err(UploadError::UnsupportedType(content_type));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| UploadError::BadRequest(e.to_string()))?;
                file = Some(FileUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let file = file.ok_or(UploadError::MissingFile)?;
    let task_id = task_id.ok_or(UploadError::MissingTaskId)?;
    match accept_upload(&state, &task_id, file).await {
        Ok(task) => Ok(Json(task)),
        Err(e) => {
            tracing::warn!(%task_id, error = %e, "upload failed");
            Err(e)
        }
    }
}

/// Response headers for a stored file.
///
/// Stored bytes never run as active content on the hub's origin: every file
/// is sandboxed, and SVG is only offered as a download.
fn serve_headers(name: &str) -> [(header::HeaderName, &'static str); 4] {
    let content_type = content_type_for(name);
    let disposition = if content_type == "image/svg+xml" {
        "attachment"
    } else {
        "inline"
    };
    [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_DISPOSITION, disposition),
        (header::CONTENT_SECURITY_POLICY, "sandbox"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    ]
}

/// `GET /uploads/{name}` handler.
pub async fn serve_handler(
    State(state): State<Arc<HubState>>,
    axum::extract::Path(name): axum::extract::Path<String>,
) -> Result<impl IntoResponse, UploadError> {
    let bytes = state.uploads.read(&name).await?;
    Ok((serve_headers(&name), bytes))
}

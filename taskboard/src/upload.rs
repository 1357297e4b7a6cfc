//! Attachment uploads.
//!
//! [`AttachmentUploader`] is the seam the attachment flow talks to;
//! [`HttpUploader`] implements it against the hub's `POST /task/upload`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use taskboard_proto::task::{AttachmentKind, Task, TaskId, ValidationError};
use url::Url;

/// Default limit on one upload request, from connect to response body.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from uploading an attachment.
#[derive(Debug, thiserror::Error)]
pub enum UploadFailure {
    /// The file is not an image or a PDF.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The local file could not be read.
    #[error("could not read {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The upload endpoint URL is unusable.
    #[error("invalid upload URL: {0}")]
    InvalidUrl(String),

    /// The request did not complete.
    #[error("upload request failed: {0}")]
    Transport(String),

    /// The request did not complete in time.
    #[error("upload did not finish within {0:?}")]
    Timeout(Duration),

    /// The hub answered with an error status.
    #[error("hub refused the upload ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },
}

/// A validated file waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    /// File name as shown to the hub.
    pub name: String,
    /// MIME type.
    pub mime: String,
    /// Contents.
    pub bytes: Vec<u8>,
}

impl PendingFile {
    /// Wraps in-memory contents, rejecting anything but images and PDFs.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedFileType`] for other MIME types.
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, ValidationError> {
        let mime = mime.into();
        AttachmentKind::require(&mime)?;
        Ok(Self {
            name: name.into(),
            mime,
            bytes,
        })
    }

    /// Reads a file from disk, inferring its MIME type from the extension.
    ///
    /// The type check happens before the file is read.
    ///
    /// # Errors
    ///
    /// Returns [`UploadFailure::Validation`] for unsupported extensions or
    /// [`UploadFailure::ReadFile`] if reading fails.
    pub async fn from_path(path: &Path) -> Result<Self, UploadFailure> {
        let mime = mime_for_path(path).ok_or_else(|| {
            ValidationError::UnsupportedFileType(path.display().to_string())
        })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| UploadFailure::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(name, mime, bytes)?)
    }

    /// Image or PDF.
    #[must_use]
    pub fn kind(&self) -> Option<AttachmentKind> {
        AttachmentKind::from_mime(&self.mime)
    }
}

/// MIME type for a supported attachment extension.
#[must_use]
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "bmp" => Some("image/bmp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Uploads a file and attaches it to an existing task.
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Uploads `file` for `task_id` and returns the task with the new
    /// attachment.
    async fn upload(&self, task_id: &TaskId, file: &PendingFile) -> Result<Task, UploadFailure>;
}

/// Uploader speaking HTTP multipart to the hub.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpUploader {
    /// Posts to `endpoint`, giving up on any request that takes longer
    /// than `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadFailure::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, UploadFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadFailure::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Posts to the upload endpoint of the hub at `hub_url`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadFailure::InvalidUrl`] if no endpoint can be derived.
    pub fn for_hub(hub_url: &str, timeout: Duration) -> Result<Self, UploadFailure> {
        Self::new(upload_url_for(hub_url)?, timeout)
    }

    fn request_failed(&self, error: &reqwest::Error) -> UploadFailure {
        if error.is_timeout() {
            UploadFailure::Timeout(self.timeout)
        } else {
            UploadFailure::Transport(error.to_string())
        }
    }

    /// The endpoint uploads are posted to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AttachmentUploader for HttpUploader {
    async fn upload(&self, task_id: &TaskId, file: &PendingFile) -> Result<Task, UploadFailure> {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| UploadFailure::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("taskId", task_id.to_string())
            .part("file", part);

        tracing::debug!(%task_id, file = %file.name, size = file.bytes.len(), "uploading attachment");
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_failed(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.json::<ErrorBody>().await.map_or_else(
                |_| status.canonical_reason().unwrap_or("error").to_string(),
                |body| body.error,
            );
            tracing::warn!(%task_id, status = status.as_u16(), %message, "upload refused");
            return Err(UploadFailure::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Task>()
            .await
            .map_err(|e| self.request_failed(&e))
    }
}

/// Derives the upload endpoint from a hub URL: `ws` becomes `http`, `wss`
/// becomes `https`, and the path becomes `/task/upload`.
///
/// # Errors
///
/// Returns [`UploadFailure::InvalidUrl`] for unparsable URLs or schemes
/// other than ws, wss, http and https.
pub fn upload_url_for(hub_url: &str) -> Result<Url, UploadFailure> {
    let mut url = Url::parse(hub_url).map_err(|e| UploadFailure::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(UploadFailure::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| UploadFailure::InvalidUrl(hub_url.to_string()))?;
    url.set_path("/task/upload");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

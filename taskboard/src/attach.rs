//! Create-then-attach flows.
//!
//! A new task has no id until the hub broadcasts it, so attaching a file to
//! a new task means: send the create, wait for its confirmation, then upload
//! with the confirmed id. A failed upload never rolls the task back.

use std::time::Duration;

use taskboard_proto::task::{NewTask, Task, TaskId, TaskPatch};

use crate::client::{BoardClient, ClientError};
use crate::upload::{AttachmentUploader, PendingFile, UploadFailure};

/// Errors from the attachment flows.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentFlowError {
    /// The task intent could not be sent, or the hub rejected it.
    #[error("task request failed: {0}")]
    Intent(#[source] ClientError),

    /// The hub did not confirm the new task in time; no upload was tried.
    /// The task may still have been created.
    #[error("task not confirmed within {0:?}, attachment skipped")]
    ConfirmationTimeout(Duration),

    /// The task was saved but the attachment failed.
    #[error("task {} saved, but attachment failed: {source}", .task.id)]
    Attachment {
        /// The task as the hub confirmed it.
        task: Box<Task>,
        /// Why the upload failed.
        source: UploadFailure,
    },

    /// The update was sent but the attachment failed.
    #[error("task {task_id} updated, but attachment failed: {source}")]
    AttachmentOnly {
        /// The task the file was meant for.
        task_id: TaskId,
        /// Why the upload failed.
        source: UploadFailure,
    },
}

impl AttachmentFlowError {
    /// The task that exists despite the failure, if known.
    #[must_use]
    pub fn saved_task(&self) -> Option<&Task> {
        match self {
            Self::Attachment { task, .. } => Some(task.as_ref()),
            _ => None,
        }
    }
}

impl BoardClient {
    /// Creates a task and attaches `file` once the hub has confirmed it.
    ///
    /// # Errors
    ///
    /// - [`AttachmentFlowError::Intent`] if validation, sending or the
    ///   create itself fails.
    /// - [`AttachmentFlowError::ConfirmationTimeout`] if the hub is silent.
    /// - [`AttachmentFlowError::Attachment`] if the upload fails; the error
    ///   carries the created task.
    pub async fn create_with_attachment<U>(
        &self,
        uploader: &U,
        task: NewTask,
        file: PendingFile,
    ) -> Result<Task, AttachmentFlowError>
    where
        U: AttachmentUploader + ?Sized,
    {
        let created = match self.create_and_confirm(task).await {
            Ok(created) => created,
            Err(ClientError::ConfirmationTimeout(waited)) => {
                return Err(AttachmentFlowError::ConfirmationTimeout(waited));
            }
            Err(e) => return Err(AttachmentFlowError::Intent(e)),
        };
        tracing::debug!(task_id = %created.id, "create confirmed, uploading attachment");

        match uploader.upload(&created.id, &file).await {
            Ok(updated) => Ok(updated),
            Err(source) => {
                tracing::warn!(task_id = %created.id, error = %source, "attachment failed, task kept");
                Err(AttachmentFlowError::Attachment {
                    task: Box::new(created),
                    source,
                })
            }
        }
    }

    /// Sends `patch` (if it changes anything) and uploads `file` for an
    /// existing task. The id is already known, so nothing is awaited first.
    ///
    /// # Errors
    ///
    /// - [`AttachmentFlowError::Intent`] if the update cannot be sent.
    /// - [`AttachmentFlowError::AttachmentOnly`] if the upload fails.
    pub async fn update_with_attachment<U>(
        &self,
        uploader: &U,
        id: &TaskId,
        patch: TaskPatch,
        file: PendingFile,
    ) -> Result<Task, AttachmentFlowError>
    where
        U: AttachmentUploader + ?Sized,
    {
        if !patch.is_empty() {
            self.update(id, patch).map_err(AttachmentFlowError::Intent)?;
        }
        uploader
            .upload(id, &file)
            .await
            .map_err(|source| AttachmentFlowError::AttachmentOnly {
                task_id: id.clone(),
                source,
            })
    }
}

//! `taskboard` — command-line client for the real-time task board.
//!
//! Connects to a sync hub, performs one board operation, and prints the
//! result. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Show the board
//! cargo run --bin taskboard -- list
//!
//! # Add a task with an attachment
//! cargo run --bin taskboard -- add "Write report" --priority high --attach plan.pdf
//!
//! # Follow live changes
//! TASKBOARD_HUB_URL=ws://board.local:3001/ws cargo run --bin taskboard -- watch
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::attach::AttachmentFlowError;
use taskboard::client::{BoardClient, BoardEvent, ClientError};
use taskboard::config::{CliArgs, ClientConfig, Command, ConfigError};
use taskboard::render;
use taskboard::upload::{AttachmentUploader, HttpUploader, PendingFile, UploadFailure};
use taskboard_proto::sync::ServerEvent;
use taskboard_proto::task::{NewTask, TaskId, TaskPatch};

/// Errors reported to the user before exiting non-zero.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Attachment(#[from] AttachmentFlowError),
    #[error(transparent)]
    Upload(#[from] UploadFailure),
    #[error("no task matches {0:?}")]
    UnknownTask(String),
    #[error("{0:?} matches more than one task")]
    AmbiguousTask(String),
    #[error("nothing to change")]
    EmptyEdit,
    #[error("no confirmation from the hub")]
    Unconfirmed,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Command::List);
    tracing::info!(hub = %config.hub_url, ?command, "taskboard starting");

    match run(command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging so stdout carries only command output.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    // Validate local input before opening a connection.
    let pending = match &command {
        Command::Add {
            attach: Some(path), ..
        }
        | Command::Edit {
            attach: Some(path), ..
        }
        | Command::Attach { file: path, .. } => Some(PendingFile::from_path(path).await?),
        _ => None,
    };

    let (client, mut events) = BoardClient::connect(config.to_sync_config()).await?;
    let timeout = config.confirm_timeout;

    match command {
        Command::List => print!("{}", render::board(&client.mirror())),
        Command::Watch => {
            print!("{}", render::board(&client.mirror()));
            while let Some(event) = events.recv().await {
                println!("{}", render::event_line(&event));
                if event == BoardEvent::GaveUp {
                    break;
                }
            }
        }
        Command::Add {
            title,
            description,
            priority,
            column,
            category,
            ..
        } => {
            let mut task = NewTask::new(title);
            task.description = description;
            task.priority = priority.unwrap_or_default();
            task.column = column.unwrap_or_default();
            task.category = category;

            let created = match pending {
                Some(file) => {
                    let uploader = uploader(config)?;
                    client
                        .create_with_attachment(&uploader, task, file)
                        .await?
                }
                None => client.create_and_confirm(task).await?,
            };
            println!("{}", render::task_line(&created));
        }
        Command::Edit {
            id,
            title,
            description,
            clear_description,
            priority,
            column,
            category,
            clear_category,
            ..
        } => {
            let id = resolve_id(&client, &id)?;
            let patch = TaskPatch {
                title,
                description: if clear_description {
                    Some(None)
                } else {
                    description.map(Some)
                },
                priority,
                column,
                category: if clear_category {
                    Some(None)
                } else {
                    category.map(Some)
                },
            };
            match pending {
                Some(file) => {
                    let uploader = uploader(config)?;
                    let task = client
                        .update_with_attachment(&uploader, &id, patch, file)
                        .await?;
                    println!("{}", render::task_line(&task));
                }
                None if patch.is_empty() => return Err(CliError::EmptyEdit),
                None => {
                    client.update(&id, patch)?;
                    let event = confirm(&mut events, timeout, &id, |event| {
                        matches!(event, ServerEvent::Updated(task) if task.id == id)
                    })
                    .await?;
                    if let ServerEvent::Updated(task) = event {
                        println!("{}", render::task_line(&task));
                    }
                }
            }
        }
        Command::Move { id, column } => {
            let id = resolve_id(&client, &id)?;
            if client.move_task(&id, column)? {
                confirm(&mut events, timeout, &id, |event| {
                    matches!(event, ServerEvent::Moved { id: moved, .. } if *moved == id)
                })
                .await?;
                println!("moved {} to {}", render::short_id(&id), column.title());
            } else {
                println!("{} is already in {}", render::short_id(&id), column.title());
            }
        }
        Command::Delete { id } => {
            let id = resolve_id(&client, &id)?;
            client.delete(&id)?;
            confirm(&mut events, timeout, &id, |event| {
                matches!(event, ServerEvent::Deleted(deleted) if *deleted == id)
            })
            .await?;
            println!("deleted {}", render::short_id(&id));
        }
        Command::Attach { id, .. } => {
            let id = resolve_id(&client, &id)?;
            if let Some(file) = pending {
                let task = uploader(config)?.upload(&id, &file).await?;
                println!("{}", render::task_line(&task));
            }
        }
    }
    Ok(())
}

fn uploader(config: &ClientConfig) -> Result<HttpUploader, UploadFailure> {
    match &config.upload_url {
        Some(url) => {
            let endpoint = url
                .parse()
                .map_err(|e: url::ParseError| UploadFailure::InvalidUrl(e.to_string()))?;
            HttpUploader::new(endpoint, config.upload_timeout)
        }
        None => HttpUploader::for_hub(&config.hub_url, config.upload_timeout),
    }
}

/// Finds the task an id or unique id prefix refers to.
fn resolve_id(client: &BoardClient, raw: &str) -> Result<TaskId, CliError> {
    let wanted = TaskId::new(raw);
    if client.task(&wanted).is_some() {
        return Ok(wanted);
    }
    let prefix = raw.trim().to_ascii_lowercase();
    let mut matches = client
        .tasks()
        .into_iter()
        .filter(|task| !prefix.is_empty() && task.id.as_str().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id),
        (Some(_), Some(_)) => Err(CliError::AmbiguousTask(raw.to_string())),
        (None, _) => Err(CliError::UnknownTask(raw.to_string())),
    }
}

/// Waits for the broadcast that confirms an intent on `id`, or the hub's
/// error for it.
async fn confirm(
    events: &mut mpsc::Receiver<BoardEvent>,
    timeout: Duration,
    id: &TaskId,
    done: impl Fn(&ServerEvent) -> bool,
) -> Result<ServerEvent, CliError> {
    let wait = async {
        while let Some(event) = events.recv().await {
            match event {
                BoardEvent::Server(ServerEvent::Error(err)) if err.id.as_ref() == Some(id) => {
                    return Err(CliError::Client(ClientError::Rejected(err)));
                }
                BoardEvent::Server(event) if done(&event) => return Ok(event),
                BoardEvent::Disconnected => {
                    return Err(CliError::Client(ClientError::Disconnected));
                }
                _ => {}
            }
        }
        Err(CliError::Unconfirmed)
    };
    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(Err(CliError::Unconfirmed))
}

// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Attachments end to end: create-then-upload through the client flows,
//! raw multipart requests against the hub, and serving stored files.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard::attach::AttachmentFlowError;
use taskboard::client::{BoardClient, BoardEvent, SyncConfig};
use taskboard::upload::{AttachmentUploader, HttpUploader, PendingFile, UploadFailure};
use taskboard_hub::hub::{self, HubState};
use taskboard_hub::store::{InMemoryTaskStore, TaskStore as _};
use taskboard_hub::upload::{DEFAULT_MAX_UPLOAD_SIZE, UploadDir};
use taskboard_proto::codec;
use taskboard_proto::sync::ServerEvent;
use taskboard_proto::task::{AttachmentKind, NewTask, Task, TaskId, TaskPatch};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);
const PDF: &[u8] = b"%PDF-1.4\n% fake but good enough\n";

struct TestHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    _dir: tempfile::TempDir,
}

impl TestHub {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(HubState::with_config(
            Arc::new(InMemoryTaskStore::new()),
            UploadDir::new(dir.path().join("uploads")),
            DEFAULT_MAX_UPLOAD_SIZE,
        ));
        let (addr, _handle) = hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .expect("failed to start hub");
        Self {
            addr,
            state,
            _dir: dir,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn connect(&self) -> (BoardClient, mpsc::Receiver<BoardEvent>) {
        BoardClient::connect(SyncConfig::new(self.ws_url()))
            .await
            .expect("client failed to connect")
    }

    fn uploader(&self) -> HttpUploader {
        HttpUploader::for_hub(&self.ws_url(), Duration::from_secs(10)).unwrap()
    }
}

fn pdf(name: &str) -> PendingFile {
    PendingFile::new(name, "application/pdf", PDF.to_vec()).unwrap()
}

async fn wait_until(client: &BoardClient, pred: impl Fn(&[Task]) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !pred(&client.tasks()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("mirror never reached the expected state");
}

/// Uploader that always fails and counts its calls.
#[derive(Default)]
struct FailingUploader {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl AttachmentUploader for FailingUploader {
    async fn upload(&self, _task: &TaskId, _file: &PendingFile) -> Result<Task, UploadFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(UploadFailure::Status {
            status: 503,
            message: "upload service down".into(),
        })
    }
}

// =============================================================================
// Client flows
// =============================================================================

#[tokio::test]
async fn create_with_attachment_reaches_every_client() {
    let hub = TestHub::start().await;
    let (alice, _) = hub.connect().await;
    let (bob, _) = hub.connect().await;

    let task = alice
        .create_with_attachment(&hub.uploader(), NewTask::new("Read contract"), pdf("contract v2.pdf"))
        .await
        .unwrap();

    assert_eq!(task.title, "Read contract");
    assert_eq!(task.attachments.len(), 1);
    let attachment = &task.attachments[0];
    assert_eq!(attachment.kind, AttachmentKind::Pdf);
    assert_eq!(attachment.name, "contract_v2.pdf");
    assert!(attachment.url.starts_with("/uploads/"));
    assert!(attachment.url.ends_with("-contract_v2.pdf"));

    for client in [&alice, &bob] {
        let id = task.id.clone();
        wait_until(client, move |tasks| {
            tasks
                .iter()
                .any(|t| t.id == id && t.attachments.len() == 1)
        })
        .await;
    }

    let stored = attachment.url.trim_start_matches("/uploads/");
    assert!(hub.state.uploads.root().join(stored).is_file());

    let response = reqwest::get(hub.http(&attachment.url)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/pdf"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), PDF);
}

#[tokio::test]
async fn failed_upload_keeps_the_task() {
    let hub = TestHub::start().await;
    let (alice, _) = hub.connect().await;
    let uploader = FailingUploader::default();

    let err = alice
        .create_with_attachment(&uploader, NewTask::new("Keep me"), pdf("a.pdf"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AttachmentFlowError::Attachment {
            source: UploadFailure::Status { status: 503, .. },
            ..
        }
    ));
    let saved = err.saved_task().unwrap().clone();
    assert_eq!(saved.title, "Keep me");
    assert!(err.to_string().contains("saved, but attachment failed"));
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);

    let mirrored = alice.task(&saved.id).unwrap();
    assert!(mirrored.attachments.is_empty());
    assert_eq!(hub.state.store().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn silent_hub_skips_the_upload() {
    // A hub that sends an empty board and then ignores every intent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let snapshot = codec::encode_event(&ServerEvent::Snapshot(Vec::new())).unwrap();
        ws.send(Message::Text(snapshot.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = SyncConfig {
        confirm_timeout: Duration::from_millis(200),
        ..SyncConfig::new(format!("ws://{addr}/ws"))
    };
    let (client, _events) = BoardClient::connect(config).await.unwrap();
    let uploader = FailingUploader::default();

    let err = client
        .create_with_attachment(&uploader, NewTask::new("Lost?"), pdf("a.pdf"))
        .await
        .unwrap_err();

    assert!(matches!(err, AttachmentFlowError::ConfirmationTimeout(_)));
    assert!(err.saved_task().is_none());
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.pending_confirmations(), 0);
}

#[tokio::test]
async fn update_with_attachment_applies_both() {
    let hub = TestHub::start().await;
    let (alice, _) = hub.connect().await;
    let (bob, _) = hub.connect().await;
    let task = alice
        .create_and_confirm(NewTask::new("Draft"))
        .await
        .unwrap();

    let patch = TaskPatch {
        title: Some("Draft with figures".into()),
        ..TaskPatch::default()
    };
    let image = PendingFile::new("chart.png", "image/png", vec![0x89, b'P', b'N', b'G']).unwrap();
    alice
        .update_with_attachment(&hub.uploader(), &task.id, patch, image)
        .await
        .unwrap();

    for client in [&alice, &bob] {
        let id = task.id.clone();
        wait_until(client, move |tasks| {
            tasks.iter().any(|t| {
                t.id == id
                    && t.title == "Draft with figures"
                    && t.attachments.len() == 1
                    && t.attachments[0].kind == AttachmentKind::Image
            })
        })
        .await;
    }
}

#[tokio::test]
async fn upload_for_unknown_task_is_not_found() {
    let hub = TestHub::start().await;
    let err = hub
        .uploader()
        .upload(&TaskId::generate(), &pdf("orphan.pdf"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadFailure::Status { status: 404, .. }));
    let leftovers = std::fs::read_dir(hub.state.uploads.root())
        .map(Iterator::count)
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

// =============================================================================
// Raw HTTP
// =============================================================================

#[tokio::test]
async fn unsupported_type_is_rejected_without_broadcast() {
    let hub = TestHub::start().await;
    let (alice, _) = hub.connect().await;
    let (_bob, mut bob_events) = hub.connect().await;
    let task = alice
        .create_and_confirm(NewTask::new("Notes"))
        .await
        .unwrap();

    let file = reqwest::multipart::Part::bytes(b"just text".to_vec())
        .file_name("notes.txt")
        .mime_str("text/plain")
        .unwrap();
    let form = reqwest::multipart::Form::new()
        .text("taskId", task.id.to_string())
        .part("file", file);
    let response = reqwest::Client::new()
        .post(hub.http("/task/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 415);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("text/plain"));
    assert!(!hub.state.uploads.root().exists());

    // Nothing may be broadcast for the rejected upload.
    alice
        .create_and_confirm(NewTask::new("sentinel"))
        .await
        .unwrap();
    let seen = tokio::time::timeout(WAIT, async {
        let mut seen = Vec::new();
        loop {
            let event = bob_events.recv().await.unwrap();
            let done = matches!(
                &event,
                BoardEvent::Server(ServerEvent::Created { task, .. }) if task.title == "sentinel"
            );
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .unwrap();
    assert!(
        !seen
            .iter()
            .any(|e| matches!(e, BoardEvent::Server(ServerEvent::Updated(_)))),
        "rejected upload was broadcast: {seen:?}"
    );
    assert!(alice.task(&task.id).unwrap().attachments.is_empty());
}

#[tokio::test]
async fn missing_task_id_is_a_bad_request() {
    let hub = TestHub::start().await;
    let file = reqwest::multipart::Part::bytes(PDF.to_vec())
        .file_name("a.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let response = reqwest::Client::new()
        .post(hub.http("/task/upload"))
        .multipart(reqwest::multipart::Form::new().part("file", file))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn traversal_outside_upload_dir_is_refused() {
    let hub = TestHub::start().await;
    std::fs::create_dir_all(hub.state.uploads.root()).unwrap();

    for path in ["/uploads/..%2Fsecret.pdf", "/uploads/%2E%2E", "/uploads/missing.pdf"] {
        let response = reqwest::get(hub.http(path)).await.unwrap();
        assert_ne!(response.status(), 200, "{path} was served");
    }
}

// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Connection loss and recovery.
//!
//! The hub is told to close every socket (or is stopped entirely) and the
//! client is expected to go offline, refuse intents, and either resync from
//! a fresh snapshot or give up after its configured attempts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard::client::{BoardClient, BoardEvent, ClientError, SyncConfig};
use taskboard::config::ReconnectConfig;
use taskboard_hub::hub::{self, HubState};
use taskboard_proto::codec;
use taskboard_proto::sync::ServerEvent;
use taskboard_proto::task::{Column, NewTask};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn start_hub() -> (String, Arc<HubState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(HubState::new());
    let (addr, handle) = hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start hub");
    (format!("ws://{addr}/ws"), state, handle)
}

fn config(url: &str, reconnect: ReconnectConfig) -> SyncConfig {
    SyncConfig {
        reconnect,
        ..SyncConfig::new(url)
    }
}

async fn wait_for_event(rx: &mut mpsc::Receiver<BoardEvent>, wanted: &BoardEvent) {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if &event == wanted {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

#[tokio::test]
async fn reconnect_replaces_mirror_with_fresh_snapshot() {
    let (url, state, _handle) = start_hub().await;
    let slow_retry = ReconnectConfig {
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(1),
        max_attempts: 5,
    };
    let (alice, mut alice_events) = BoardClient::connect(config(&url, slow_retry))
        .await
        .unwrap();
    let kept = alice
        .create_and_confirm(NewTask::new("before the drop"))
        .await
        .unwrap();

    state.close_all_connections().await;
    wait_for_event(&mut alice_events, &BoardEvent::Disconnected).await;

    assert!(!alice.is_connected());
    assert!(matches!(
        alice.move_task(&kept.id, Column::Done),
        Err(ClientError::Disconnected)
    ));
    assert_eq!(alice.task(&kept.id).unwrap().column, Column::Todo);
    assert!(matches!(
        alice.create(NewTask::new("queued?")),
        Err(ClientError::Disconnected)
    ));

    // Changes made while alice is away reach her through the snapshot.
    let (bob, _) = BoardClient::connect(SyncConfig::new(&url)).await.unwrap();
    bob.create_and_confirm(NewTask::new("while away"))
        .await
        .unwrap();

    wait_for_event(&mut alice_events, &BoardEvent::Reconnected).await;
    assert!(alice.is_connected());
    let titles: Vec<String> = alice.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, ["before the drop", "while away"]);

    // And the connection works again.
    assert!(alice.move_task(&kept.id, Column::Done).unwrap());
    let id = kept.id.clone();
    tokio::time::timeout(WAIT, async {
        while bob.task(&id).map(|t| t.column) != Some(Column::Done) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("move after reconnect never reached bob");
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (url, state, handle) = start_hub().await;
    let quick = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        max_attempts: 2,
    };
    let (client, mut events) = BoardClient::connect(config(&url, quick)).await.unwrap();

    // Stop accepting, then drop the live socket.
    handle.abort();
    let _ = handle.await;
    state.close_all_connections().await;

    wait_for_event(&mut events, &BoardEvent::Disconnected).await;
    wait_for_event(&mut events, &BoardEvent::Reconnecting { attempt: 1 }).await;
    wait_for_event(&mut events, &BoardEvent::Reconnecting { attempt: 2 }).await;
    wait_for_event(&mut events, &BoardEvent::GaveUp).await;
    assert!(!client.is_connected());
    assert!(matches!(client.resync(), Err(ClientError::Disconnected)));
}

#[tokio::test]
async fn pending_create_fails_when_connection_drops() {
    // A hub that sends an empty board, then hangs up on the first intent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let snapshot = codec::encode_event(&ServerEvent::Snapshot(Vec::new())).unwrap();
        ws.send(Message::Text(snapshot.into())).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_text() {
                let _ = ws.close(None).await;
                break;
            }
        }
    });

    let no_retry = ReconnectConfig {
        max_attempts: 0,
        ..ReconnectConfig::default()
    };
    let (client, _events) = BoardClient::connect(config(&format!("ws://{addr}/ws"), no_retry))
        .await
        .unwrap();

    let err = client
        .create_and_confirm(NewTask::new("never confirmed"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Disconnected));
    assert_eq!(client.pending_confirmations(), 0);
    assert!(client.tasks().is_empty());
}

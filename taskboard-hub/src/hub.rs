//! Sync hub core: shared state, WebSocket handler, connection registry, and
//! intent application.
//!
//! The hub accepts WebSocket connections, sends each one a snapshot of the
//! board, then applies intents from any connection to the [`TaskStore`] and
//! broadcasts the canonical result to every connection, the originator
//! included. Store failures are reported to the originating connection only.
//!
//! All store mutations and their broadcasts run under a single `apply` lock,
//! so broadcast order always equals store-apply order and no two broadcasts
//! interleave. Within one connection intents are applied in receipt order;
//! across connections the order is arrival order at the hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::DefaultBodyLimit;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::codec;
use taskboard_proto::sync::{ClientIntent, ErrorCode, IntentError, ServerEvent};
use taskboard_proto::task::{Attachment, Task, TaskId};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::store::{InMemoryTaskStore, StoreError, TaskStore};
use crate::upload::{self, DEFAULT_MAX_UPLOAD_SIZE, UploadDir};

/// Identifier the hub assigns to each WebSocket connection.
pub type ConnectionId = u64;

/// Where an outcome is delivered.
enum Delivery {
    /// To every connection.
    Broadcast(ServerEvent),
    /// To the originating connection only.
    Origin(ServerEvent),
}

/// Shared hub state holding the connection registry and the task store.
pub struct HubState {
    /// Maps connection ids to the channel feeding that connection's writer.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Source of connection ids.
    next_connection_id: AtomicU64,
    /// The authoritative task collection.
    store: Arc<dyn TaskStore>,
    /// Serializes every store mutation together with its broadcast.
    apply: Mutex<()>,
    /// Where uploaded attachment bytes are kept.
    pub uploads: UploadDir,
    /// Maximum accepted upload request size in bytes.
    max_upload_size: usize,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates a hub with an empty in-memory store, uploads under `./uploads`,
    /// and the default upload size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(
            Arc::new(InMemoryTaskStore::new()),
            UploadDir::new("uploads"),
            DEFAULT_MAX_UPLOAD_SIZE,
        )
    }

    /// Creates a hub over a custom store and upload directory.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn TaskStore>,
        uploads: UploadDir,
        max_upload_size: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            store,
            apply: Mutex::new(()),
            uploads,
            max_upload_size,
        }
    }

    /// The task store behind this hub.
    #[must_use]
    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    /// Maximum accepted upload request size in bytes.
    #[must_use]
    pub const fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    /// Registers a new connection and queues its snapshot as the first
    /// outbound message.
    ///
    /// Runs under the `apply` lock: no broadcast can be emitted between the
    /// snapshot being taken and the connection joining the registry.
    pub async fn connect(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let _apply = self.apply.lock().await;
        let conn_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        let first = match self.store.list().await {
            Ok(tasks) => {
                tracing::debug!(conn_id, count = tasks.len(), "sending snapshot");
                ServerEvent::Snapshot(tasks)
            }
            Err(e) => {
                tracing::error!(conn_id, error = %e, "could not load snapshot");
                ServerEvent::Error(IntentError::for_intent(
                    &ClientIntent::Resync,
                    error_code(&e),
                    e.to_string(),
                ))
            }
        };
        if let Some(message) = encode_message(&first) {
            let _ = sender.send(message);
        }

        self.connections.write().await.insert(conn_id, sender);
        conn_id
    }

    /// Removes a connection from the registry, returning its sender if it existed.
    pub async fn unregister(
        &self,
        conn_id: ConnectionId,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.remove(&conn_id)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Each writer forwards the close frame, which makes the client side
    /// detect the disconnect. Used for graceful shutdown and in tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn_id, sender) in conns.iter() {
            tracing::info!(conn_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Applies one intent from `origin` and delivers the outcome.
    ///
    /// Successful mutations are broadcast to every connection. Failures are
    /// reported to `origin` as a [`ServerEvent::Error`] and nothing is
    /// broadcast.
    pub async fn apply_intent(&self, origin: ConnectionId, intent: ClientIntent) {
        let _apply = self.apply.lock().await;

        let result = match &intent {
            ClientIntent::Create { task, correlation } => {
                self.store.create(task.clone()).await.map(|task| {
                    tracing::info!(conn_id = origin, task_id = %task.id, "task created");
                    Delivery::Broadcast(ServerEvent::Created {
                        task,
                        correlation: *correlation,
                    })
                })
            }
            ClientIntent::Update { id, updates } => {
                self.store.update(id, updates).await.map(|task| {
                    tracing::info!(conn_id = origin, task_id = %task.id, "task updated");
                    Delivery::Broadcast(ServerEvent::Updated(task))
                })
            }
            ClientIntent::Move { id, column } => {
                self.store.move_to(id, *column).await.map(|task| {
                    tracing::info!(
                        conn_id = origin,
                        task_id = %task.id,
                        column = %task.column,
                        "task moved"
                    );
                    Delivery::Broadcast(ServerEvent::Moved {
                        id: task.id,
                        column: task.column,
                    })
                })
            }
            ClientIntent::Delete { id } => self.store.delete(id).await.map(|task| {
                tracing::info!(conn_id = origin, task_id = %task.id, "task deleted");
                Delivery::Broadcast(ServerEvent::Deleted(task.id))
            }),
            ClientIntent::Resync => self
                .store
                .list()
                .await
                .map(|tasks| Delivery::Origin(ServerEvent::Snapshot(tasks))),
        };

        match result {
            Ok(Delivery::Broadcast(event)) => self.broadcast(&event).await,
            Ok(Delivery::Origin(event)) => self.send_to(origin, &event).await,
            Err(e) => {
                tracing::warn!(
                    conn_id = origin,
                    intent = %intent.kind(),
                    error = %e,
                    "intent failed, nothing broadcast"
                );
                let report = IntentError::for_intent(&intent, error_code(&e), e.to_string());
                self.send_to(origin, &ServerEvent::Error(report)).await;
            }
        }
    }

    /// Appends an attachment through the store and broadcasts the updated task.
    ///
    /// Serialized with intents under the same `apply` lock.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] if the task does not exist or the store
    /// fails; nothing is broadcast in that case.
    pub async fn apply_attachment(
        &self,
        id: &TaskId,
        attachment: Attachment,
    ) -> Result<Task, StoreError> {
        let _apply = self.apply.lock().await;
        let task = self.store.append_attachment(id, attachment).await?;
        tracing::info!(
            task_id = %task.id,
            attachments = task.attachments.len(),
            "attachment appended"
        );
        self.broadcast(&ServerEvent::Updated(task.clone())).await;
        Ok(task)
    }

    /// Sends an event to every registered connection.
    ///
    /// Connections whose channel is closed are unregistered.
    async fn broadcast(&self, event: &ServerEvent) {
        let frame = match codec::encode_event(event) {
            Ok(frame) => Utf8Bytes::from(frame),
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "failed to encode broadcast");
                return;
            }
        };

        let dead: Vec<ConnectionId> = {
            let conns = self.connections.read().await;
            tracing::debug!(event = event.name(), recipients = conns.len(), "broadcasting");
            conns
                .iter()
                .filter(|(_, sender)| sender.send(Message::Text(frame.clone())).is_err())
                .map(|(conn_id, _)| *conn_id)
                .collect()
        };

        for conn_id in dead {
            tracing::warn!(conn_id, "broadcast failed, unregistering connection");
            self.unregister(conn_id).await;
        }
    }

    /// Sends an event to one connection.
    async fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) {
        let sender = self.connections.read().await.get(&conn_id).cloned();
        if let Some(sender) = sender
            && let Some(message) = encode_message(event)
            && sender.send(message).is_err()
        {
            tracing::warn!(conn_id, event = event.name(), "send to connection failed");
            self.unregister(conn_id).await;
        }
    }

    /// Decodes one inbound frame and applies it.
    ///
    /// Undecodable frames are answered with a `malformed` error; the
    /// connection stays open.
    async fn handle_frame(&self, conn_id: ConnectionId, data: &[u8]) {
        match codec::decode_intent(data) {
            Ok(intent) => {
                tracing::debug!(conn_id, intent = %intent.kind(), "intent received");
                self.apply_intent(conn_id, intent).await;
            }
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "failed to decode intent");
                let report = IntentError::malformed(e.to_string());
                self.send_to(conn_id, &ServerEvent::Error(report)).await;
            }
        }
    }
}

/// Maps a store failure onto the wire error code.
const fn error_code(error: &StoreError) -> ErrorCode {
    match error {
        StoreError::NotFound(_) => ErrorCode::NotFound,
        StoreError::Unavailable(_) => ErrorCode::StoreUnavailable,
    }
}

/// Encodes an event into a text message, logging failures.
fn encode_message(event: &ServerEvent) -> Option<Message> {
    match codec::encode_event(event) {
        Ok(frame) => Some(Message::Text(frame.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "failed to encode event");
            None
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Register the connection and queue its snapshot.
/// 2. Forward queued events to the socket from a writer task.
/// 3. Apply inbound intents one at a time, in receipt order.
/// 4. On disconnect, unregister the connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.connect(tx).await;
    tracing::info!(conn_id, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    reader_state.handle_frame(conn_id, text.as_bytes()).await;
                }
                Message::Binary(data) => {
                    reader_state.handle_frame(conn_id, &data).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn_id).await;
    tracing::info!(conn_id, "client disconnected and unregistered");
}

/// Builds the hub's HTTP router: the WebSocket endpoint and the upload
/// side channel.
pub fn router(state: Arc<HubState>) -> axum::Router {
    let body_limit = state.max_upload_size();
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route(
            "/task/upload",
            axum::routing::post(upload::upload_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/uploads/{name}", axum::routing::get(upload::serve_handler))
        .with_state(state)
}

/// Starts the hub on the given address with a fresh in-memory state and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub with a pre-configured [`HubState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

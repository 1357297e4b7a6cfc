//! WebSocket client for the sync hub.
//!
//! [`BoardClient::connect`] opens the WebSocket, waits for the hub's initial
//! snapshot, and spawns a supervisor task that owns the connection. The
//! supervisor applies every hub event to the shared [`Mirror`], resolves
//! pending create confirmations, and forwards [`BoardEvent`]s to the caller.
//!
//! When the connection drops the supervisor fails every pending
//! confirmation, refuses new intents with [`ClientError::Disconnected`], and
//! reconnects with exponential backoff. The snapshot sent by the hub on
//! reconnect replaces the mirror, discarding any optimistic local state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use taskboard_proto::board::BoardStats;
use taskboard_proto::codec::{self, CodecError};
use taskboard_proto::sync::{ClientIntent, CorrelationId, IntentError, ServerEvent};
use taskboard_proto::task::{Column, NewTask, Task, TaskId, TaskPatch, ValidationError};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::ReconnectConfig;
use crate::mirror::Mirror;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Outcome delivered to a pending create.
type Confirmation = Result<Task, ClientError>;

/// Errors surfaced by [`BoardClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Input failed local validation; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The WebSocket could not be opened.
    #[error("could not connect to hub: {0}")]
    Connect(String),

    /// A connection step did not finish in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Not connected to the hub.
    #[error("not connected to the hub")]
    Disconnected,

    /// The hub reported a failure for this intent.
    #[error("hub rejected the request: {0}")]
    Rejected(IntentError),

    /// The hub did not confirm a create in time. The task may still exist.
    #[error("hub did not confirm the task within {0:?}")]
    ConfirmationTimeout(Duration),
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// A hub event, already applied to the mirror.
    Server(ServerEvent),
    /// The connection dropped; intents are refused until reconnected.
    Disconnected,
    /// A reconnect attempt is about to start.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Reconnected; the mirror holds the fresh snapshot.
    Reconnected,
    /// Every reconnect attempt failed; the client stays offline.
    GaveUp,
}

/// Connection settings for [`BoardClient`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hub WebSocket URL (ws:// or wss://).
    pub hub_url: String,
    /// Timeout for opening the WebSocket.
    pub connect_timeout: Duration,
    /// Timeout for the snapshot that follows every connect.
    pub snapshot_timeout: Duration,
    /// How long [`BoardClient::create_and_confirm`] waits.
    pub confirm_timeout: Duration,
    /// Capacity of the [`BoardEvent`] channel.
    pub channel_capacity: usize,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl SyncConfig {
    /// Settings for `hub_url` with default timeouts.
    #[must_use]
    pub fn new(hub_url: impl Into<String>) -> Self {
        let defaults = crate::config::ClientConfig::default();
        Self {
            hub_url: hub_url.into(),
            ..defaults.to_sync_config()
        }
    }
}

/// State shared between the client handle and its supervisor task.
struct Shared {
    mirror: Mutex<Mirror>,
    /// Frames for the current connection; `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Creates awaiting their `created` broadcast, by correlation token.
    waiters: Mutex<HashMap<CorrelationId, oneshot::Sender<Confirmation>>>,
}

impl Shared {
    fn resolve(&self, correlation: CorrelationId, outcome: Confirmation) {
        if let Some(waiter) = self.waiters.lock().remove(&correlation) {
            let _ = waiter.send(outcome);
        }
    }

    /// Marks the client offline and fails every pending confirmation.
    fn go_offline(&self) {
        self.outbound.lock().take();
        let waiters: Vec<_> = self.waiters.lock().drain().collect();
        if !waiters.is_empty() {
            tracing::debug!(count = waiters.len(), "failing pending confirmations");
        }
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(ClientError::Disconnected));
        }
    }
}

/// Removes a waiter when the waiting future finishes or is dropped.
struct WaiterGuard<'a> {
    shared: &'a Shared,
    correlation: CorrelationId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.shared.waiters.lock().remove(&self.correlation);
    }
}

/// Handle to a live board connection.
///
/// Dropping the handle stops the supervisor and closes the connection.
pub struct BoardClient {
    shared: Arc<Shared>,
    confirm_timeout: Duration,
    supervisor: tokio::task::JoinHandle<()>,
}

impl BoardClient {
    /// Connects to the hub and waits for the initial snapshot.
    ///
    /// Returns the client and the receiving end of its event channel. The
    /// initial snapshot is already in the mirror and is not repeated on the
    /// channel.
    ///
    /// Hub events wait for room in the channel, so a receiver that is kept
    /// but never drained eventually stalls the connection. Drop the receiver
    /// if events are not needed. Connection status events are dropped when
    /// the channel is full.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Timeout`] if the connect or snapshot wait times out.
    /// - [`ClientError::Connect`] if the WebSocket cannot be opened or
    ///   closes before the snapshot.
    /// - [`ClientError::Rejected`] if the hub answers with an error instead
    ///   of a snapshot.
    pub async fn connect(
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<BoardEvent>), ClientError> {
        let (sink, reader, tasks) = open_connection(&config).await?;
        tracing::info!(url = %config.hub_url, tasks = tasks.len(), "connected to hub");

        let mut mirror = Mirror::new();
        mirror.apply_snapshot(tasks);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            mirror: Mutex::new(mirror),
            outbound: Mutex::new(Some(out_tx)),
            waiters: Mutex::new(HashMap::new()),
        });

        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let confirm_timeout = config.confirm_timeout;
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&shared),
            config,
            Connection {
                sink,
                reader,
                outbound: out_rx,
            },
            events_tx,
        ));

        Ok((
            Self {
                shared,
                confirm_timeout,
                supervisor,
            },
            events_rx,
        ))
    }

    /// Whether the client currently has a hub connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.outbound.lock().is_some()
    }

    /// Copy of every mirrored task.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.mirror.lock().tasks().to_vec()
    }

    /// Copy of one mirrored task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.shared.mirror.lock().get(id).cloned()
    }

    /// Copy of the whole mirror.
    #[must_use]
    pub fn mirror(&self) -> Mirror {
        self.shared.mirror.lock().clone()
    }

    /// Per-column counts of the mirror.
    #[must_use]
    pub fn stats(&self) -> BoardStats {
        self.shared.mirror.lock().stats()
    }

    /// Number of creates still waiting for confirmation.
    #[must_use]
    pub fn pending_confirmations(&self) -> usize {
        self.shared.waiters.lock().len()
    }

    /// Sends a create intent without waiting for the result.
    ///
    /// The returned token is echoed in the matching `created` event.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for a bad title or
    /// [`ClientError::Disconnected`] while offline.
    pub fn create(&self, task: NewTask) -> Result<CorrelationId, ClientError> {
        task.validate()?;
        let correlation = CorrelationId::new();
        self.send(&ClientIntent::Create {
            task,
            correlation: Some(correlation),
        })?;
        Ok(correlation)
    }

    /// Sends a create intent and waits for the hub to broadcast the task.
    ///
    /// The wait is bounded by the configured confirmation timeout, and the
    /// waiter is unregistered however the call ends.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] before anything is sent.
    /// - [`ClientError::Disconnected`] if offline or the connection drops.
    /// - [`ClientError::Rejected`] if the hub reports a failure.
    /// - [`ClientError::ConfirmationTimeout`] if no confirmation arrives.
    pub async fn create_and_confirm(&self, task: NewTask) -> Result<Task, ClientError> {
        task.validate()?;
        let correlation = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.shared.waiters.lock().insert(correlation, tx);
        let _guard = WaiterGuard {
            shared: &self.shared,
            correlation,
        };

        self.send(&ClientIntent::Create {
            task,
            correlation: Some(correlation),
        })?;

        match tokio::time::timeout(self.confirm_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                tracing::warn!(%correlation, "create confirmation timed out");
                Err(ClientError::ConfirmationTimeout(self.confirm_timeout))
            }
        }
    }

    /// Sends a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for a bad title or
    /// [`ClientError::Disconnected`] while offline.
    pub fn update(&self, id: &TaskId, updates: TaskPatch) -> Result<(), ClientError> {
        updates.validate()?;
        self.send(&ClientIntent::Update {
            id: id.clone(),
            updates,
        })
    }

    /// Drops a task onto a column.
    ///
    /// The mirror changes immediately and a move intent follows. Returns
    /// `false` without sending anything when the task is unknown locally or
    /// already in `column`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] while offline; the mirror is not
    /// touched in that case.
    pub fn move_task(&self, id: &TaskId, column: Column) -> Result<bool, ClientError> {
        let frame = codec::encode_intent(&ClientIntent::Move {
            id: id.clone(),
            column,
        })?;

        // Held across the local change and the send, so going offline
        // cannot slip in between them.
        let outbound = self.shared.outbound.lock();
        let sender = outbound.as_ref().ok_or(ClientError::Disconnected)?;
        let mut mirror = self.shared.mirror.lock();
        let Some(previous) = mirror.get(id).map(|task| task.column) else {
            tracing::debug!(task_id = %id, "drop on unknown task, nothing sent");
            return Ok(false);
        };
        if !mirror.set_column_optimistic(id, column) {
            tracing::debug!(task_id = %id, %column, "drop on current column, nothing sent");
            return Ok(false);
        }
        if sender.send(frame).is_err() {
            mirror.set_column_optimistic(id, previous);
            tracing::warn!(task_id = %id, "move not sent, local column restored");
            return Err(ClientError::Disconnected);
        }
        tracing::debug!(task_id = %id, %column, "move queued");
        Ok(true)
    }

    /// Sends a delete intent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] while offline.
    pub fn delete(&self, id: &TaskId) -> Result<(), ClientError> {
        self.send(&ClientIntent::Delete { id: id.clone() })
    }

    /// Asks the hub for a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] while offline.
    pub fn resync(&self) -> Result<(), ClientError> {
        self.send(&ClientIntent::Resync)
    }

    /// Confirmation timeout this client was configured with.
    #[must_use]
    pub const fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }

    fn send(&self, intent: &ClientIntent) -> Result<(), ClientError> {
        let frame = codec::encode_intent(intent)?;
        let outbound = self.shared.outbound.lock();
        let sender = outbound.as_ref().ok_or(ClientError::Disconnected)?;
        sender.send(frame).map_err(|_| ClientError::Disconnected)?;
        tracing::debug!(intent = %intent.kind(), "intent queued");
        Ok(())
    }
}

impl Drop for BoardClient {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// One live hub connection.
struct Connection {
    sink: WsSender,
    reader: WsReader,
    outbound: mpsc::UnboundedReceiver<String>,
}

/// Opens a WebSocket to the hub and waits for its snapshot.
async fn open_connection(
    config: &SyncConfig,
) -> Result<(WsSender, WsReader, Vec<Task>), ClientError> {
    let url = config.hub_url.as_str();
    let (ws_stream, _response) = tokio::time::timeout(config.connect_timeout, connect_async(url))
        .await
        .map_err(|_| {
            tracing::warn!(url, "hub connect timed out");
            ClientError::Timeout("hub connection")
        })?
        .map_err(|e| {
            tracing::warn!(url, error = %e, "hub connect failed");
            ClientError::Connect(e.to_string())
        })?;

    let (sink, mut reader) = ws_stream.split();
    let tasks = tokio::time::timeout(config.snapshot_timeout, await_snapshot(&mut reader))
        .await
        .map_err(|_| {
            tracing::warn!(url, "initial snapshot timed out");
            ClientError::Timeout("initial snapshot")
        })??;
    Ok((sink, reader, tasks))
}

/// Reads frames until the hub's snapshot arrives.
async fn await_snapshot(reader: &mut WsReader) -> Result<Vec<Task>, ClientError> {
    while let Some(frame) = reader.next().await {
        let data = match frame {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(ClientError::Connect(e.to_string())),
        };
        match codec::decode_event(&data)? {
            ServerEvent::Snapshot(tasks) => return Ok(tasks),
            ServerEvent::Error(err) => return Err(ClientError::Rejected(err)),
            other => tracing::debug!(event = other.name(), "ignoring event before snapshot"),
        }
    }
    Err(ClientError::Connect(
        "connection closed before snapshot".to_string(),
    ))
}

/// Owns the hub connection for the lifetime of the client.
async fn supervise(
    shared: Arc<Shared>,
    config: SyncConfig,
    mut connection: Connection,
    events: mpsc::Sender<BoardEvent>,
) {
    loop {
        run_connection(&shared, &mut connection, &events).await;

        shared.go_offline();
        tracing::warn!(url = %config.hub_url, "hub connection lost");
        emit(&events, BoardEvent::Disconnected);

        let Some((sink, reader, tasks)) = reconnect(&config, &events).await else {
            tracing::error!(
                attempts = config.reconnect.max_attempts,
                "giving up on the hub connection"
            );
            emit(&events, BoardEvent::GaveUp);
            return;
        };

        shared.mirror.lock().apply_snapshot(tasks);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *shared.outbound.lock() = Some(out_tx);
        connection = Connection {
            sink,
            reader,
            outbound: out_rx,
        };
        tracing::info!(url = %config.hub_url, "reconnected to hub");
        emit(&events, BoardEvent::Reconnected);
    }
}

/// Pumps one connection until it closes or fails.
async fn run_connection(
    shared: &Shared,
    connection: &mut Connection,
    events: &mpsc::Sender<BoardEvent>,
) {
    loop {
        tokio::select! {
            frame = connection.reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(shared, text.as_bytes(), events).await;
                }
                Some(Ok(Message::Binary(data))) => handle_frame(shared, &data, events).await,
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("hub closed the connection");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "hub connection error");
                    return;
                }
            },
            outbound = connection.outbound.recv() => {
                let Some(frame) = outbound else { return };
                if let Err(e) = connection.sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "failed to send intent");
                    return;
                }
            }
        }
    }
}

/// Applies one inbound frame to the mirror and pending confirmations.
async fn handle_frame(shared: &Shared, data: &[u8], events: &mpsc::Sender<BoardEvent>) {
    let event = match codec::decode_event(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring undecodable hub frame");
            return;
        }
    };
    tracing::debug!(event = event.name(), "hub event");

    shared.mirror.lock().apply(&event);
    match &event {
        ServerEvent::Created {
            task,
            correlation: Some(correlation),
        } => shared.resolve(*correlation, Ok(task.clone())),
        ServerEvent::Error(err) => {
            tracing::warn!(error = %err, code = ?err.code, "hub rejected intent");
            if let Some(correlation) = err.correlation {
                shared.resolve(correlation, Err(ClientError::Rejected(err.clone())));
            }
        }
        _ => {}
    }
    if events.send(BoardEvent::Server(event)).await.is_err() {
        tracing::trace!("event receiver dropped");
    }
}

/// Tries to reopen the connection with exponential backoff.
async fn reconnect(
    config: &SyncConfig,
    events: &mpsc::Sender<BoardEvent>,
) -> Option<(WsSender, WsReader, Vec<Task>)> {
    for attempt in 1..=config.reconnect.max_attempts {
        let delay = config.reconnect.delay_for(attempt);
        emit(events, BoardEvent::Reconnecting { attempt });
        tracing::info!(attempt, delay_ms = delay.as_millis(), "reconnecting to hub");
        tokio::time::sleep(delay).await;

        match open_connection(config).await {
            Ok(connection) => return Some(connection),
            Err(e) => tracing::warn!(attempt, error = %e, "reconnect attempt failed"),
        }
    }
    None
}

/// Forwards a connection status event without blocking the supervisor.
fn emit(events: &mpsc::Sender<BoardEvent>, event: BoardEvent) {
    if let Err(mpsc::error::TrySendError::Full(dropped)) = events.try_send(event) {
        tracing::warn!(?dropped, "event channel full, dropping board event");
    }
}

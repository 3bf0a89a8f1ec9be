//! Connection lifecycle and reconnection.
//!
//! ```text
//!   Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!        ▲                        │   ▲                  │
//!        │ disconnect()    close  │   │ timer      close │
//!        │ (from any state)       ▼   │                  ▼
//!        └──────────────────── ReconnectPending ◀────────┘
//! ```
//!
//! Every socket the manager opens gets a fresh generation number. Closing or
//! replacing a socket bumps the generation, which detaches the old socket:
//! anything it still reports (late frames, its close event) is discarded.

use crate::codec;
use crate::error::{NetError, TransportError};
use crate::protocol::Message;
use crate::transport::{endpoint_url, spawn_socket, Envelope, Inbound, SocketHandle};
use crate::worker_pool::WorkerPool;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Length of generated client identifiers.
const CLIENT_ID_LEN: usize = 16;

/// Connection settings, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Server base URL (`ws://`, `wss://`, `http://` or `https://`).
    pub server_url: String,
    /// Authentication secret sent as a query parameter.
    pub secret: String,
    /// Client identifier; generated when absent.
    pub client_id: Option<String>,
    /// Delay before a reconnect attempt. Zero disables reconnection.
    pub reconnect_timeout: Duration,
    /// Decode workers per hardware thread.
    pub worker_multiplier: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:4000".to_string(),
            secret: String::new(),
            client_id: None,
            reconnect_timeout: Duration::from_secs(5),
            worker_multiplier: 1,
        }
    }
}

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no reconnect scheduled.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Socket lost; a reconnect attempt is scheduled.
    ReconnectPending,
}

/// Something the owner of the manager should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket opened.
    Connected,
    /// The socket closed or was closed.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A frame decoded successfully.
    Message(Message),
}

/// Owns the socket, the decode pool and the reconnect timer.
pub struct ConnectionManager {
    config: ConnectionConfig,
    client_id: String,
    state: ConnectionState,
    generation: u64,
    socket: Option<SocketHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
    pool: WorkerPool,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox_rx: mpsc::UnboundedReceiver<Envelope>,
    pending: VecDeque<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.
    pub fn new(config: ConnectionConfig) -> Self {
        let client_id = config
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(random_client_id);
        let pool = WorkerPool::with_multiplier(config.worker_multiplier);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        debug!(%client_id, workers = pool.capacity(), "Connection manager created");

        Self {
            config,
            client_id,
            state: ConnectionState::Disconnected,
            generation: 0,
            socket: None,
            reconnect_timer: None,
            pool,
            inbox_tx,
            inbox_rx,
            pending: VecDeque::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Identifier presented to the server.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Replace the identifier used by the next connection attempt.
    pub fn set_client_id(&mut self, id: impl Into<String>) {
        self.client_id = id.into();
    }

    /// Settings the manager was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Decode pool, for backpressure observation.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Open a socket and wait until it is connected.
    ///
    /// Any existing socket is replaced and a scheduled reconnect is cancelled.
    /// With reconnection enabled this keeps waiting across failed attempts;
    /// with it disabled the first failure is returned.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.open()?;

        loop {
            if self.state == ConnectionState::Connected {
                return Ok(());
            }
            let Some(envelope) = self.inbox_rx.recv().await else {
                return Err(TransportError::Closed("inbox closed".to_string()));
            };
            if let Some(failure) = self.handle(envelope) {
                if self.state == ConnectionState::Disconnected {
                    return Err(failure);
                }
            }
        }
    }

    /// Close the socket and stay disconnected.
    pub fn disconnect(&mut self) {
        self.cancel_reconnect();
        self.detach_socket();
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected by client");
            self.state = ConnectionState::Disconnected;
            self.pending.push_back(ConnectionEvent::Disconnected {
                reason: "disconnected by client".to_string(),
            });
        }
    }

    /// Encode and transmit a message.
    pub fn send(&self, message: &Message) -> Result<(), NetError> {
        let socket = match (&self.socket, self.state) {
            (Some(socket), ConnectionState::Connected) => socket,
            _ => return Err(TransportError::NotConnected.into()),
        };
        let frame = codec::encode(message)?;
        trace!(kind = %message.kind, bytes = frame.len(), "Sending message");
        socket.send(frame)?;
        Ok(())
    }

    /// Drain everything that happened since the last call, without blocking.
    pub fn pump(&mut self) -> Vec<ConnectionEvent> {
        while let Ok(envelope) = self.inbox_rx.try_recv() {
            self.handle(envelope);
        }
        self.pending.drain(..).collect()
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let envelope = self.inbox_rx.recv().await?;
            self.handle(envelope);
        }
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let url = endpoint_url(&self.config.server_url, &self.config.secret, &self.client_id)?;

        self.cancel_reconnect();
        self.detach_socket();
        if self.state == ConnectionState::Connected {
            self.pending.push_back(ConnectionEvent::Disconnected {
                reason: "replaced by a new connection".to_string(),
            });
        }

        info!(server = %self.config.server_url, generation = self.generation, "Connecting");
        self.state = ConnectionState::Connecting;
        self.socket = Some(spawn_socket(
            url,
            self.generation,
            self.pool.clone(),
            self.inbox_tx.clone(),
        ));
        Ok(())
    }

    /// Apply one transport report. Returns the failure when the report was a
    /// close of the current socket.
    fn handle(&mut self, envelope: Envelope) -> Option<TransportError> {
        if envelope.generation != self.generation {
            trace!(
                stale = envelope.generation,
                current = self.generation,
                "Dropping event from detached socket"
            );
            return None;
        }

        match envelope.event {
            Inbound::Opened => {
                if self.state == ConnectionState::Connecting {
                    info!(client_id = %self.client_id, "Connected");
                    self.cancel_reconnect();
                    self.state = ConnectionState::Connected;
                    self.pending.push_back(ConnectionEvent::Connected);
                }
                None
            }
            Inbound::Decoded(Ok(Ok(message))) => {
                self.pending.push_back(ConnectionEvent::Message(message));
                None
            }
            Inbound::Decoded(Ok(Err(err))) => {
                warn!(error = %err, "Dropping malformed message");
                None
            }
            Inbound::Decoded(Err(failure)) => {
                error!(error = %failure, "Decode worker failed");
                None
            }
            Inbound::Closed(failure) => {
                self.on_closed(&failure);
                Some(failure)
            }
            Inbound::ReconnectDue => {
                self.reconnect_timer = None;
                if self.state == ConnectionState::ReconnectPending {
                    if let Err(err) = self.open() {
                        error!(error = %err, "Reconnect aborted");
                        self.state = ConnectionState::Disconnected;
                    }
                }
                None
            }
        }
    }

    fn on_closed(&mut self, failure: &TransportError) {
        if let Some(socket) = self.socket.take() {
            socket.abort();
        }
        self.generation = self.generation.wrapping_add(1);

        let was_connected = self.state == ConnectionState::Connected;
        if was_connected {
            warn!(reason = %failure, "Connection lost");
            self.pending.push_back(ConnectionEvent::Disconnected {
                reason: failure.to_string(),
            });
        } else {
            warn!(reason = %failure, "Connection attempt failed");
        }

        if self.config.reconnect_timeout.is_zero() {
            self.state = ConnectionState::Disconnected;
        } else {
            self.state = ConnectionState::ReconnectPending;
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        let delay = self.config.reconnect_timeout;
        let generation = self.generation;
        let inbox = self.inbox_tx.clone();
        debug!(?delay, "Reconnect scheduled");
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(Envelope {
                generation,
                event: Inbound::ReconnectDue,
            });
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn detach_socket(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_reconnect();
        if let Some(socket) = self.socket.take() {
            socket.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("pool", &self.pool)
            .finish()
    }
}

fn random_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

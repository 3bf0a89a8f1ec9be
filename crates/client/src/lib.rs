#![warn(missing_docs)]
//! Client-side world synchronization: connects to a voxel server, routes its
//! messages into local state and streams chunks in and edits out.

pub mod chunk_queue;
pub mod collaborators;
pub mod dispatcher;
mod error;
pub mod reconciler;

pub use chunk_queue::{ChunkMode, ChunkQueue, DrainBudget};
pub use collaborators::{
    AssetLoader, BlockCache, BlockRegistry, ChatSink, Collaborators, Discard, EntitySink,
    ParticleSink, PeerRegistry,
};
pub use dispatcher::Dispatcher;
pub use error::{ClientError, IdentityConflictError};
pub use reconciler::BlockBreak;

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use voxlink_core::voxel::{block_id, AIR};
use voxlink_core::{ChunkCoord, ChunkStore, VoxelCoord, VoxelUpdate};
use voxlink_net::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, Message};

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Chunk coordinates requested per frame.
    pub max_requests_per_frame: usize,
    /// Received chunks applied per frame.
    pub max_process_per_frame: usize,
    /// Local voxel edits sent per frame.
    pub max_updates_per_frame: usize,
    /// Buffered lifecycle events per subscriber.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_requests_per_frame: 8,
            max_process_per_frame: 4,
            max_updates_per_frame: 64,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Per-frame drain limits. Each is at least one so the queues always move.
    fn budget(&self) -> DrainBudget {
        DrainBudget {
            requests: self.max_requests_per_frame.max(1),
            process: self.max_process_per_frame.max(1),
            updates: self.max_updates_per_frame.max(1),
        }
    }
}

/// Lifecycle notification for subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The socket opened.
    Connected,
    /// The socket closed.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// `INIT` arrived and assets are loaded. Fires once.
    Ready,
    /// A decoded server message, before routing.
    Network(Arc<Message>),
}

/// Networked voxel world client.
///
/// All state mutation happens on the caller's task: [`Client::frame`]
/// drains the connection and applies everything that arrived.
pub struct Client {
    config: ClientConfig,
    connection: ConnectionManager,
    dispatcher: Dispatcher,
    queue: ChunkQueue,
    collab: Collaborators,
    outbox: VecDeque<Message>,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig, collab: Collaborators) -> Self {
        let dispatcher = match config.connection.client_id.as_deref() {
            Some(id) if !id.is_empty() => Dispatcher::with_id(id),
            _ => Dispatcher::new(),
        };
        let connection = ConnectionManager::new(config.connection.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            config,
            connection,
            dispatcher,
            queue: ChunkQueue::new(),
            collab,
            outbox: VecDeque::new(),
            events,
        }
    }

    /// Connect and wait until the socket is open.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        self.connection.connect().await?;
        self.process_connection()
    }

    /// Close the connection without reconnecting.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        self.connection.disconnect();
        self.process_connection()
    }

    /// Encode and send a message immediately.
    pub fn send(&self, message: &Message) -> Result<(), ClientError> {
        self.connection.send(message)?;
        Ok(())
    }

    /// Send a message with the next frame.
    pub fn queue(&mut self, message: Message) {
        self.outbox.push_back(message);
    }

    /// Run one frame: route received messages, apply chunks, send requests.
    pub fn frame(&mut self) -> Result<(), ClientError> {
        self.process_connection()?;
        self.check_ready();

        let online = self.connection.is_connected();
        let drained = self
            .queue
            .drain(self.config.budget(), self.collab.chunks.as_mut(), online);
        if !drained.added.is_empty() {
            debug!(chunks = drained.added.len(), "Chunks applied");
        }

        if online {
            for message in drained.outbound.into_iter().chain(self.outbox.drain(..)) {
                if let Err(err) = self.connection.send(&message) {
                    warn!(kind = %message.kind, error = %err, "Send failed");
                }
            }
        }
        Ok(())
    }

    /// Ask the server for a chunk. Returns `false` when it is already known.
    pub fn request_chunk(&mut self, coord: ChunkCoord) -> bool {
        self.queue.request_chunk(coord, self.collab.chunks.as_ref())
    }

    /// Edit a voxel locally and queue the edit for the server.
    ///
    /// The replaced block type is remembered so that a later removal
    /// confirmed by the server can still show what was broken.
    pub fn update_voxel(&mut self, vx: i32, vy: i32, vz: i32, voxel: u32) {
        let coord = VoxelCoord::new(vx, vy, vz);
        let chunks = self.collab.chunks.as_mut();

        let previous = chunks.raw_value(coord).map(block_id).unwrap_or(AIR);
        if previous != AIR && self.collab.block_cache.get(coord).is_none() {
            self.collab.block_cache.insert(coord, previous);
        }
        chunks.set_raw_value(coord, voxel);

        let light = chunks.raw_light(coord).unwrap_or(0);
        self.queue.queue_update(VoxelUpdate {
            vx,
            vy,
            vz,
            voxel,
            light,
        });
    }

    /// Drop a chunk locally and tell the server.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> bool {
        let known = self.queue.unload(coord, self.collab.chunks.as_mut());
        if known && self.connection.is_connected() {
            self.queue(Message::unload_request(&[coord]));
        }
        known
    }

    /// Receive lifecycle and network events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Identifier established with the server.
    pub fn id(&self) -> Option<&str> {
        self.dispatcher.id()
    }

    /// Identifier presented on the next connection attempt.
    pub fn client_id(&self) -> &str {
        self.connection.client_id()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Whether the ready signal has fired.
    pub fn is_ready(&self) -> bool {
        self.dispatcher.is_ready()
    }

    /// Loaded chunks.
    pub fn chunks(&self) -> &dyn ChunkStore {
        self.collab.chunks.as_ref()
    }

    /// Speculative edit cache.
    pub fn block_cache(&self) -> &dyn BlockCache {
        self.collab.block_cache.as_ref()
    }

    /// Chunk pipeline state.
    pub fn chunk_queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Connection manager, for worker pool and state inspection.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn process_connection(&mut self) -> Result<(), ClientError> {
        for event in self.connection.pump() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: ConnectionEvent) -> Result<(), ClientError> {
        match event {
            ConnectionEvent::Connected => {
                self.emit(ClientEvent::Connected);
            }
            ConnectionEvent::Disconnected { reason } => {
                self.collab.peers.reset();
                self.queue.reset();
                self.emit(ClientEvent::Disconnected { reason });
            }
            ConnectionEvent::Message(message) => {
                if self.events.receiver_count() > 0 {
                    self.emit(ClientEvent::Network(Arc::new(message.clone())));
                }
                let had_id = self.dispatcher.id().is_some();
                self.dispatcher
                    .dispatch(message, &mut self.collab, &mut self.queue)?;
                if !had_id {
                    if let Some(id) = self.dispatcher.id() {
                        self.connection.set_client_id(id);
                    }
                }
                self.check_ready();
            }
        }
        Ok(())
    }

    fn check_ready(&mut self) {
        if self.dispatcher.poll_ready(&mut self.collab) {
            info!(id = self.id().unwrap_or_default(), "Ready");
            self.emit(ClientEvent::Ready);
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .field("dispatcher", &self.dispatcher)
            .field("queue", &self.queue)
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlink_core::{ChunkData, ChunkMap, WorldParams};
    use voxlink_net::MessageType;

    fn client_with_chunk() -> Client {
        let params = WorldParams {
            chunk_size: 4,
            max_height: 4,
            ..WorldParams::default()
        };
        let mut store = ChunkMap::with_params(params.clone());
        store.insert(ChunkData {
            coord: ChunkCoord::new(0, 0),
            voxels: vec![0; params.chunk_volume()],
            lights: vec![0; params.chunk_volume()],
            ..ChunkData::default()
        });
        Client::new(
            ClientConfig::default(),
            Collaborators {
                chunks: Box::new(store),
                ..Collaborators::default()
            },
        )
    }

    #[test]
    fn speculative_edit_remembers_replaced_block() {
        let mut client = client_with_chunk();
        let voxel = VoxelCoord::new(1, 1, 1);

        client.update_voxel(1, 1, 1, 5);
        assert!(client.block_cache().get(voxel).is_none(), "air is not cached");

        client.update_voxel(1, 1, 1, 0);
        assert_eq!(client.block_cache().get(voxel), Some(5));
        assert_eq!(client.chunks().raw_value(voxel), Some(0));
        assert_eq!(client.chunk_queue().to_update_len(), 2);
    }

    #[test]
    fn frame_while_disconnected_keeps_requests() {
        let mut client = client_with_chunk();
        assert!(client.request_chunk(ChunkCoord::new(1, 0)));
        assert!(!client.request_chunk(ChunkCoord::new(0, 0)), "already loaded");

        client.queue(Message::chat("chat", "me", "hi"));
        client.frame().expect("frame");

        assert_eq!(client.chunk_queue().to_request_len(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_while_disconnected_does_not_panic() {
        let client = client_with_chunk();
        let result = client.send(&Message::new(MessageType::Chat));
        assert!(matches!(result, Err(ClientError::Send(_))));
    }

    #[test]
    fn zero_budgets_still_drain() {
        let config = ClientConfig {
            max_requests_per_frame: 0,
            max_process_per_frame: 0,
            max_updates_per_frame: 0,
            ..ClientConfig::default()
        };
        let budget = config.budget();
        assert_eq!((budget.requests, budget.process, budget.updates), (1, 1, 1));

        let mut client = Client::new(config, Collaborators::default());
        client.queue.on_payload_received(
            ChunkData {
                coord: ChunkCoord::new(3, 3),
                ..ChunkData::default()
            },
            ChunkMode::Fresh,
        );
        client.frame().expect("frame");
        assert_eq!(client.chunk_queue().to_process_len(), 0);
        assert!(client.chunks().contains(ChunkCoord::new(3, 3)));
    }

    #[test]
    fn unload_drops_local_chunk() {
        let mut client = client_with_chunk();
        assert!(client.unload_chunk(ChunkCoord::new(0, 0)));
        assert!(!client.chunks().contains(ChunkCoord::new(0, 0)));
        assert!(!client.unload_chunk(ChunkCoord::new(0, 0)));
    }

    #[test]
    fn configured_id_is_established_up_front() {
        let client = Client::new(
            ClientConfig {
                connection: ConnectionConfig {
                    client_id: Some("abc".to_string()),
                    ..ConnectionConfig::default()
                },
                ..ClientConfig::default()
            },
            Collaborators::default(),
        );
        assert_eq!(client.id(), Some("abc"));
        assert_eq!(client.client_id(), "abc");
    }
}

//! Collaborators that record what the engine did to them.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use voxlink_client::{
    AssetLoader, BlockBreak, BlockRegistry, ChatSink, Collaborators, EntitySink, ParticleSink,
    PeerRegistry,
};
use voxlink_core::{ChunkMap, ChunkStore, VoxelCoord};
use voxlink_net::{ChatMessage, EntityDelta, PeerInfo};

/// Everything recorded so far.
#[derive(Debug, Default)]
pub struct Recorded {
    /// Peers currently registered, by id.
    pub peers: BTreeMap<String, PeerInfo>,
    /// Peer registry calls in order (`add:<id>`, `remove:<id>`, `update:<id>`, `reset`).
    pub peer_log: Vec<String>,
    /// Chat lines received.
    pub chat: Vec<ChatMessage>,
    /// Particle batches with their per-block count.
    pub particles: Vec<(Vec<BlockBreak>, u32)>,
    /// Block registry loads (`blocks`, `ranges`).
    pub registry_loads: Vec<(Value, Value)>,
    /// Entity deltas in order.
    pub entities: Vec<EntityDelta>,
}

/// Shared recording double for every sink-like collaborator.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    /// Fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the recorded calls.
    pub fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collaborators wired to this recorder, an empty chunk store and
    /// already-loaded assets.
    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with(ChunkMap::new(), AssetGate::new(true))
    }

    /// Collaborators wired to this recorder with an explicit store and asset gate.
    pub fn collaborators_with(
        &self,
        chunks: impl ChunkStore + Send + 'static,
        assets: AssetGate,
    ) -> Collaborators {
        Collaborators {
            peers: Box::new(self.clone()),
            chat: Box::new(self.clone()),
            chunks: Box::new(chunks),
            block_cache: Box::new(HashMap::<VoxelCoord, u32>::new()),
            assets: Box::new(assets),
            particles: Box::new(self.clone()),
            registry: Box::new(self.clone()),
            entities: Box::new(self.clone()),
        }
    }
}

impl PeerRegistry for Recorder {
    fn add_peer(&mut self, peer: &PeerInfo) {
        let mut recorded = self.recorded();
        recorded.peer_log.push(format!("add:{}", peer.id));
        recorded.peers.insert(peer.id.clone(), peer.clone());
    }

    fn remove_peer(&mut self, id: &str) {
        let mut recorded = self.recorded();
        recorded.peer_log.push(format!("remove:{id}"));
        recorded.peers.remove(id);
    }

    fn update_peer(&mut self, peer: &PeerInfo) {
        let mut recorded = self.recorded();
        recorded.peer_log.push(format!("update:{}", peer.id));
        recorded.peers.insert(peer.id.clone(), peer.clone());
    }

    fn reset(&mut self) {
        let mut recorded = self.recorded();
        recorded.peer_log.push("reset".to_string());
        recorded.peers.clear();
    }
}

impl ChatSink for Recorder {
    fn add(&mut self, message: &ChatMessage) {
        self.recorded().chat.push(message.clone());
    }
}

impl ParticleSink for Recorder {
    fn add_break_particles(&mut self, breaks: &[BlockBreak], count: u32) {
        self.recorded().particles.push((breaks.to_vec(), count));
    }
}

impl BlockRegistry for Recorder {
    fn load(&mut self, blocks: &Value, ranges: &Value) {
        self.recorded()
            .registry_loads
            .push((blocks.clone(), ranges.clone()));
    }
}

impl EntitySink for Recorder {
    fn apply(&mut self, delta: &EntityDelta) {
        self.recorded().entities.push(delta.clone());
    }
}

/// Asset loader whose completion is flipped by the test.
#[derive(Debug, Clone)]
pub struct AssetGate(Arc<AtomicBool>);

impl AssetGate {
    /// Gate starting in the given state.
    pub fn new(loaded: bool) -> Self {
        Self(Arc::new(AtomicBool::new(loaded)))
    }

    /// Mark assets as loaded.
    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl AssetLoader for AssetGate {
    fn is_loaded(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

//! Interfaces of the subsystems the sync engine feeds.
//!
//! Rendering, chat UI, particles and the block registry live outside this
//! crate; the engine only talks to them through these traits.

use crate::reconciler::BlockBreak;
use serde_json::Value;
use std::collections::HashMap;
use voxlink_core::{ChunkMap, ChunkStore, VoxelCoord};
use voxlink_net::{ChatMessage, EntityDelta, PeerInfo};

/// Presence of other connected clients.
pub trait PeerRegistry: Send {
    /// A peer appeared.
    fn add_peer(&mut self, peer: &PeerInfo);
    /// A peer left.
    fn remove_peer(&mut self, id: &str);
    /// A peer's state changed.
    fn update_peer(&mut self, peer: &PeerInfo);
    /// Forget every peer (the connection dropped).
    fn reset(&mut self);
}

/// Chat history.
pub trait ChatSink: Send {
    /// Append a chat line.
    fn add(&mut self, message: &ChatMessage);
}

/// Block types overwritten by local, not yet confirmed edits.
pub trait BlockCache: Send {
    /// Block id remembered for a voxel.
    fn get(&self, voxel: VoxelCoord) -> Option<u32>;
    /// Remember the block id a local edit replaced.
    fn insert(&mut self, voxel: VoxelCoord, block_id: u32);
    /// Forget a voxel, returning what was remembered.
    fn delete(&mut self, voxel: VoxelCoord) -> Option<u32>;
}

impl BlockCache for HashMap<VoxelCoord, u32> {
    fn get(&self, voxel: VoxelCoord) -> Option<u32> {
        HashMap::get(self, &voxel).copied()
    }

    fn insert(&mut self, voxel: VoxelCoord, block_id: u32) {
        HashMap::insert(self, voxel, block_id);
    }

    fn delete(&mut self, voxel: VoxelCoord) -> Option<u32> {
        self.remove(&voxel)
    }
}

/// Texture and model loading.
pub trait AssetLoader: Send {
    /// Whether every asset has finished loading.
    fn is_loaded(&self) -> bool;
}

/// Break-particle effects.
pub trait ParticleSink: Send {
    /// Spawn particles for a batch of removed blocks, `count` per block.
    fn add_break_particles(&mut self, breaks: &[BlockBreak], count: u32);
}

/// Block definitions announced by the server.
pub trait BlockRegistry: Send {
    /// Load block definitions and texture ranges from the `INIT` payload.
    fn load(&mut self, blocks: &Value, ranges: &Value);
}

/// Server-driven entity state.
pub trait EntitySink: Send {
    /// Apply one entity delta.
    fn apply(&mut self, delta: &EntityDelta);
}

/// Collaborator that drops everything it is given and reports assets as loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl PeerRegistry for Discard {
    fn add_peer(&mut self, _peer: &PeerInfo) {}
    fn remove_peer(&mut self, _id: &str) {}
    fn update_peer(&mut self, _peer: &PeerInfo) {}
    fn reset(&mut self) {}
}

impl ChatSink for Discard {
    fn add(&mut self, _message: &ChatMessage) {}
}

impl AssetLoader for Discard {
    fn is_loaded(&self) -> bool {
        true
    }
}

impl ParticleSink for Discard {
    fn add_break_particles(&mut self, _breaks: &[BlockBreak], _count: u32) {}
}

impl BlockRegistry for Discard {
    fn load(&mut self, _blocks: &Value, _ranges: &Value) {}
}

impl EntitySink for Discard {
    fn apply(&mut self, _delta: &EntityDelta) {}
}

/// Everything the engine reads from or writes to.
pub struct Collaborators {
    /// Peer presence.
    pub peers: Box<dyn PeerRegistry>,
    /// Chat history.
    pub chat: Box<dyn ChatSink>,
    /// Loaded chunks.
    pub chunks: Box<dyn ChunkStore + Send>,
    /// Speculative edit cache.
    pub block_cache: Box<dyn BlockCache>,
    /// Asset loading state.
    pub assets: Box<dyn AssetLoader>,
    /// Particle effects.
    pub particles: Box<dyn ParticleSink>,
    /// Block definitions.
    pub registry: Box<dyn BlockRegistry>,
    /// Entity state.
    pub entities: Box<dyn EntitySink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            peers: Box::new(Discard),
            chat: Box::new(Discard),
            chunks: Box::new(ChunkMap::new()),
            block_cache: Box::new(HashMap::<VoxelCoord, u32>::new()),
            assets: Box::new(Discard),
            particles: Box::new(Discard),
            registry: Box::new(Discard),
            entities: Box::new(Discard),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("assets_loaded", &self.assets.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashmap_cache_consumes_entries() {
        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        let voxel = VoxelCoord::new(1, 2, 3);
        BlockCache::insert(&mut cache, voxel, 5);
        assert_eq!(BlockCache::get(&cache, voxel), Some(5));
        assert_eq!(cache.delete(voxel), Some(5));
        assert_eq!(cache.delete(voxel), None);
    }
}

//! Chunk payloads and the local chunk store.

use crate::coords::{ChunkCoord, VoxelCoord};
use crate::WorldParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Precomputed geometry for one mesh level of a chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshGeometry {
    /// Vertical sub-mesh level the geometry belongs to.
    pub level: u32,
    /// Block id the geometry was built for (one geometry per material).
    pub voxel: u32,
    /// Vertex positions, three floats per vertex.
    pub positions: Vec<f32>,
    /// Triangle indices.
    pub indices: Vec<u32>,
    /// Texture coordinates, two floats per vertex.
    pub uvs: Vec<f32>,
    /// Packed per-vertex light values.
    pub lights: Vec<u32>,
}

/// Server-provided chunk: raw voxel/light arrays plus prebuilt geometry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkData {
    /// Grid coordinate of the chunk.
    pub coord: ChunkCoord,
    /// Opaque server identifier.
    pub id: String,
    /// Raw voxel values, one `u32` per voxel. Empty when the server only sent geometry.
    pub voxels: Vec<u32>,
    /// Raw light values, one `u32` per voxel. Empty when the server only sent geometry.
    pub lights: Vec<u32>,
    /// Mesh geometry per level.
    pub meshes: Vec<MeshGeometry>,
}

impl ChunkData {
    /// Merge an update-mode payload into this chunk.
    ///
    /// Raw arrays are replaced only when the update carries them; meshes are
    /// replaced level by level.
    pub fn apply_patch(&mut self, patch: ChunkData) {
        if !patch.id.is_empty() {
            self.id = patch.id;
        }
        if !patch.voxels.is_empty() {
            self.voxels = patch.voxels;
        }
        if !patch.lights.is_empty() {
            self.lights = patch.lights;
        }
        let levels: Vec<u32> = patch.meshes.iter().map(|mesh| mesh.level).collect();
        self.meshes.retain(|mesh| !levels.contains(&mesh.level));
        self.meshes.extend(patch.meshes);
        self.meshes.sort_by_key(|mesh| mesh.level);
    }
}

/// Coordinate-keyed chunk storage read and written by the sync engine.
///
/// Only `chunk`/`chunk_mut`/`insert`/`remove` and the parameter accessors are
/// required; the raw voxel accessors are derived from them.
pub trait ChunkStore {
    /// Apply world parameters received from the server.
    fn configure(&mut self, params: WorldParams);

    /// Current world parameters.
    fn params(&self) -> &WorldParams;

    /// Look up a loaded chunk.
    fn chunk(&self, coord: ChunkCoord) -> Option<&ChunkData>;

    /// Mutable lookup of a loaded chunk.
    fn chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut ChunkData>;

    /// Store a fresh chunk, replacing any previous data at its coordinate.
    fn insert(&mut self, data: ChunkData);

    /// Drop a chunk.
    fn remove(&mut self, coord: ChunkCoord) -> Option<ChunkData>;

    /// Whether a chunk is loaded.
    fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunk(coord).is_some()
    }

    /// Merge an update-mode chunk into the loaded one. Returns `false` when the
    /// chunk is not loaded.
    fn patch(&mut self, data: ChunkData) -> bool {
        match self.chunk_mut(data.coord) {
            Some(chunk) => {
                chunk.apply_patch(data);
                true
            }
            None => false,
        }
    }

    /// Chunk owning a world voxel.
    fn chunk_by_voxel(&self, voxel: VoxelCoord) -> Option<&ChunkData> {
        self.chunk(voxel.chunk(self.params().chunk_size))
    }

    /// Raw voxel value at a world position, `None` when the chunk is not loaded.
    fn raw_value(&self, voxel: VoxelCoord) -> Option<u32> {
        let index = self.local_index(voxel)?;
        self.chunk_by_voxel(voxel)?.voxels.get(index).copied()
    }

    /// Raw light value at a world position, `None` when the chunk is not loaded.
    fn raw_light(&self, voxel: VoxelCoord) -> Option<u32> {
        let index = self.local_index(voxel)?;
        self.chunk_by_voxel(voxel)?.lights.get(index).copied()
    }

    /// Overwrite a raw voxel value. Returns `false` when nothing was written.
    fn set_raw_value(&mut self, voxel: VoxelCoord, value: u32) -> bool {
        let Some(index) = self.local_index(voxel) else {
            return false;
        };
        let coord = voxel.chunk(self.params().chunk_size);
        match self.chunk_mut(coord).and_then(|c| c.voxels.get_mut(index)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Overwrite a raw light value. Returns `false` when nothing was written.
    fn set_raw_light(&mut self, voxel: VoxelCoord, value: u32) -> bool {
        let Some(index) = self.local_index(voxel) else {
            return false;
        };
        let coord = voxel.chunk(self.params().chunk_size);
        match self.chunk_mut(coord).and_then(|c| c.lights.get_mut(index)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Flat array index for a world voxel under the current parameters.
    fn local_index(&self, voxel: VoxelCoord) -> Option<usize> {
        let params = self.params();
        voxel.local_index(params.chunk_size, params.max_height)
    }
}

/// In-memory [`ChunkStore`] backed by a hash map.
#[derive(Debug, Default)]
pub struct ChunkMap {
    params: WorldParams,
    chunks: HashMap<ChunkCoord, ChunkData>,
}

impl ChunkMap {
    /// Create an empty store with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with explicit parameters.
    pub fn with_params(params: WorldParams) -> Self {
        Self {
            params,
            chunks: HashMap::new(),
        }
    }

    /// Number of loaded chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk is loaded.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Coordinates of all loaded chunks.
    pub fn coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.keys().copied()
    }

    /// Drop every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

impl ChunkStore for ChunkMap {
    fn configure(&mut self, params: WorldParams) {
        self.params = params;
    }

    fn params(&self) -> &WorldParams {
        &self.params
    }

    fn chunk(&self, coord: ChunkCoord) -> Option<&ChunkData> {
        self.chunks.get(&coord)
    }

    fn chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut ChunkData> {
        self.chunks.get_mut(&coord)
    }

    fn insert(&mut self, data: ChunkData) {
        self.chunks.insert(data.coord, data);
    }

    fn remove(&mut self, coord: ChunkCoord) -> Option<ChunkData> {
        self.chunks.remove(&coord)
    }
}

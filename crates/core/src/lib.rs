#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod chunk;
pub mod coords;
pub mod voxel;

pub use chunk::{ChunkData, ChunkMap, ChunkStore, MeshGeometry};
pub use coords::{ChunkCoord, VoxelCoord};
pub use voxel::{LightLevels, VoxelUpdate};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted horizontal chunk edge.
pub const MAX_CHUNK_SIZE: u32 = 1024;
/// Largest accepted chunk height.
pub const MAX_CHUNK_HEIGHT: u32 = 4096;

/// World parameters the client refuses to adopt.
#[derive(Debug, Error)]
pub enum ParamsError {
    /// The object did not deserialize.
    #[error("malformed world parameters: {0}")]
    Json(#[from] serde_json::Error),
    /// `chunkSize` is zero or too large.
    #[error("chunk size {0} outside 1..={MAX_CHUNK_SIZE}")]
    ChunkSize(u32),
    /// `maxHeight` is zero or too large.
    #[error("max height {0} outside 1..={MAX_CHUNK_HEIGHT}")]
    MaxHeight(u32),
}

/// World-wide parameters announced by the server in the `INIT` message.
///
/// Field names follow the server's camelCase JSON so the `params` object can be
/// deserialized directly. Missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldParams {
    /// Horizontal chunk edge length in voxels.
    pub chunk_size: u32,
    /// Vertical extent of every chunk in voxels.
    pub max_height: u32,
    /// Highest light level a voxel can carry.
    pub max_light_level: u32,
    /// Smallest chunk coordinate the server will serve.
    pub min_chunk: [i32; 2],
    /// Largest chunk coordinate the server will serve.
    pub max_chunk: [i32; 2],
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            max_height: 256,
            max_light_level: 15,
            min_chunk: [i32::MIN + 1, i32::MIN + 1],
            max_chunk: [i32::MAX - 1, i32::MAX - 1],
        }
    }
}

impl WorldParams {
    /// Parse the `params` object of an `INIT` payload.
    ///
    /// Sizes must be nonzero and within [`MAX_CHUNK_SIZE`] and
    /// [`MAX_CHUNK_HEIGHT`]; callers keep their previous parameters otherwise.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ParamsError> {
        let params: Self = serde_json::from_value(value.clone())?;
        if params.chunk_size == 0 || params.chunk_size > MAX_CHUNK_SIZE {
            return Err(ParamsError::ChunkSize(params.chunk_size));
        }
        if params.max_height == 0 || params.max_height > MAX_CHUNK_HEIGHT {
            return Err(ParamsError::MaxHeight(params.max_height));
        }
        Ok(params)
    }

    /// Number of voxels stored per chunk.
    pub fn chunk_volume(&self) -> usize {
        self.chunk_size as usize * self.chunk_size as usize * self.max_height as usize
    }

    /// Whether a chunk coordinate falls inside the served world bounds.
    pub fn contains_chunk(&self, coord: ChunkCoord) -> bool {
        coord.x >= self.min_chunk[0]
            && coord.x <= self.max_chunk[0]
            && coord.z >= self.min_chunk[1]
            && coord.z <= self.max_chunk[1]
    }
}

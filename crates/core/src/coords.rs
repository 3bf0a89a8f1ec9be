//! Chunk and voxel coordinate types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chunk coordinate (X,Z) in chunk space.
/// Implements Ord for deterministic iteration in BTreeMap/BTreeSet (sorts by x, then z).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ChunkCoord {
    /// Chunk column along X.
    pub x: i32,
    /// Chunk column along Z.
    pub z: i32,
}

impl ChunkCoord {
    /// Create a chunk coordinate.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the given world voxel column.
    pub fn from_voxel(vx: i32, vz: i32, chunk_size: u32) -> Self {
        let size = chunk_size.max(1) as i32;
        Self {
            x: vx.div_euclid(size),
            z: vz.div_euclid(size),
        }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.x, self.z)
    }
}

impl From<[i32; 2]> for ChunkCoord {
    fn from([x, z]: [i32; 2]) -> Self {
        Self { x, z }
    }
}

/// World-space voxel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoxelCoord {
    /// World X.
    pub x: i32,
    /// World Y (0 is the bottom of every chunk).
    pub y: i32,
    /// World Z.
    pub z: i32,
}

impl VoxelCoord {
    /// Create a voxel coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Chunk that owns this voxel.
    pub fn chunk(self, chunk_size: u32) -> ChunkCoord {
        ChunkCoord::from_voxel(self.x, self.z, chunk_size)
    }

    /// Flat index into a chunk's raw arrays, or `None` when the voxel lies
    /// outside the vertical range or the chunk dimensions are degenerate.
    ///
    /// Layout is `[x][y][z]` with `z` varying fastest.
    pub fn local_index(self, chunk_size: u32, max_height: u32) -> Option<usize> {
        if self.y < 0 || i64::from(self.y) >= i64::from(max_height) {
            return None;
        }
        let size = i32::try_from(chunk_size).ok().filter(|size| *size > 0)?;
        let lx = self.x.rem_euclid(size) as usize;
        let lz = self.z.rem_euclid(size) as usize;
        let ly = self.y as usize;
        let size = size as usize;
        let height = usize::try_from(max_height).ok()?;
        lx.checked_mul(height)?
            .checked_mul(size)?
            .checked_add(ly.checked_mul(size)?)?
            .checked_add(lz)
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.x, self.y, self.z)
    }
}

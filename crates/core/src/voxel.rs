//! Raw voxel and light bit packing.
//!
//! Every voxel is a single `u32`:
//!
//! | bits  | meaning     |
//! |-------|-------------|
//! | 0-15  | block id    |
//! | 16-19 | rotation    |
//! | 20-23 | y-rotation  |
//! | 24-27 | stage       |
//!
//! Light values pack four 4-bit channels: sunlight (12-15), red (8-11),
//! green (4-7) and blue (0-3).

use crate::coords::VoxelCoord;
use serde::{Deserialize, Serialize};

/// Reserved block id for air. A voxel value of zero means "removed".
pub const AIR: u32 = 0;

const ID_MASK: u32 = 0xFFFF;
const NIBBLE: u32 = 0xF;

/// Block id stored in a raw voxel value.
#[inline]
pub fn block_id(raw: u32) -> u32 {
    raw & ID_MASK
}

/// Replace the block id of a raw voxel value, keeping rotation and stage.
#[inline]
pub fn with_block_id(raw: u32, id: u32) -> u32 {
    (raw & !ID_MASK) | (id & ID_MASK)
}

/// Rotation nibble.
#[inline]
pub fn rotation(raw: u32) -> u32 {
    (raw >> 16) & NIBBLE
}

/// Y-rotation nibble.
#[inline]
pub fn y_rotation(raw: u32) -> u32 {
    (raw >> 20) & NIBBLE
}

/// Growth/animation stage nibble.
#[inline]
pub fn stage(raw: u32) -> u32 {
    (raw >> 24) & NIBBLE
}

/// Assemble a raw voxel value.
#[inline]
pub fn pack_voxel(id: u32, rotation: u32, y_rotation: u32, stage: u32) -> u32 {
    (id & ID_MASK)
        | ((rotation & NIBBLE) << 16)
        | ((y_rotation & NIBBLE) << 20)
        | ((stage & NIBBLE) << 24)
}

/// Unpacked light channels of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightLevels {
    /// Sunlight level.
    pub sunlight: u32,
    /// Red torch light level.
    pub red: u32,
    /// Green torch light level.
    pub green: u32,
    /// Blue torch light level.
    pub blue: u32,
}

impl LightLevels {
    /// Decode a raw light value.
    pub fn unpack(raw: u32) -> Self {
        Self {
            sunlight: (raw >> 12) & NIBBLE,
            red: (raw >> 8) & NIBBLE,
            green: (raw >> 4) & NIBBLE,
            blue: raw & NIBBLE,
        }
    }

    /// Encode into a raw light value.
    pub fn pack(self) -> u32 {
        ((self.sunlight & NIBBLE) << 12)
            | ((self.red & NIBBLE) << 8)
            | ((self.green & NIBBLE) << 4)
            | (self.blue & NIBBLE)
    }
}

/// A single authoritative (or speculative) voxel edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelUpdate {
    /// World X.
    pub vx: i32,
    /// World Y.
    pub vy: i32,
    /// World Z.
    pub vz: i32,
    /// New raw voxel value; zero means the voxel was removed.
    pub voxel: u32,
    /// New raw light value.
    pub light: u32,
}

impl VoxelUpdate {
    /// Create an update that only carries a voxel value.
    pub fn voxel(vx: i32, vy: i32, vz: i32, voxel: u32) -> Self {
        Self {
            vx,
            vy,
            vz,
            voxel,
            light: 0,
        }
    }

    /// Position of the edited voxel.
    pub fn coord(&self) -> VoxelCoord {
        VoxelCoord::new(self.vx, self.vy, self.vz)
    }

    /// Whether this update removes the voxel.
    pub fn is_removal(&self) -> bool {
        self.voxel == AIR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_fields_roundtrip_through_packing() {
        let raw = pack_voxel(513, 3, 7, 2);
        assert_eq!(block_id(raw), 513);
        assert_eq!(rotation(raw), 3);
        assert_eq!(y_rotation(raw), 7);
        assert_eq!(stage(raw), 2);
    }

    #[test]
    fn with_block_id_keeps_metadata() {
        let raw = pack_voxel(1, 4, 5, 6);
        let swapped = with_block_id(raw, 99);
        assert_eq!(block_id(swapped), 99);
        assert_eq!(rotation(swapped), 4);
        assert_eq!(stage(swapped), 6);
    }

    #[test]
    fn light_levels_pack_into_nibbles() {
        let levels = LightLevels {
            sunlight: 15,
            red: 1,
            green: 2,
            blue: 3,
        };
        assert_eq!(levels.pack(), 0xF123);
        assert_eq!(LightLevels::unpack(0xF123), levels);
    }

    #[test]
    fn zero_voxel_is_removal() {
        assert!(VoxelUpdate::voxel(1, 0, 1, 0).is_removal());
        assert!(!VoxelUpdate::voxel(1, 0, 1, pack_voxel(0, 1, 0, 0)).is_removal());
    }
}

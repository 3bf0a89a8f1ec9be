//! Authoritative voxel edits against local chunk data.

use crate::collaborators::{BlockCache, ParticleSink};
use std::collections::HashSet;
use tracing::{debug, trace};
use voxlink_core::voxel::{block_id, AIR};
use voxlink_core::{ChunkStore, VoxelCoord, VoxelUpdate};

/// Batches larger than this get the reduced particle count.
pub const BULK_BREAK_THRESHOLD: usize = 3;

/// Particles per block for bulk breaks.
pub const BULK_BREAK_PARTICLES: u32 = 1;

/// Particles per block for small breaks.
pub const SINGLE_BREAK_PARTICLES: u32 = 12;

/// A block that an update removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBreak {
    /// Where the block was.
    pub voxel: VoxelCoord,
    /// What the block was.
    pub block_id: u32,
}

/// Particle count hint for a batch of `breaks` removals.
pub fn particle_count(breaks: usize) -> u32 {
    if breaks > BULK_BREAK_THRESHOLD {
        BULK_BREAK_PARTICLES
    } else {
        SINGLE_BREAK_PARTICLES
    }
}

/// Work out what every removal update removed.
///
/// A speculative cache entry wins over the live chunk value; either way the
/// cache entry is consumed. A voxel removed more than once in the batch
/// breaks once. Must run before the updates are applied.
pub fn derive_breaks(
    updates: &[VoxelUpdate],
    cache: &mut dyn BlockCache,
    store: &dyn ChunkStore,
) -> Vec<BlockBreak> {
    let mut seen = HashSet::new();
    updates
        .iter()
        .filter(|update| update.is_removal())
        .filter(|update| seen.insert(update.coord()))
        .filter_map(|update| {
            let voxel = update.coord();
            let cached = cache.get(voxel);
            cache.delete(voxel);

            let previous = cached
                .or_else(|| store.raw_value(voxel).map(block_id))
                .unwrap_or(AIR);
            (previous != AIR).then_some(BlockBreak {
                voxel,
                block_id: previous,
            })
        })
        .collect()
}

/// Write voxel and light values into loaded chunks, in order.
///
/// Returns how many updates landed in a loaded chunk.
pub fn apply_updates(updates: &[VoxelUpdate], store: &mut dyn ChunkStore) -> usize {
    let mut applied = 0;
    for update in updates {
        let voxel = update.coord();
        let wrote_voxel = store.set_raw_value(voxel, update.voxel);
        let wrote_light = store.set_raw_light(voxel, update.light);
        if wrote_voxel || wrote_light {
            applied += 1;
        } else {
            trace!(%voxel, "Update for unloaded voxel skipped");
        }
    }
    applied
}

/// Particles first (they need the pre-edit state), then storage.
pub fn reconcile(
    updates: &[VoxelUpdate],
    cache: &mut dyn BlockCache,
    store: &mut dyn ChunkStore,
    particles: &mut dyn ParticleSink,
) {
    let breaks = derive_breaks(updates, cache, store);
    if !breaks.is_empty() {
        particles.add_break_particles(&breaks, particle_count(breaks.len()));
    }
    let applied = apply_updates(updates, store);
    debug!(
        updates = updates.len(),
        applied,
        breaks = breaks.len(),
        "Voxel updates reconciled"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use voxlink_core::voxel::pack_voxel;
    use voxlink_core::{ChunkCoord, ChunkData, ChunkMap, WorldParams};

    #[derive(Default)]
    struct Particles(Vec<(Vec<BlockBreak>, u32)>);

    impl ParticleSink for Particles {
        fn add_break_particles(&mut self, breaks: &[BlockBreak], count: u32) {
            self.0.push((breaks.to_vec(), count));
        }
    }

    fn loaded_store() -> ChunkMap {
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
        store
    }

    #[test]
    fn cached_type_wins_and_is_consumed() {
        let mut store = loaded_store();
        let voxel = VoxelCoord::new(1, 0, 1);
        store.set_raw_value(voxel, 3);

        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        BlockCache::insert(&mut cache, voxel, 7);
        let mut particles = Particles::default();

        reconcile(
            &[VoxelUpdate::voxel(1, 0, 1, 0)],
            &mut cache,
            &mut store,
            &mut particles,
        );

        assert_eq!(
            particles.0,
            vec![(vec![BlockBreak { voxel, block_id: 7 }], SINGLE_BREAK_PARTICLES)]
        );
        assert!(BlockCache::get(&cache, voxel).is_none());
        assert_eq!(store.raw_value(voxel), Some(0));
    }

    #[test]
    fn live_value_used_without_cache_entry() {
        let mut store = loaded_store();
        let voxel = VoxelCoord::new(2, 1, 0);
        store.set_raw_value(voxel, pack_voxel(42, 2, 0, 0));

        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        let breaks = derive_breaks(&[VoxelUpdate::voxel(2, 1, 0, 0)], &mut cache, &store);
        assert_eq!(breaks, vec![BlockBreak { voxel, block_id: 42 }]);
    }

    #[test]
    fn repeated_removal_breaks_once() {
        let mut store = loaded_store();
        let voxel = VoxelCoord::new(1, 0, 1);
        store.set_raw_value(voxel, 3);

        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        BlockCache::insert(&mut cache, voxel, 7);
        let mut particles = Particles::default();

        reconcile(
            &[VoxelUpdate::voxel(1, 0, 1, 0), VoxelUpdate::voxel(1, 0, 1, 0)],
            &mut cache,
            &mut store,
            &mut particles,
        );

        assert_eq!(
            particles.0,
            vec![(vec![BlockBreak { voxel, block_id: 7 }], SINGLE_BREAK_PARTICLES)]
        );
    }

    #[test]
    fn unknown_voxel_falls_back_to_air() {
        let store = ChunkMap::new();
        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        let breaks = derive_breaks(&[VoxelUpdate::voxel(1, 0, 1, 0)], &mut cache, &store);
        assert!(breaks.is_empty());
    }

    #[test]
    fn placements_produce_no_particles() {
        let mut store = loaded_store();
        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        let mut particles = Particles::default();
        reconcile(
            &[VoxelUpdate {
                vx: 0,
                vy: 0,
                vz: 0,
                voxel: 5,
                light: 0xF000,
            }],
            &mut cache,
            &mut store,
            &mut particles,
        );
        assert!(particles.0.is_empty());
        assert_eq!(store.raw_value(VoxelCoord::new(0, 0, 0)), Some(5));
        assert_eq!(store.raw_light(VoxelCoord::new(0, 0, 0)), Some(0xF000));
    }

    #[test]
    fn bulk_breaks_use_reduced_count() {
        let mut store = loaded_store();
        let updates: Vec<_> = (0..4)
            .map(|x| {
                store.set_raw_value(VoxelCoord::new(x, 0, 0), 1);
                VoxelUpdate::voxel(x, 0, 0, 0)
            })
            .collect();
        let mut cache: HashMap<VoxelCoord, u32> = HashMap::new();
        let mut particles = Particles::default();

        reconcile(&updates, &mut cache, &mut store, &mut particles);

        assert_eq!(particles.0.len(), 1);
        assert_eq!(particles.0[0].0.len(), 4);
        assert_eq!(particles.0[0].1, BULK_BREAK_PARTICLES);
        assert_eq!(particle_count(3), SINGLE_BREAK_PARTICLES);
    }

    #[test]
    fn later_updates_to_same_voxel_win() {
        let mut store = loaded_store();
        let updates = [VoxelUpdate::voxel(0, 0, 0, 1), VoxelUpdate::voxel(0, 0, 0, 9)];
        assert_eq!(apply_updates(&updates, &mut store), 2);
        assert_eq!(store.raw_value(VoxelCoord::new(0, 0, 0)), Some(9));
    }
}

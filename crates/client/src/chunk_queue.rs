//! Chunk request and delivery bookkeeping.
//!
//! Coordinates move `to_request` -> (server) -> `to_process` -> chunk store,
//! while `requested` remembers everything in flight so repeat requests are
//! dropped. Everything is cleared when the connection goes away.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};
use voxlink_core::{ChunkCoord, ChunkData, ChunkStore, VoxelCoord, VoxelUpdate};
use voxlink_net::Message;

/// How a received chunk payload is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// New chunk from a `LOAD` reply; replaces whatever is stored.
    Fresh,
    /// Patch from an `UPDATE`; merged into the loaded chunk.
    Update,
}

/// Per-frame limits for [`ChunkQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainBudget {
    /// Coordinates packed into one `LOAD` request.
    pub requests: usize,
    /// Received payloads applied to the store.
    pub process: usize,
    /// Local voxel edits packed into one `UPDATE`.
    pub updates: usize,
}

/// Result of one drain step.
#[derive(Debug, Default)]
pub struct Drained {
    /// Messages to send, in order.
    pub outbound: Vec<Message>,
    /// Chunks that became ready for the scene.
    pub added: Vec<ChunkCoord>,
}

/// Chunk pipeline state.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    requested: HashSet<ChunkCoord>,
    to_request: VecDeque<ChunkCoord>,
    to_process: VecDeque<(ChunkData, ChunkMode)>,
    to_update: VecDeque<VoxelUpdate>,
    to_add: Vec<ChunkCoord>,
}

impl ChunkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a chunk. Returns `false` when it is already requested, already
    /// delivered, or outside the world.
    pub fn request_chunk(&mut self, coord: ChunkCoord, store: &dyn ChunkStore) -> bool {
        if self.requested.contains(&coord) || store.contains(coord) {
            return false;
        }
        if self
            .to_process
            .iter()
            .any(|(data, mode)| *mode == ChunkMode::Fresh && data.coord == coord)
        {
            return false;
        }
        if !store.params().contains_chunk(coord) {
            debug!(%coord, "Chunk outside world bounds not requested");
            return false;
        }

        self.requested.insert(coord);
        self.to_request.push_back(coord);
        trace!(%coord, "Chunk requested");
        true
    }

    /// Accept a payload from the server.
    pub fn on_payload_received(&mut self, data: ChunkData, mode: ChunkMode) {
        let coord = data.coord;
        if self.requested.remove(&coord) {
            self.to_request.retain(|pending| *pending != coord);
        }
        self.to_process.push_back((data, mode));
    }

    /// Remember a local voxel edit for the next `UPDATE`.
    pub fn queue_update(&mut self, update: VoxelUpdate) {
        self.to_update.push_back(update);
    }

    /// Apply received chunks and collect outbound requests, within `budget`.
    ///
    /// With `online` unset nothing is sent and pending requests stay queued.
    pub fn drain(&mut self, budget: DrainBudget, store: &mut dyn ChunkStore, online: bool) -> Drained {
        for _ in 0..budget.process {
            let Some((data, mode)) = self.to_process.pop_front() else {
                break;
            };
            let coord = data.coord;
            match mode {
                ChunkMode::Fresh => store.insert(data),
                ChunkMode::Update => {
                    if !store.patch(data) {
                        debug!(%coord, "Patch for unloaded chunk dropped");
                        continue;
                    }
                }
            }
            self.to_add.push(coord);
        }

        let mut drained = Drained {
            outbound: Vec::new(),
            added: std::mem::take(&mut self.to_add),
        };
        if !online {
            return drained;
        }

        let count = budget.requests.min(self.to_request.len());
        if count > 0 {
            let coords: Vec<ChunkCoord> = self.to_request.drain(..count).collect();
            debug!(chunks = coords.len(), "Requesting chunks");
            drained.outbound.push(Message::load_request(&coords));
        }

        let count = budget.updates.min(self.to_update.len());
        if count > 0 {
            let updates = collapse_updates(self.to_update.drain(..count));
            drained.outbound.push(Message::update(updates));
        }

        drained
    }

    /// Forget a chunk everywhere, including the store. Returns whether it was
    /// known at all.
    pub fn unload(&mut self, coord: ChunkCoord, store: &mut dyn ChunkStore) -> bool {
        let was_requested = self.requested.remove(&coord);
        self.to_request.retain(|pending| *pending != coord);
        let before = self.to_process.len();
        self.to_process.retain(|(data, _)| data.coord != coord);
        let was_pending = self.to_process.len() != before;
        self.to_add.retain(|added| *added != coord);
        let was_loaded = store.remove(coord).is_some();
        was_requested || was_pending || was_loaded
    }

    /// Drop all in-flight state.
    pub fn reset(&mut self) {
        debug!(
            requested = self.requested.len(),
            to_process = self.to_process.len(),
            to_update = self.to_update.len(),
            "Chunk queue reset"
        );
        self.requested.clear();
        self.to_request.clear();
        self.to_process.clear();
        self.to_update.clear();
        self.to_add.clear();
    }

    /// Whether a request for `coord` is in flight.
    pub fn is_requested(&self, coord: ChunkCoord) -> bool {
        self.requested.contains(&coord)
    }

    /// Coordinates requested and not yet delivered.
    pub fn requested_len(&self) -> usize {
        self.requested.len()
    }

    /// Requests not yet sent.
    pub fn to_request_len(&self) -> usize {
        self.to_request.len()
    }

    /// Payloads waiting to be applied.
    pub fn to_process_len(&self) -> usize {
        self.to_process.len()
    }

    /// Local edits waiting to be sent.
    pub fn to_update_len(&self) -> usize {
        self.to_update.len()
    }

    /// Whether nothing at all is pending.
    pub fn is_idle(&self) -> bool {
        self.requested.is_empty()
            && self.to_request.is_empty()
            && self.to_process.is_empty()
            && self.to_update.is_empty()
            && self.to_add.is_empty()
    }
}

/// Keep one update per voxel; the last write wins and keeps its first slot.
fn collapse_updates(updates: impl Iterator<Item = VoxelUpdate>) -> Vec<VoxelUpdate> {
    let mut slots: HashMap<VoxelCoord, usize> = HashMap::new();
    let mut collapsed: Vec<VoxelUpdate> = Vec::new();
    for update in updates {
        match slots.get(&update.coord()) {
            Some(&slot) => collapsed[slot] = update,
            None => {
                slots.insert(update.coord(), collapsed.len());
                collapsed.push(update);
            }
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlink_core::{ChunkMap, WorldParams};
    use voxlink_net::MessageType;

    const BUDGET: DrainBudget = DrainBudget {
        requests: 8,
        process: 8,
        updates: 8,
    };

    fn chunk(x: i32, z: i32) -> ChunkData {
        ChunkData {
            coord: ChunkCoord::new(x, z),
            id: format!("{x}|{z}"),
            ..ChunkData::default()
        }
    }

    #[test]
    fn repeated_requests_are_deduplicated() {
        let store = ChunkMap::new();
        let mut queue = ChunkQueue::new();
        let coord = ChunkCoord::new(1, 1);

        assert!(queue.request_chunk(coord, &store));
        assert!(!queue.request_chunk(coord, &store));
        assert_eq!(queue.requested_len(), 1);
        assert_eq!(queue.to_request_len(), 1);

        let mut store = store;
        let drained = queue.drain(BUDGET, &mut store, true);
        assert_eq!(drained.outbound.len(), 1);
        assert_eq!(drained.outbound[0].kind, MessageType::Load);
        assert_eq!(drained.outbound[0].requested_chunks(), vec![coord]);

        // Still in flight: no second request goes out.
        assert!(!queue.request_chunk(coord, &store));
        assert!(queue.drain(BUDGET, &mut store, true).outbound.is_empty());
    }

    #[test]
    fn payload_moves_from_requested_to_store() {
        let mut store = ChunkMap::new();
        let mut queue = ChunkQueue::new();
        let coord = ChunkCoord::new(0, 0);

        queue.request_chunk(coord, &store);
        queue.drain(BUDGET, &mut store, true);
        queue.on_payload_received(chunk(0, 0), ChunkMode::Fresh);
        assert!(!queue.is_requested(coord));
        assert_eq!(queue.to_process_len(), 1);

        let drained = queue.drain(BUDGET, &mut store, true);
        assert_eq!(drained.added, vec![coord]);
        assert!(store.contains(coord));
        assert!(!queue.request_chunk(coord, &store));
        assert!(queue.is_idle());
    }

    #[test]
    fn budgets_bound_each_drain() {
        let mut store = ChunkMap::new();
        let mut queue = ChunkQueue::new();
        for x in 0..5 {
            queue.request_chunk(ChunkCoord::new(x, 0), &store);
            queue.on_payload_received(chunk(x, 10), ChunkMode::Fresh);
        }
        let small = DrainBudget {
            requests: 2,
            process: 3,
            updates: 1,
        };

        let drained = queue.drain(small, &mut store, true);
        assert_eq!(drained.added.len(), 3);
        assert_eq!(drained.outbound[0].requested_chunks().len(), 2);
        assert_eq!(queue.to_request_len(), 3);
        assert_eq!(queue.to_process_len(), 2);
    }

    #[test]
    fn offline_drain_applies_but_does_not_send() {
        let mut store = ChunkMap::new();
        let mut queue = ChunkQueue::new();
        queue.request_chunk(ChunkCoord::new(3, 3), &store);
        queue.on_payload_received(chunk(4, 4), ChunkMode::Fresh);

        let drained = queue.drain(BUDGET, &mut store, false);
        assert!(drained.outbound.is_empty());
        assert_eq!(drained.added, vec![ChunkCoord::new(4, 4)]);
        assert_eq!(queue.to_request_len(), 1);
    }

    #[test]
    fn reset_clears_in_flight_state() {
        let mut store = ChunkMap::new();
        let mut queue = ChunkQueue::new();
        let coord = ChunkCoord::new(2, -2);
        queue.request_chunk(coord, &store);
        queue.request_chunk(ChunkCoord::new(9, 9), &store);
        queue.drain(BUDGET, &mut store, true);
        queue.on_payload_received(chunk(9, 9), ChunkMode::Fresh);
        queue.queue_update(VoxelUpdate::voxel(0, 0, 0, 1));

        queue.reset();

        assert_eq!(queue.requested_len(), 0);
        assert_eq!(queue.to_request_len(), 0);
        assert_eq!(queue.to_process_len(), 0);
        assert!(queue.is_idle());
        assert!(queue.request_chunk(coord, &store));
    }

    #[test]
    fn update_mode_patches_only_loaded_chunks() {
        let mut store = ChunkMap::new();
        store.insert(chunk(0, 0));
        let mut queue = ChunkQueue::new();

        let mut patch = chunk(0, 0);
        patch.id = "patched".to_string();
        queue.on_payload_received(patch, ChunkMode::Update);
        queue.on_payload_received(chunk(5, 5), ChunkMode::Update);

        let drained = queue.drain(BUDGET, &mut store, true);
        assert_eq!(drained.added, vec![ChunkCoord::new(0, 0)]);
        assert_eq!(store.chunk(ChunkCoord::new(0, 0)).unwrap().id, "patched");
        assert!(!store.contains(ChunkCoord::new(5, 5)));
    }

    #[test]
    fn out_of_bounds_chunks_are_not_requested() {
        let store = ChunkMap::with_params(WorldParams {
            min_chunk: [-1, -1],
            max_chunk: [1, 1],
            ..WorldParams::default()
        });
        let mut queue = ChunkQueue::new();
        assert!(!queue.request_chunk(ChunkCoord::new(2, 0), &store));
        assert!(queue.request_chunk(ChunkCoord::new(1, 1), &store));
    }

    #[test]
    fn unload_forgets_everywhere() {
        let mut store = ChunkMap::new();
        store.insert(chunk(1, 0));
        let mut queue = ChunkQueue::new();
        queue.request_chunk(ChunkCoord::new(2, 0), &store);

        assert!(queue.unload(ChunkCoord::new(1, 0), &mut store));
        assert!(queue.unload(ChunkCoord::new(2, 0), &mut store));
        assert!(!queue.unload(ChunkCoord::new(3, 0), &mut store));
        assert!(store.is_empty());
        assert_eq!(queue.to_request_len(), 0);
    }

    #[test]
    fn pending_edits_collapse_per_voxel() {
        let mut store = ChunkMap::new();
        let mut queue = ChunkQueue::new();
        queue.queue_update(VoxelUpdate::voxel(0, 0, 0, 1));
        queue.queue_update(VoxelUpdate::voxel(1, 0, 0, 2));
        queue.queue_update(VoxelUpdate::voxel(0, 0, 0, 3));

        let drained = queue.drain(BUDGET, &mut store, true);
        assert_eq!(drained.outbound.len(), 1);
        assert_eq!(
            drained.outbound[0].updates,
            vec![VoxelUpdate::voxel(0, 0, 0, 3), VoxelUpdate::voxel(1, 0, 0, 2)]
        );
    }
}

//! the client-side chunk store.
//!
//! the store is owned by the main task; workers only ever see snapshots. each
//! position moves through the streaming states: absent (never requested),
//! pending (requested, no data yet), then loaded with a mesh phase of
//! received / resident / dirty. generation counters order worker output
//! against edits so stale meshes are dropped instead of applied.

use std::collections::HashMap;

use carve_common::{
    chunk::{Chunk, ChunkPos, ChunkSource, CHUNK_AREA},
    prelude::*,
};

/// where a loaded chunk is in its (data → light → mesh) pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MeshPhase {
    /// has data, never meshed.
    Received,
    /// meshed at the current data generation.
    Resident,
    /// data changed since the last applied mesh.
    Dirty,
}

pub struct LoadedChunk {
    pub chunk: Chunk,
    pub phase: MeshPhase,
    /// bumped whenever cell data changes.
    pub data_generation: u64,
    /// generation of the last worker output applied to this chunk.
    pub applied_generation: u64,
    /// a lighting+meshing job is in flight for this chunk.
    pub inflight: bool,
    /// a preview remesh is wanted or in flight.
    pub preview_dirty: bool,
    /// skylight leaving the bottom of this chunk, for the chunk below.
    pub sunlight_out: Option<Box<[u8; CHUNK_AREA]>>,
}

impl std::fmt::Debug for ChunkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkSlot::Pending { attempts, .. } => {
                write!(f, "Pending({} attempts)", attempts)
            }
            ChunkSlot::Loaded(loaded) => write!(f, "Loaded({:?})", loaded.phase),
        }
    }
}

pub enum ChunkSlot {
    Pending { attempts: u32, requested_at: f64 },
    Loaded(LoadedChunk),
}

/// outcome of offering freshly received chunk data to the store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// the resident copy has seen a newer build sequence; the payload was
    /// stale and dropped.
    StaleSeq,
    /// the chunk is outside anything we track; the payload was dropped.
    Unwanted,
}

#[derive(Default)]
pub struct ChunkStore {
    slots: HashMap<ChunkPos, ChunkSlot>,
}

impl ChunkStore {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.slots.contains_key(&pos)
    }

    pub fn is_pending(&self, pos: ChunkPos) -> bool {
        matches!(self.slots.get(&pos), Some(ChunkSlot::Pending { .. }))
    }

    pub fn slot(&self, pos: ChunkPos) -> Option<&ChunkSlot> {
        self.slots.get(&pos)
    }

    pub fn loaded(&self, pos: ChunkPos) -> Option<&LoadedChunk> {
        match self.slots.get(&pos) {
            Some(ChunkSlot::Loaded(loaded)) => Some(loaded),
            _ => None,
        }
    }

    pub fn loaded_mut(&mut self, pos: ChunkPos) -> Option<&mut LoadedChunk> {
        match self.slots.get_mut(&pos) {
            Some(ChunkSlot::Loaded(loaded)) => Some(loaded),
            _ => None,
        }
    }

    pub fn mark_pending(&mut self, pos: ChunkPos, now: f64) {
        self.slots.entry(pos).or_insert(ChunkSlot::Pending {
            attempts: 1,
            requested_at: now,
        });
    }

    pub fn pending_mut(&mut self, pos: ChunkPos) -> Option<(&mut u32, &mut f64)> {
        match self.slots.get_mut(&pos) {
            Some(ChunkSlot::Pending { attempts, requested_at }) => Some((attempts, requested_at)),
            _ => None,
        }
    }

    /// accepts chunk data from the server. refuses to overwrite a resident
    /// chunk that has already observed a newer build sequence, so a slow
    /// column response can't roll back an applied commit.
    pub fn insert_chunk(&mut self, mut chunk: Chunk) -> InsertOutcome {
        match self.slots.get_mut(&chunk.pos()) {
            Some(ChunkSlot::Loaded(loaded)) => {
                if loaded.chunk.last_build_seq() > chunk.last_build_seq() {
                    return InsertOutcome::StaleSeq;
                }
                // carry staged preview edits across the replacement
                if let Some(preview) = loaded.chunk.preview() {
                    chunk.ensure_preview().copy_from_slice(preview);
                }
                loaded.chunk = chunk;
                loaded.data_generation += 1;
                loaded.phase = MeshPhase::Dirty;
                InsertOutcome::Inserted
            }
            Some(slot @ ChunkSlot::Pending { .. }) => {
                *slot = ChunkSlot::Loaded(LoadedChunk {
                    chunk,
                    phase: MeshPhase::Received,
                    data_generation: 1,
                    applied_generation: 0,
                    inflight: false,
                    preview_dirty: false,
                    sunlight_out: None,
                });
                InsertOutcome::Inserted
            }
            None => InsertOutcome::Unwanted,
        }
    }

    /// inserts a chunk without a prior request, used for give-up fallbacks.
    pub fn insert_chunk_forced(&mut self, chunk: Chunk) {
        let pos = chunk.pos();
        self.slots.insert(
            pos,
            ChunkSlot::Loaded(LoadedChunk {
                chunk,
                phase: MeshPhase::Received,
                data_generation: 1,
                applied_generation: 0,
                inflight: false,
                preview_dirty: false,
                sunlight_out: None,
            }),
        );
    }

    pub fn evict(&mut self, pos: ChunkPos) -> bool {
        self.slots.remove(&pos).is_some()
    }

    /// marks a chunk's data as changed: bumps its generation and flags it for
    /// relight + remesh.
    pub fn mark_dirty(&mut self, pos: ChunkPos) {
        if let Some(ChunkSlot::Loaded(loaded)) = self.slots.get_mut(&pos) {
            loaded.data_generation += 1;
            loaded.phase = MeshPhase::Dirty;
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.slots.keys().copied()
    }

    /// chunks that want a lighting+meshing job and don't have one in flight.
    pub fn needs_mesh(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.slots.iter().filter_map(|(&pos, slot)| match slot {
            ChunkSlot::Loaded(loaded)
                if !loaded.inflight
                    && matches!(loaded.phase, MeshPhase::Received | MeshPhase::Dirty) =>
            {
                Some(pos)
            }
            _ => None,
        })
    }

    pub fn needs_preview_mesh(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.slots.iter().filter_map(|(&pos, slot)| match slot {
            ChunkSlot::Loaded(loaded) if loaded.preview_dirty => Some(pos),
            _ => None,
        })
    }
}

impl ChunkSource for ChunkStore {
    fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.loaded(pos).map(|loaded| &loaded.chunk)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChunkLoaded(pub ChunkPos);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChunkUnloaded(pub ChunkPos);

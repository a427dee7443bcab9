//! the authoritative world state.
//!
//! the server owns the canonical copy of every chunk it has ever touched,
//! derives map tiles from them, and stamps every committed edit with the
//! global build sequence — the only ordering primitive clients ever see.
//! edits run through the exact same draw code as the clients, which is what
//! keeps both sides' cell data bit-identical.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use carve_common::{
    chunk::{Chunk, ChunkPos, CHUNK_LENGTH},
    edit::{draw_to_chunk, BuildTarget},
    lighting,
    net::{BuildIntent, ChunkDataMsg, ColumnChunk, ColumnResponse},
    palette::MaterialPalette,
    tile::{MapTile, TilePos},
    util::floor_div,
};

use crate::{config::ServerConfig, persist::BlobStore, prelude::*};

pub struct ServerWorld {
    config: ServerConfig,
    palette: Arc<MaterialPalette>,
    chunks: HashMap<ChunkPos, Chunk>,
    tiles: HashMap<TilePos, MapTile>,
    dirty_tiles: HashSet<TilePos>,
    build_seq: u32,
    blobs: Option<BlobStore>,
}

impl ServerWorld {
    pub fn new(config: ServerConfig, palette: Arc<MaterialPalette>) -> Result<Self> {
        let blobs = match &config.data_dir {
            Some(dir) => Some(BlobStore::open(dir)?),
            None => None,
        };
        Ok(Self {
            config,
            palette,
            chunks: HashMap::new(),
            tiles: HashMap::new(),
            dirty_tiles: HashSet::new(),
            build_seq: 0,
            blobs,
        })
    }

    pub fn build_seq(&self) -> u32 {
        self.build_seq
    }

    pub fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    pub fn resident_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// fallback terrain: a flat world surface, already sunlit so clients get
    /// sensible light values with the first payload.
    fn generate_chunk(&self, pos: ChunkPos) -> Chunk {
        let surface = self.config.fallback_surface_y;
        let mut chunk = Chunk::new(pos);
        chunk.generate_flat_global(surface, self.config.fallback_surface_material, lighting::MAX_LIGHT);

        // columns under the surface receive no sky; columns above see it all
        let base = pos.y * CHUNK_LENGTH as i32;
        let incoming = if surface >= base + CHUNK_LENGTH as i32 {
            Some([0u8; carve_common::chunk::CHUNK_AREA])
        } else {
            None
        };
        lighting::compute_sunlight_columns(chunk.cells_mut(), &self.palette, incoming.as_ref());
        chunk.mark_clean();
        chunk
    }

    pub fn ensure_chunk(&mut self, pos: ChunkPos) -> &Chunk {
        if !self.chunks.contains_key(&pos) {
            let chunk = match &self.blobs {
                Some(blobs) => match blobs.load_chunk(pos) {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => self.generate_chunk(pos),
                    Err(err) => {
                        log::error!("failed to load chunk {:?}: {}; regenerating", pos, err);
                        self.generate_chunk(pos)
                    }
                },
                None => self.generate_chunk(pos),
            };
            self.chunks.insert(pos, chunk);
        }
        self.chunks.get(&pos).unwrap()
    }

    pub fn chunk_data(&mut self, pos: ChunkPos, force_regen: bool) -> ChunkDataMsg {
        if force_regen {
            let chunk = self.generate_chunk(pos);
            self.chunks.insert(pos, chunk);
            self.dirty_tiles.insert(TilePos::from(pos));
        }

        let chunk = self.ensure_chunk(pos);
        let serialized = chunk.to_serialized();
        ChunkDataMsg {
            pos,
            last_build_seq: serialized.last_build_seq,
            data: serialized.data,
        }
    }

    /// the tile for a column, rederived when anything under it changed.
    pub fn tile(&mut self, pos: TilePos) -> MapTile {
        if !self.dirty_tiles.remove(&pos) {
            if let Some(tile) = self.tiles.get(&pos) {
                return tile.clone();
            }
            if let Some(blobs) = &self.blobs {
                if let Ok(Some(tile)) = blobs.load_tile(pos) {
                    self.tiles.insert(pos, tile.clone());
                    return tile;
                }
            }
        }

        // the surface chunk must exist before the tile can see a surface
        let surface_chunk_y = floor_div(self.config.fallback_surface_y, CHUNK_LENGTH as i32);
        self.ensure_chunk(ChunkPos::new([pos.x, surface_chunk_y, pos.z]));

        let column: Vec<&Chunk> = self
            .chunks
            .values()
            .filter(|chunk| TilePos::from(chunk.pos()) == pos)
            .collect();
        let tile = MapTile::derive(column);

        if let Some(blobs) = &self.blobs {
            if let Err(err) = blobs.save_tile(pos, &tile) {
                log::error!("failed to persist tile {:?}: {}", pos, err);
            }
        }
        self.tiles.insert(pos, tile.clone());
        tile
    }

    /// tile plus every chunk whose cells intersect the tile's surface band.
    pub fn column_response(&mut self, pos: TilePos) -> ColumnResponse {
        let tile = self.tile(pos);

        let mut chunks = Vec::new();
        if let Some(range) = tile.chunk_y_range() {
            for cy in range {
                let chunk = self.ensure_chunk(ChunkPos::new([pos.x, cy, pos.z]));
                let serialized = chunk.to_serialized();
                chunks.push(ColumnChunk {
                    cy: cy as i16,
                    last_build_seq: serialized.last_build_seq,
                    data: serialized.data,
                });
            }
        }

        ColumnResponse { pos, tile, chunks }
    }

    /// applies a validated intent: bumps the global sequence, draws into
    /// every affected chunk, stamps their build sequences, and queues tile
    /// rederivation and persistence.
    pub fn commit_build(&mut self, intent: &BuildIntent) -> u32 {
        self.build_seq += 1;
        let seq = self.build_seq;

        let op = intent.to_op();
        for pos in op.affected_chunks() {
            self.ensure_chunk(pos);
            let chunk = self.chunks.get_mut(&pos).unwrap();
            let changed = draw_to_chunk(chunk, &op, BuildTarget::Main);
            chunk.observe_build_seq(seq);

            if changed {
                self.dirty_tiles.insert(TilePos::from(pos));
                if let Some(blobs) = &self.blobs {
                    if let Err(err) = blobs.save_chunk(chunk) {
                        log::error!("failed to persist chunk {:?}: {}", pos, err);
                    }
                }
            }
        }

        seq
    }

    /// rederives every tile invalidated since the last call, for broadcast.
    pub fn take_dirty_tiles(&mut self) -> Vec<(TilePos, MapTile)> {
        let dirty: Vec<TilePos> = self.dirty_tiles.iter().copied().collect();
        dirty.into_iter().map(|pos| (pos, self.tile(pos))).collect()
    }
}

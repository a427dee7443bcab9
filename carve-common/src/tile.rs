//! top-down map tiles.
//!
//! a tile summarizes one (tx, tz) column of chunks as a 32×32 grid of surface
//! heights (global cell coordinates) and dominant surface materials. the
//! server derives tiles from chunk data and broadcasts them so clients can
//! draw a minimap and pick which Y slice of chunks to stream.

use crate::{
    chunk::{column_index, Chunk, ChunkPos, CHUNK_LENGTH},
    util::floor_div,
};

pub const TILE_LENGTH: usize = CHUNK_LENGTH;
pub const TILE_AREA: usize = TILE_LENGTH * TILE_LENGTH;

/// height value of a column with no solid surface anywhere.
pub const NO_SURFACE: i16 = i16::MIN;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TilePos {
    pub x: i32,
    pub z: i32,
}

impl TilePos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl From<ChunkPos> for TilePos {
    fn from(pos: ChunkPos) -> Self {
        Self { x: pos.x, z: pos.z }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapTile {
    pub heights: Box<[i16; TILE_AREA]>,
    pub materials: Box<[u8; TILE_AREA]>,
}

impl Default for MapTile {
    fn default() -> Self {
        Self {
            heights: Box::new([NO_SURFACE; TILE_AREA]),
            materials: Box::new([0; TILE_AREA]),
        }
    }
}

impl MapTile {
    /// derives a tile from whatever chunks of the column are loaded. chunks
    /// may arrive in any order; higher surfaces win.
    pub fn derive<'a, I>(chunks: I) -> MapTile
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let mut sorted: Vec<&Chunk> = chunks.into_iter().collect();
        sorted.sort_by_key(|chunk| std::cmp::Reverse(chunk.pos().y));

        let mut tile = MapTile::default();
        for chunk in sorted {
            let base = chunk.pos().y * CHUNK_LENGTH as i32;
            for z in 0..CHUNK_LENGTH {
                for x in 0..CHUNK_LENGTH {
                    let column = column_index(x, z);
                    if tile.heights[column] != NO_SURFACE {
                        continue;
                    }
                    for y in (0..CHUNK_LENGTH).rev() {
                        let cell = chunk.get_cell(x as i32, y as i32, z as i32);
                        if cell.is_solid() {
                            tile.heights[column] = (base + y as i32) as i16;
                            tile.materials[column] = cell.material();
                            break;
                        }
                    }
                }
            }
        }
        tile
    }

    pub fn height_range(&self) -> Option<(i16, i16)> {
        let mut range: Option<(i16, i16)> = None;
        for &height in self.heights.iter() {
            if height == NO_SURFACE {
                continue;
            }
            range = Some(match range {
                Some((min, max)) => (min.min(height), max.max(height)),
                None => (height, height),
            });
        }
        range
    }

    /// chunk Y coordinates whose cells intersect the surface anywhere in this
    /// tile, used to decide which chunks belong in a surface column bundle.
    pub fn chunk_y_range(&self) -> Option<std::ops::RangeInclusive<i32>> {
        let (min, max) = self.height_range()?;
        Some(floor_div(min as i32, CHUNK_LENGTH as i32)..=floor_div(max as i32, CHUNK_LENGTH as i32))
    }
}

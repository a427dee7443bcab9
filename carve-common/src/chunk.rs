//! the 32³ chunk container.
//!
//! cells are stored in a dense array with flat index `x + y·32 + z·1024`.
//! a chunk also carries the monotonic build sequence it last observed, an
//! optional preview buffer for staged-but-uncommitted edits, and a face
//! connectivity summary used by the visibility walk.

use nalgebra::{point, Point3};
use std::collections::HashMap;

use crate::{
    aabb::Aabb,
    cell::PackedCell,
    util::{floor_div, floor_mod},
    Side, SIDES,
};

// The width of the chunk is `2 ^ CHUNK_LENGTH_BITS`
pub const CHUNK_LENGTH_BITS: usize = 5;

pub const CHUNK_LENGTH: usize = 1 << CHUNK_LENGTH_BITS;
pub const CHUNK_AREA: usize = CHUNK_LENGTH * CHUNK_LENGTH;
pub const CHUNK_VOLUME: usize = CHUNK_LENGTH * CHUNK_LENGTH * CHUNK_LENGTH;

/// edge length of one cell in world metres.
pub const CELL_SIZE: f32 = 0.25;
/// edge length of one chunk in world metres.
pub const CHUNK_WORLD_SIZE: f32 = CHUNK_LENGTH as f32 * CELL_SIZE;

/// serialized cell payload size in bytes: 32³ cells at 2 bytes each.
pub const CHUNK_DATA_BYTES: usize = CHUNK_VOLUME * 2;

// data order is XYZ: x varies fastest, then y, then z.
#[inline(always)]
pub const fn flat_index(x: usize, y: usize, z: usize) -> usize {
    x + (y << CHUNK_LENGTH_BITS) + (z << (2 * CHUNK_LENGTH_BITS))
}

#[inline(always)]
pub const fn column_index(x: usize, z: usize) -> usize {
    x + (z << CHUNK_LENGTH_BITS)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new<I: Into<[i32; 3]>>(pos: I) -> Self {
        let [x, y, z] = pos.into();
        Self { x, y, z }
    }

    pub fn offset<I: Into<[i32; 3]>>(self, offset: I) -> Self {
        let [dx, dy, dz] = offset.into();
        Self {
            x: dx + self.x,
            y: dy + self.y,
            z: dz + self.z,
        }
    }

    pub fn neighbor(self, side: Side) -> Self {
        let normal = side.normal::<i32>();
        self.offset([normal.x, normal.y, normal.z])
    }

    /// world-space position of this chunk's minimum corner, in metres.
    pub fn origin(self) -> Point3<f32> {
        point![
            self.x as f32 * CHUNK_WORLD_SIZE,
            self.y as f32 * CHUNK_WORLD_SIZE,
            self.z as f32 * CHUNK_WORLD_SIZE
        ]
    }

    pub fn aabb(self) -> Aabb {
        let origin = self.origin();
        Aabb {
            min: origin,
            max: origin + nalgebra::vector![CHUNK_WORLD_SIZE, CHUNK_WORLD_SIZE, CHUNK_WORLD_SIZE],
        }
    }

    /// chunk containing the given world-space point.
    pub fn at_world(pos: Point3<f32>) -> Self {
        Self {
            x: (pos.x / CHUNK_WORLD_SIZE).floor() as i32,
            y: (pos.y / CHUNK_WORLD_SIZE).floor() as i32,
            z: (pos.z / CHUNK_WORLD_SIZE).floor() as i32,
        }
    }

    pub fn taxicab_distance(self, other: ChunkPos) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }
}

impl From<ChunkPos> for Point3<i32> {
    fn from(ChunkPos { x, y, z }: ChunkPos) -> Self {
        nalgebra::point![x, y, z]
    }
}

/// set of chunk faces that touch air connected to at least one other face,
/// one bit per [`Side::index`]. cleared bits are a promise: there is no
/// air path between that face and any other face of the chunk.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct FaceMask(u8);

/// a missing summary means "unknown"; the visibility walk treats unknown
/// chunks as fully traversable.
pub const FACES_UNKNOWN: Option<FaceMask> = None;

impl FaceMask {
    pub const NONE: FaceMask = FaceMask(0);
    pub const ALL: FaceMask = FaceMask(0b11_1111);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b11_1111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, side: Side) -> bool {
        self.0 & (1 << side.index()) != 0
    }

    pub fn insert(&mut self, side: Side) {
        self.0 |= 1 << side.index();
    }

    /// whether air can pass from `entry` to `exit` through this chunk, as far
    /// as the summary knows. `None` entry means the walk started inside.
    pub fn allows(self, entry: Option<Side>, exit: Side) -> bool {
        match entry {
            Some(entry) => self.contains(entry) && self.contains(exit),
            None => self.contains(exit),
        }
    }
}

/// computes the face connectivity summary of a cell buffer by flood-filling
/// its air cells. a face's bit is set only when some air region touches both
/// that face and another one, so cleared bits are always genuine.
pub fn compute_face_mask(cells: &[PackedCell]) -> FaceMask {
    assert_eq!(cells.len(), CHUNK_VOLUME);

    let mut mask = FaceMask::NONE;
    let mut visited = vec![false; CHUNK_VOLUME];
    let mut stack = Vec::new();

    for start in 0..CHUNK_VOLUME {
        if visited[start] || cells[start].is_solid() {
            continue;
        }

        let mut touched = FaceMask::NONE;
        visited[start] = true;
        stack.push(start);

        while let Some(index) = stack.pop() {
            let x = index & (CHUNK_LENGTH - 1);
            let y = (index >> CHUNK_LENGTH_BITS) & (CHUNK_LENGTH - 1);
            let z = index >> (2 * CHUNK_LENGTH_BITS);

            if y == CHUNK_LENGTH - 1 { touched.insert(Side::Top); }
            if y == 0 { touched.insert(Side::Bottom); }
            if x == CHUNK_LENGTH - 1 { touched.insert(Side::Right); }
            if x == 0 { touched.insert(Side::Left); }
            if z == CHUNK_LENGTH - 1 { touched.insert(Side::Front); }
            if z == 0 { touched.insert(Side::Back); }

            for side in SIDES {
                let normal = side.normal::<i32>();
                let (nx, ny, nz) = (x as i32 + normal.x, y as i32 + normal.y, z as i32 + normal.z);
                if !in_chunk_bounds(nx, ny, nz) {
                    continue;
                }
                let neighbor = flat_index(nx as usize, ny as usize, nz as usize);
                if !visited[neighbor] && cells[neighbor].is_air() {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        if touched.bits().count_ones() >= 2 {
            mask = FaceMask::from_bits(mask.bits() | touched.bits());
        }
    }

    mask
}

#[inline(always)]
pub fn in_chunk_bounds(x: i32, y: i32, z: i32) -> bool {
    let len = CHUNK_LENGTH as i32;
    x >= 0 && y >= 0 && z >= 0 && x < len && y < len && z < len
}

/// lookup of resident chunks by position, used for margin sampling.
pub trait ChunkSource {
    fn chunk(&self, pos: ChunkPos) -> Option<&Chunk>;
}

impl ChunkSource for HashMap<ChunkPos, Chunk> {
    fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.get(&pos)
    }
}

/// the empty world; every margin read sees air.
impl ChunkSource for () {
    fn chunk(&self, _pos: ChunkPos) -> Option<&Chunk> {
        None
    }
}

#[derive(Clone)]
pub struct Chunk {
    pos: ChunkPos,
    cells: Box<[PackedCell]>,
    preview: Option<Box<[PackedCell]>>,
    last_build_seq: u32,
    dirty: bool,
    face_mask: Option<FaceMask>,
}

impl Chunk {
    /// a freshly constructed chunk has all cells zero (weight −0.5, material
    /// 0, light 0) and is marked dirty.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            cells: vec![PackedCell::EMPTY; CHUNK_VOLUME].into_boxed_slice(),
            preview: None,
            last_build_seq: 0,
            dirty: true,
            face_mask: FACES_UNKNOWN,
        }
    }

    pub fn from_cells(pos: ChunkPos, cells: Box<[PackedCell]>) -> Result<Self, ChunkSizeError> {
        if cells.len() != CHUNK_VOLUME {
            return Err(ChunkSizeError {
                provided_size: cells.len(),
                expected_size: CHUNK_VOLUME,
            });
        }
        Ok(Self {
            pos,
            cells,
            preview: None,
            last_build_seq: 0,
            dirty: true,
            face_mask: FACES_UNKNOWN,
        })
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn cells(&self) -> &[PackedCell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [PackedCell] {
        self.dirty = true;
        &mut self.cells
    }

    /// out-of-bounds reads return the empty cell.
    pub fn get_cell(&self, x: i32, y: i32, z: i32) -> PackedCell {
        if !in_chunk_bounds(x, y, z) {
            return PackedCell::EMPTY;
        }
        self.cells[flat_index(x as usize, y as usize, z as usize)]
    }

    /// out-of-bounds writes are silently dropped.
    pub fn set_cell(&mut self, x: i32, y: i32, z: i32, cell: PackedCell) {
        if !in_chunk_bounds(x, y, z) {
            return;
        }
        let slot = &mut self.cells[flat_index(x as usize, y as usize, z as usize)];
        if *slot != cell {
            *slot = cell;
            self.dirty = true;
        }
    }

    pub fn fill(&mut self, weight: f32, material: u8, light: u8) {
        let cell = PackedCell::pack(weight, material, light);
        self.cells.fill(cell);
        self.dirty = true;
    }

    /// flat terrain with the surface at local cell `surface_y`: every cell at
    /// or below it is solid, everything above is air carrying `light`.
    pub fn generate_flat(&mut self, surface_y: i32, material: u8, light: u8) {
        let solid = PackedCell::pack(0.5, material, 0);
        let air = PackedCell::pack(-0.5, 0, light);
        for z in 0..CHUNK_LENGTH {
            for y in 0..CHUNK_LENGTH {
                let cell = if (y as i32) <= surface_y { solid } else { air };
                for x in 0..CHUNK_LENGTH {
                    self.cells[flat_index(x, y, z)] = cell;
                }
            }
        }
        self.dirty = true;
    }

    /// like [`generate_flat`], but `surface_y` is a global cell coordinate, so
    /// vertically stacked chunks line up.
    ///
    /// [`generate_flat`]: Chunk::generate_flat
    pub fn generate_flat_global(&mut self, surface_y: i32, material: u8, light: u8) {
        let local = surface_y - self.pos.y * CHUNK_LENGTH as i32;
        self.generate_flat(local, material, light);
    }

    /// samples a cell at coordinates in `[-1, 32]`, falling through to the
    /// appropriate neighbor chunk outside `[0, 31]`. missing neighbors read
    /// as empty air.
    pub fn cell_with_margin<S: ChunkSource>(&self, x: i32, y: i32, z: i32, neighbors: &S) -> PackedCell {
        let len = CHUNK_LENGTH as i32;
        debug_assert!(
            (-1..=len).contains(&x) && (-1..=len).contains(&y) && (-1..=len).contains(&z),
            "margin sample out of range: ({}, {}, {})",
            x,
            y,
            z
        );

        if in_chunk_bounds(x, y, z) {
            return self.cells[flat_index(x as usize, y as usize, z as usize)];
        }

        let pos = self.pos.offset([floor_div(x, len), floor_div(y, len), floor_div(z, len)]);
        match neighbors.chunk(pos) {
            Some(chunk) => chunk.get_cell(floor_mod(x, len), floor_mod(y, len), floor_mod(z, len)),
            None => PackedCell::EMPTY,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn last_build_seq(&self) -> u32 {
        self.last_build_seq
    }

    /// `last_build_seq` is monotonic; observing an older sequence is a no-op.
    pub fn observe_build_seq(&mut self, seq: u32) {
        self.last_build_seq = self.last_build_seq.max(seq);
    }

    pub fn face_mask(&self) -> Option<FaceMask> {
        self.face_mask
    }

    pub fn set_face_mask(&mut self, mask: FaceMask) {
        self.face_mask = Some(mask);
    }

    pub fn recompute_face_mask(&mut self) -> FaceMask {
        let mask = compute_face_mask(&self.cells);
        self.face_mask = Some(mask);
        mask
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    /// the preview buffer starts as a copy of the main cells; build previews
    /// draw into it without touching committed data.
    pub fn ensure_preview(&mut self) -> &mut [PackedCell] {
        if self.preview.is_none() {
            self.preview = Some(self.cells.clone());
        }
        self.preview.as_mut().unwrap()
    }

    pub fn preview(&self) -> Option<&[PackedCell]> {
        self.preview.as_deref()
    }

    pub fn clear_preview(&mut self) {
        self.preview = None;
    }

    pub fn to_serialized(&self) -> SerializedChunk {
        let mut data = Vec::with_capacity(CHUNK_DATA_BYTES);
        for cell in self.cells.iter() {
            data.extend_from_slice(&cell.raw().to_le_bytes());
        }
        SerializedChunk {
            pos: self.pos,
            last_build_seq: self.last_build_seq,
            data,
        }
    }

    pub fn from_serialized(serialized: &SerializedChunk) -> Result<Self, ChunkSizeError> {
        let mut chunk = Self::new(serialized.pos);
        chunk.copy_cells_from(&serialized.data)?;
        chunk.last_build_seq = serialized.last_build_seq;
        Ok(chunk)
    }

    /// replaces the cell contents from a raw little-endian payload.
    pub fn copy_cells_from(&mut self, data: &[u8]) -> Result<(), ChunkSizeError> {
        if data.len() != CHUNK_DATA_BYTES {
            return Err(ChunkSizeError {
                provided_size: data.len(),
                expected_size: CHUNK_DATA_BYTES,
            });
        }
        for (cell, bytes) in self.cells.iter_mut().zip(data.chunks_exact(2)) {
            *cell = PackedCell::from_raw(u16::from_le_bytes([bytes[0], bytes[1]]));
        }
        self.dirty = true;
        self.face_mask = FACES_UNKNOWN;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SerializedChunk {
    pub pos: ChunkPos,
    pub last_build_seq: u32,
    /// raw little-endian cell payload, always [`CHUNK_DATA_BYTES`] long.
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct ChunkSizeError {
    provided_size: usize,
    expected_size: usize,
}

impl std::error::Error for ChunkSizeError {}
impl std::fmt::Display for ChunkSizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not build chunk from payload: mismatched sizes: expected {}, got {}",
            self.expected_size, self.provided_size
        )
    }
}

//! sunlight columns and light spreading.
//!
//! lighting runs in two passes over a chunk's cell buffer. the column pass
//! walks every (x, z) column top-down, carrying skylight from the chunk above
//! (or full light under open sky) and writing it into the light bits. the
//! spread pass then runs a 6-neighbor BFS from emissive cells and from
//! "frontier" cells that should bleed into darker neighbors, attenuating by
//! one level per step.
//!
//! both passes work on plain cell slices so mesh workers can light their
//! snapshot copies without touching the chunk store.

use crate::{
    cell::PackedCell,
    chunk::{column_index, flat_index, ChunkSource, Chunk, CHUNK_AREA, CHUNK_LENGTH, CHUNK_VOLUME},
    palette::MaterialPalette,
    Faces, Side, SIDES,
};

pub const MAX_LIGHT: u8 = 31;

/// per-face light values of the cells just outside the chunk, for best-effort
/// border seeding. missing faces simply contribute nothing.
pub type BorderLight = Faces<Option<Box<[u8; CHUNK_AREA]>>>;

#[inline(always)]
fn is_opaque(cell: PackedCell, palette: &MaterialPalette) -> bool {
    cell.is_solid() && palette.is_opaque(cell.material())
}

/// top-down skylight pass. returns the light leaving the bottom of every
/// column, which feeds the chunk below.
pub fn compute_sunlight_columns(
    cells: &mut [PackedCell],
    palette: &MaterialPalette,
    incoming: Option<&[u8; CHUNK_AREA]>,
) -> [u8; CHUNK_AREA] {
    assert_eq!(cells.len(), CHUNK_VOLUME);

    let mut outgoing = [0u8; CHUNK_AREA];
    for z in 0..CHUNK_LENGTH {
        for x in 0..CHUNK_LENGTH {
            let column = column_index(x, z);
            let mut light = match incoming {
                Some(incoming) => incoming[column],
                None => MAX_LIGHT,
            };

            for y in (0..CHUNK_LENGTH).rev() {
                let index = flat_index(x, y, z);
                let cell = cells[index];

                if cell.is_solid() {
                    if palette.is_opaque(cell.material()) {
                        cells[index] = cell.with_light(0);
                        light = 0;
                    } else {
                        // transparent and liquid cells pass light, dimmed
                        cells[index] = cell.with_light(light);
                        light = light.saturating_sub(1);
                    }
                } else {
                    cells[index] = cell.with_light(light);
                }
            }

            outgoing[column] = light;
        }
    }

    outgoing
}

/// ring queue of flat cell indices. capacity is twice the chunk volume, which
/// is enough because a cell is only re-enqueued when its light increases, and
/// that happens at most 31 times over a chunk's lighting lifetime.
pub struct LightQueue {
    ring: Box<[u16]>,
    head: usize,
    tail: usize,
}

const QUEUE_CAPACITY: usize = 2 * CHUNK_VOLUME;

impl LightQueue {
    pub fn new() -> Self {
        Self {
            ring: vec![0; QUEUE_CAPACITY].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    fn push(&mut self, index: u16) {
        debug_assert!(self.tail - self.head < QUEUE_CAPACITY, "light queue overflow");
        self.ring[self.tail & (QUEUE_CAPACITY - 1)] = index;
        self.tail += 1;
    }

    fn pop(&mut self) -> Option<u16> {
        if self.head == self.tail {
            return None;
        }
        let index = self.ring[self.head & (QUEUE_CAPACITY - 1)];
        self.head += 1;
        Some(index)
    }
}

impl Default for LightQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn unpack_index(index: usize) -> (usize, usize, usize) {
    let x = index & (CHUNK_LENGTH - 1);
    let y = (index >> 5) & (CHUNK_LENGTH - 1);
    let z = index >> 10;
    (x, y, z)
}

/// the chunk-local cell at face coordinate (u, v) of the given side, using
/// the same (u, v) layout as [`BorderLight`] arrays.
pub fn border_cell_of(side: Side, u: usize, v: usize) -> (usize, usize, usize) {
    let high = CHUNK_LENGTH - 1;
    match side {
        Side::Top => (u, high, v),
        Side::Bottom => (u, 0, v),
        Side::Right => (high, u, v),
        Side::Left => (0, u, v),
        Side::Front => (u, v, high),
        Side::Back => (u, v, 0),
    }
}

/// 6-neighbor light spread. seeds are emissive cells, frontier cells left by
/// the column pass, and (best effort) borders of resident neighbors.
pub fn propagate_light(
    cells: &mut [PackedCell],
    palette: &MaterialPalette,
    borders: &BorderLight,
    queue: &mut LightQueue,
) {
    assert_eq!(cells.len(), CHUNK_VOLUME);
    queue.clear();

    // neighbor light leaks one level into our edge cells
    for side in SIDES {
        let border = match &borders[side] {
            Some(border) => border,
            None => continue,
        };
        for v in 0..CHUNK_LENGTH {
            for u in 0..CHUNK_LENGTH {
                let neighbor_light = border[column_index(u, v)];
                if neighbor_light < 2 {
                    continue;
                }
                let (x, y, z) = border_cell_of(side, u, v);
                let index = flat_index(x, y, z);
                let cell = cells[index];
                if !is_opaque(cell, palette) && cell.light() < neighbor_light - 1 {
                    cells[index] = cell.with_light(neighbor_light - 1);
                    queue.push(index as u16);
                }
            }
        }
    }

    for index in 0..CHUNK_VOLUME {
        let cell = cells[index];

        if cell.is_solid() {
            let emission = palette.emission(cell.material());
            if emission > 0 && cell.light() < emission {
                cells[index] = cell.with_light(emission);
                queue.push(index as u16);
                continue;
            }
        }

        let light = cells[index].light();
        if light < 2 {
            continue;
        }

        // frontier cells have a strictly darker neighbor to spread into
        let (x, y, z) = unpack_index(index);
        let mut frontier = false;
        for side in SIDES {
            let normal = side.normal::<i32>();
            let (nx, ny, nz) = (x as i32 + normal.x, y as i32 + normal.y, z as i32 + normal.z);
            if !crate::chunk::in_chunk_bounds(nx, ny, nz) {
                continue;
            }
            let neighbor = cells[flat_index(nx as usize, ny as usize, nz as usize)];
            if neighbor.light() + 1 < light {
                frontier = true;
                break;
            }
        }
        if frontier {
            queue.push(index as u16);
        }
    }

    while let Some(index) = queue.pop() {
        let index = index as usize;
        let light = cells[index].light();
        if light < 2 {
            continue;
        }

        let (x, y, z) = unpack_index(index);
        for side in SIDES {
            let normal = side.normal::<i32>();
            let (nx, ny, nz) = (x as i32 + normal.x, y as i32 + normal.y, z as i32 + normal.z);
            if !crate::chunk::in_chunk_bounds(nx, ny, nz) {
                continue;
            }

            let neighbor_index = flat_index(nx as usize, ny as usize, nz as usize);
            let neighbor = cells[neighbor_index];
            if !is_opaque(neighbor, palette) && neighbor.light() < light - 1 {
                cells[neighbor_index] = neighbor.with_light(light - 1);
                queue.push(neighbor_index as u16);
            }
        }
    }
}

/// gathers the border light of resident neighbors for [`propagate_light`].
pub fn collect_border_light<S: ChunkSource>(chunk: &Chunk, neighbors: &S) -> BorderLight {
    let mut borders = BorderLight::default();
    for side in SIDES {
        let neighbor = match neighbors.chunk(chunk.pos().neighbor(side)) {
            Some(neighbor) => neighbor,
            None => continue,
        };

        let mut border = Box::new([0u8; CHUNK_AREA]);
        for v in 0..CHUNK_LENGTH {
            for u in 0..CHUNK_LENGTH {
                // the neighbor cell adjacent to our (u, v) border cell sits on
                // the neighbor's opposite face
                let (x, y, z) = border_cell_of(side.opposite(), u, v);
                border[column_index(u, v)] = neighbor.get_cell(x as i32, y as i32, z as i32).light();
            }
        }
        borders[side] = Some(border);
    }
    borders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::{Chunk, ChunkPos},
        palette::{self, default_palette},
    };

    #[test]
    fn open_sky_fills_an_air_chunk() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        let palette = default_palette();

        let outgoing = compute_sunlight_columns(chunk.cells_mut(), &palette, None);

        assert!(chunk.cells().iter().all(|c| c.light() == MAX_LIGHT));
        assert!(outgoing.iter().all(|&l| l == MAX_LIGHT));
    }

    #[test]
    fn opaque_terrain_kills_the_column() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(15, palette::ROCK, 0);
        let palette = default_palette();

        let outgoing = compute_sunlight_columns(chunk.cells_mut(), &palette, None);

        assert_eq!(chunk.get_cell(4, 20, 4).light(), MAX_LIGHT);
        assert_eq!(chunk.get_cell(4, 15, 4).light(), 0);
        assert_eq!(chunk.get_cell(4, 3, 4).light(), 0);
        assert!(outgoing.iter().all(|&l| l == 0));
    }

    #[test]
    fn transparent_cells_attenuate() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        let palette = default_palette();
        // a slab of glass at y = 20..23, air everywhere else
        for y in 20..23 {
            for z in 0..32 {
                for x in 0..32 {
                    chunk.set_cell(x, y, z, PackedCell::pack(0.5, palette::GLASS, 0));
                }
            }
        }

        compute_sunlight_columns(chunk.cells_mut(), &palette, None);

        assert_eq!(chunk.get_cell(4, 25, 4).light(), 31);
        assert_eq!(chunk.get_cell(4, 22, 4).light(), 31);
        assert_eq!(chunk.get_cell(4, 21, 4).light(), 30);
        assert_eq!(chunk.get_cell(4, 20, 4).light(), 29);
        assert_eq!(chunk.get_cell(4, 10, 4).light(), 28);
    }

    #[test]
    fn incoming_light_comes_from_above() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        let palette = default_palette();
        let incoming = [7u8; CHUNK_AREA];

        let outgoing = compute_sunlight_columns(chunk.cells_mut(), &palette, Some(&incoming));

        assert!(chunk.cells().iter().all(|c| c.light() == 7));
        assert!(outgoing.iter().all(|&l| l == 7));
    }

    #[test]
    fn emissive_cells_spread_with_attenuation() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.fill(-0.5, 0, 0);
        chunk.set_cell(16, 16, 16, PackedCell::pack(0.5, palette::LAMP, 0));
        let palette = default_palette();

        let mut queue = LightQueue::new();
        propagate_light(chunk.cells_mut(), &palette, &BorderLight::default(), &mut queue);

        assert_eq!(chunk.get_cell(16, 16, 16).light(), 31);
        assert_eq!(chunk.get_cell(17, 16, 16).light(), 30);
        assert_eq!(chunk.get_cell(18, 16, 16).light(), 29);
        assert_eq!(chunk.get_cell(17, 17, 16).light(), 29);
    }

    #[test]
    fn propagation_upholds_the_gradient_invariant() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(10, palette::ROCK, 0);
        // a lamp resting on the terrain
        chunk.set_cell(8, 11, 8, PackedCell::pack(0.5, palette::LAMP, 0));
        let palette = default_palette();

        compute_sunlight_columns(chunk.cells_mut(), &palette, Some(&[0u8; CHUNK_AREA]));
        let mut queue = LightQueue::new();
        propagate_light(chunk.cells_mut(), &palette, &BorderLight::default(), &mut queue);

        for z in 0..32i32 {
            for y in 0..32i32 {
                for x in 0..32i32 {
                    let cell = chunk.get_cell(x, y, z);
                    if is_opaque(cell, &palette) {
                        continue;
                    }
                    let light = cell.light();
                    for side in SIDES {
                        let n = side.normal::<i32>();
                        if !crate::chunk::in_chunk_bounds(x + n.x, y + n.y, z + n.z) {
                            continue;
                        }
                        let neighbor = chunk.get_cell(x + n.x, y + n.y, z + n.z);
                        if !is_opaque(neighbor, &palette) && light > 0 {
                            assert!(
                                neighbor.light() + 1 >= light,
                                "({}, {}, {}) light {} has neighbor at {}",
                                x, y, z, light, neighbor.light()
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn sunlight_spreads_under_an_overhang() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        // a roof over half the chunk at y = 20
        for z in 0..32 {
            for x in 0..16 {
                chunk.set_cell(x, 20, z, PackedCell::pack(0.5, palette::ROCK, 0));
            }
        }
        let palette = default_palette();

        compute_sunlight_columns(chunk.cells_mut(), &palette, None);
        assert_eq!(chunk.get_cell(4, 10, 16).light(), 0);

        let mut queue = LightQueue::new();
        propagate_light(chunk.cells_mut(), &palette, &BorderLight::default(), &mut queue);

        // light from the open half bleeds sideways under the roof
        assert_eq!(chunk.get_cell(15, 10, 16).light(), 30);
        assert!(chunk.get_cell(4, 10, 16).light() > 0);
    }

    #[test]
    fn border_light_leaks_in_from_neighbors() {
        let palette = default_palette();
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.fill(-0.5, 0, 0);

        let mut borders = BorderLight::default();
        borders[Side::Right] = Some(Box::new([MAX_LIGHT; CHUNK_AREA]));

        let mut queue = LightQueue::new();
        propagate_light(chunk.cells_mut(), &palette, &borders, &mut queue);

        assert_eq!(chunk.get_cell(31, 16, 16).light(), 30);
        assert_eq!(chunk.get_cell(30, 16, 16).light(), 29);
        assert_eq!(chunk.get_cell(0, 16, 16).light(), 0);
    }

    #[test]
    fn collect_border_light_reads_adjacent_faces() {
        let palette = default_palette();
        let mut neighbors = std::collections::HashMap::new();
        let mut right = Chunk::new(ChunkPos::new([1, 0, 0]));
        compute_sunlight_columns(right.cells_mut(), &palette, None);
        neighbors.insert(right.pos(), right);

        let chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        let borders = collect_border_light(&chunk, &neighbors);

        assert!(borders[Side::Right].as_ref().unwrap().iter().all(|&l| l == MAX_LIGHT));
        assert!(borders[Side::Left].is_none());
    }
}

//! surface-net extraction.
//!
//! the mesher walks every sub-cell of the expanded 34³ grid, drops one vertex
//! into each sub-cell whose corners straddle the isosurface, then stitches
//! quads across every lattice edge whose endpoints differ in solidity. the
//! whole pass runs on raw packed cells with flat indexing; solidity checks
//! compare packed weight bits and never unpack to floats.
//!
//! triangles are binned into the three material-kind layers as they are
//! emitted. a vertex shared between layers is copied into each, so e.g. the
//! water surface never references solid-layer vertices.

use carve_common::{
    cell::PackedCell,
    chunk::CHUNK_LENGTH,
    palette::{MaterialKind, MaterialPalette},
};
use std::collections::HashMap;

use super::ChunkExpanse;
use crate::mesh::{MeshLayer, MeshLayerData, LAYER_COUNT};

// sub-cells span lattice points [s, s+1], s in [-1, 31]
const SUB_LENGTH: usize = CHUNK_LENGTH + 1;
const SUB_VOLUME: usize = SUB_LENGTH * SUB_LENGTH * SUB_LENGTH;

#[inline(always)]
fn sub_index(x: i32, y: i32, z: i32) -> usize {
    (x + 1) as usize + (y + 1) as usize * SUB_LENGTH + (z + 1) as usize * SUB_LENGTH * SUB_LENGTH
}

// corner i sits at (i & 1, i >> 1 & 1, i >> 2 & 1) relative to the sub-cell
const CORNER_OFFSETS: [[i32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

// the 12 sub-cell edges as corner index pairs
const EDGES: [(usize, usize); 12] = [
    (0, 1), (2, 3), (4, 5), (6, 7),
    (0, 2), (1, 3), (4, 6), (5, 7),
    (0, 4), (1, 5), (2, 6), (3, 7),
];

struct CellVertex {
    position: [f32; 3],
    normal: [f32; 3],
    ao: u8,
    light: u8,
    /// material id to use per layer, majority-voted among the solid corners
    /// of that kind (falling back to the overall majority).
    materials: [u8; LAYER_COUNT],
}

/// majority material among `corners`, optionally restricted to one kind.
/// ties break toward the lowest material id.
fn majority_material(
    corners: &[(u8, MaterialKind)],
    filter: Option<MaterialKind>,
) -> Option<u8> {
    let mut best: Option<(u8, u32)> = None;
    for &(material, kind) in corners {
        if filter.map_or(false, |f| f != kind) {
            continue;
        }
        let count = corners
            .iter()
            .filter(|&&(m, k)| m == material && filter.map_or(true, |f| f == k))
            .count() as u32;
        best = Some(match best {
            None => (material, count),
            Some((bm, bc)) => {
                if count > bc || (count == bc && material < bm) {
                    (material, count)
                } else {
                    (bm, bc)
                }
            }
        });
    }
    best.map(|(material, _)| material)
}

fn build_vertex(
    corners: &[PackedCell; 8],
    base: [i32; 3],
    palette: &MaterialPalette,
) -> CellVertex {
    // vertex position: mean of the edge crossings, by linear interpolation of
    // the corner weights
    let mut sum = [0.0f32; 3];
    let mut crossings = 0;
    for &(a, b) in EDGES.iter() {
        if corners[a].is_solid() == corners[b].is_solid() {
            continue;
        }
        let wa = corners[a].weight();
        let wb = corners[b].weight();
        let t = wa / (wa - wb);
        for axis in 0..3 {
            let pa = CORNER_OFFSETS[a][axis] as f32;
            let pb = CORNER_OFFSETS[b][axis] as f32;
            sum[axis] += pa + t * (pb - pa);
        }
        crossings += 1;
    }
    let inv = 1.0 / crossings.max(1) as f32;
    let position = [
        base[0] as f32 + sum[0] * inv,
        base[1] as f32 + sum[1] * inv,
        base[2] as f32 + sum[2] * inv,
    ];

    // normal from the weight gradient, pointing from solid into air
    let mut gradient = [0.0f32; 3];
    for (i, cell) in corners.iter().enumerate() {
        let w = cell.weight();
        for axis in 0..3 {
            if CORNER_OFFSETS[i][axis] == 1 {
                gradient[axis] += w;
            } else {
                gradient[axis] -= w;
            }
        }
    }
    let len = (gradient[0] * gradient[0] + gradient[1] * gradient[1] + gradient[2] * gradient[2]).sqrt();
    let normal = if len > 1e-6 {
        [-gradient[0] / len, -gradient[1] / len, -gradient[2] / len]
    } else {
        [0.0, 1.0, 0.0]
    };

    let mut solids = Vec::with_capacity(8);
    let mut light_sum = 0u32;
    let mut air_corners = 0u32;
    for cell in corners.iter() {
        light_sum += cell.light() as u32;
        if cell.is_solid() {
            solids.push((cell.material(), palette.kind(cell.material())));
        } else {
            air_corners += 1;
        }
    }

    let overall = majority_material(&solids, None).unwrap_or(0);
    let materials = [
        majority_material(&solids, Some(MaterialKind::Solid)).unwrap_or(overall),
        majority_material(&solids, Some(MaterialKind::Transparent)).unwrap_or(overall),
        majority_material(&solids, Some(MaterialKind::Liquid)).unwrap_or(overall),
    ];

    CellVertex {
        position,
        normal,
        ao: (air_corners * 255 / 8) as u8,
        light: (light_sum / 8) as u8,
        materials,
    }
}

/// extracts the three per-layer meshes from an expanded chunk.
///
/// `neighbors_present` flags the +X/+Y/+Z neighbors; faces on a high boundary
/// whose neighbor is absent are skipped so the neighbor's own mesh (and our
/// remesh once it arrives) can close the seam without double walls.
pub fn extract_mesh(
    expanse: &ChunkExpanse,
    palette: &MaterialPalette,
    neighbors_present: [bool; 3],
) -> [MeshLayerData; LAYER_COUNT] {
    let mut layers: [MeshLayerData; LAYER_COUNT] = Default::default();
    let mut vertices: Vec<CellVertex> = Vec::new();
    let mut vertex_ids = vec![-1i32; SUB_VOLUME];
    let mut layer_ids: [HashMap<i32, u32>; LAYER_COUNT] = Default::default();

    let len = CHUNK_LENGTH as i32;

    // vertex pass over every sub-cell of the expanded grid
    for z in -1..len {
        for y in -1..len {
            for x in -1..len {
                let mut corners = [PackedCell::EMPTY; 8];
                let mut mask = 0u8;
                for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
                    let cell = expanse.get(x + offset[0], y + offset[1], z + offset[2]);
                    corners[i] = cell;
                    if cell.is_solid() {
                        mask |= 1 << i;
                    }
                }
                if mask == 0 || mask == 0xff {
                    continue;
                }

                let vertex = build_vertex(&corners, [x, y, z], palette);
                vertex_ids[sub_index(x, y, z)] = vertices.len() as i32;
                vertices.push(vertex);
            }
        }
    }

    // quad pass over every lattice edge this chunk owns
    for axis in 0..3usize {
        let ua = (axis + 1) % 3;
        let va = (axis + 2) % 3;

        for qz in 0..len {
            for qy in 0..len {
                for qx in 0..len {
                    let q = [qx, qy, qz];

                    // faces that would sample an absent high neighbor are
                    // left for later
                    let mut skip = false;
                    for e in 0..3 {
                        if q[e] == len - 1 && !neighbors_present[e] {
                            skip = true;
                            break;
                        }
                    }
                    if skip {
                        continue;
                    }

                    let mut b = q;
                    b[axis] += 1;

                    let cell_a = expanse.get(q[0], q[1], q[2]);
                    let cell_b = expanse.get(b[0], b[1], b[2]);
                    let a_solid = cell_a.is_solid();
                    if a_solid == cell_b.is_solid() {
                        continue;
                    }

                    let solid_cell = if a_solid { cell_a } else { cell_b };
                    let layer = MeshLayer::from_kind(palette.kind(solid_cell.material()));

                    // the four sub-cells sharing this edge
                    let mut sub = [q; 4];
                    sub[1][ua] -= 1;
                    sub[2][va] -= 1;
                    sub[3][ua] -= 1;
                    sub[3][va] -= 1;

                    let mut ids = [0u32; 4];
                    let mut missing = false;
                    for (slot, s) in ids.iter_mut().zip(sub.iter()) {
                        let vertex_id = vertex_ids[sub_index(s[0], s[1], s[2])];
                        if vertex_id < 0 {
                            missing = true;
                            break;
                        }
                        *slot = emit_layer_vertex(
                            &mut layers[layer.index()],
                            &mut layer_ids[layer.index()],
                            &vertices,
                            vertex_id,
                            layer,
                        );
                    }
                    if missing {
                        continue;
                    }

                    let [v11, v01, v10, v00] = ids;

                    // (p00, p10, p11) winds counter-clockwise seen from +axis;
                    // flip when the solid side is above so the front face
                    // always points from solid into air
                    let indices = &mut layers[layer.index()].indices;
                    if a_solid {
                        indices.extend_from_slice(&[v00, v10, v11, v00, v11, v01]);
                    } else {
                        indices.extend_from_slice(&[v00, v11, v10, v00, v01, v11]);
                    }
                }
            }
        }
    }

    layers
}

fn emit_layer_vertex(
    layer_data: &mut MeshLayerData,
    layer_ids: &mut HashMap<i32, u32>,
    vertices: &[CellVertex],
    vertex_id: i32,
    layer: MeshLayer,
) -> u32 {
    if let Some(&id) = layer_ids.get(&vertex_id) {
        return id;
    }
    let vertex = &vertices[vertex_id as usize];
    let id = layer_data.positions.len() as u32;
    layer_data.positions.push(vertex.position);
    layer_data.normals.push(vertex.normal);
    layer_data.materials.push(vertex.materials[layer.index()]);
    layer_data.ao.push(vertex.ao);
    layer_data.light.push(vertex.light);
    layer_ids.insert(vertex_id, id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::expand_chunk;
    use carve_common::{
        cell::PackedCell,
        chunk::{Chunk, ChunkPos},
        palette::{self, default_palette},
    };
    use std::collections::HashMap;

    fn mesh_alone(chunk: &Chunk) -> [MeshLayerData; LAYER_COUNT] {
        let expanse = expand_chunk(chunk, &(), false);
        extract_mesh(&expanse, &default_palette(), [false; 3])
    }

    #[test]
    fn uniform_chunks_produce_nothing() {
        let empty = Chunk::new(ChunkPos::new([0, 0, 0]));
        for layer in mesh_alone(&empty) {
            assert!(layer.is_empty());
        }

        let mut solid = Chunk::new(ChunkPos::new([0, 0, 0]));
        solid.fill(0.5, palette::ROCK, 0);
        for layer in mesh_alone(&solid) {
            assert!(layer.is_empty());
        }
    }

    #[test]
    fn flat_terrain_meshes_upward() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(16, palette::GRASS, 31);

        let [solid, transparent, liquid] = mesh_alone(&chunk);
        assert!(transparent.is_empty());
        assert!(liquid.is_empty());

        assert!(solid.triangle_count() >= 100, "{} triangles", solid.triangle_count());
        assert!(solid.materials.iter().all(|&m| m == palette::GRASS));

        let upward = solid.normals.iter().filter(|n| n[1] > 0.5).count();
        assert!(
            upward * 10 >= solid.normals.len() * 8,
            "{} of {} normals point up",
            upward,
            solid.normals.len()
        );

        // vertex coordinates stay in cell units within the margin band
        for p in &solid.positions {
            for axis in 0..3 {
                assert!(p[axis] >= -1.0 && p[axis] < 33.0);
            }
        }
    }

    #[test]
    fn surface_sits_at_the_crossing() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(10, palette::ROCK, 31);
        let [solid, _, _] = mesh_alone(&chunk);

        // the flat part of the surface interpolates to y = 10.5
        let surface = solid
            .positions
            .iter()
            .filter(|p| p[0] > 2.0 && p[0] < 30.0 && p[2] > 2.0 && p[2] < 30.0)
            .collect::<Vec<_>>();
        assert!(!surface.is_empty());
        for p in surface {
            assert!((p[1] - 10.5).abs() < 0.01, "vertex at y = {}", p[1]);
        }
    }

    #[test]
    fn liquids_split_into_their_own_layer() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(8, palette::ROCK, 31);
        // a pond on top of the rock
        for z in 4..12 {
            for x in 4..12 {
                for y in 9..11 {
                    chunk.set_cell(x, y, z, PackedCell::pack(0.5, palette::WATER, 0));
                }
            }
        }

        let [solid, transparent, liquid] = mesh_alone(&chunk);
        assert!(!solid.is_empty());
        assert!(transparent.is_empty());
        assert!(!liquid.is_empty());
        assert!(liquid.materials.iter().all(|&m| m == palette::WATER));
        // the pond surface floats above the rock surface
        assert!(liquid.positions.iter().any(|p| p[1] > 10.0));
    }

    #[test]
    fn missing_neighbor_skips_high_boundary_faces() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(10, palette::ROCK, 31);

        let alone = mesh_alone(&chunk);

        let mut neighbors = HashMap::new();
        let mut right = Chunk::new(ChunkPos::new([1, 0, 0]));
        right.generate_flat(10, palette::ROCK, 31);
        neighbors.insert(right.pos(), right);

        let expanse = expand_chunk(&chunk, &neighbors, false);
        let with_neighbor = extract_mesh(&expanse, &default_palette(), [true, false, false]);

        // with the +X neighbor resident, the boundary strip is emitted
        assert!(with_neighbor[0].triangle_count() > alone[0].triangle_count());

        let max_x_alone = alone[0].positions.iter().map(|p| p[0]).fold(f32::MIN, f32::max);
        let max_x_with = with_neighbor[0]
            .positions
            .iter()
            .map(|p| p[0])
            .fold(f32::MIN, f32::max);
        assert!(max_x_alone < 31.0);
        assert!(max_x_with > 31.0);
    }

    #[test]
    fn chunk_seams_line_up() {
        let mut left = Chunk::new(ChunkPos::new([0, 0, 0]));
        left.generate_flat_global(10, palette::ROCK, 31);
        let mut right = Chunk::new(ChunkPos::new([1, 0, 0]));
        right.generate_flat_global(10, palette::ROCK, 31);

        let mut world = HashMap::new();
        world.insert(left.pos(), left.clone());
        world.insert(right.pos(), right.clone());

        let palette = default_palette();
        let left_mesh = extract_mesh(&expand_chunk(&left, &world, false), &palette, [true, false, false]);
        let right_mesh = extract_mesh(&expand_chunk(&right, &world, false), &palette, [false; 3]);

        // vertices the left chunk emits at its +X boundary must coincide with
        // vertices of the right chunk (offset by one chunk length)
        let boundary: Vec<[f32; 3]> = left_mesh[0]
            .positions
            .iter()
            .copied()
            .filter(|p| p[0] > 31.0)
            .collect();
        assert!(!boundary.is_empty());

        let mut matched = 0;
        for p in &boundary {
            let shifted = [p[0] - CHUNK_LENGTH as f32, p[1], p[2]];
            let found = right_mesh[0].positions.iter().any(|q| {
                let dx = q[0] - shifted[0];
                let dy = q[1] - shifted[1];
                let dz = q[2] - shifted[2];
                (dx * dx + dy * dy + dz * dz).sqrt() < 0.2
            });
            if found {
                matched += 1;
            }
        }
        assert!(
            matched * 10 >= boundary.len() * 6,
            "{} of {} boundary vertices matched",
            matched,
            boundary.len()
        );
    }
}

//! applying volumetric build edits to chunks.
//!
//! a [`BuildOp`] is the validated, world-positioned form of a build intent.
//! the same `draw_to_chunk` runs on the server when an intent commits and on
//! every client when the commit broadcast arrives, so both sides converge on
//! identical cell data.

use nalgebra::{Point3, UnitQuaternion};

use crate::{
    aabb::Aabb,
    cell::{quantize_weight, PackedCell},
    chunk::{flat_index, Chunk, ChunkPos, CELL_SIZE, CHUNK_LENGTH},
    sdf::{sdf_from_config, sdf_to_weight, BuildConfig},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildMode {
    Add,
    Subtract,
    Paint,
    Fill,
}

impl BuildMode {
    pub fn code(&self) -> u8 {
        match self {
            BuildMode::Add => 0,
            BuildMode::Subtract => 1,
            BuildMode::Paint => 2,
            BuildMode::Fill => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<BuildMode> {
        Some(match code {
            0 => BuildMode::Add,
            1 => BuildMode::Subtract,
            2 => BuildMode::Paint,
            3 => BuildMode::Fill,
            _ => return None,
        })
    }
}

/// which cell buffer of the chunk an edit draws into.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildTarget {
    Main,
    Preview,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BuildOp {
    /// world-space centre of the shape, in metres.
    pub center: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub config: BuildConfig,
    pub mode: BuildMode,
    pub material: u8,
}

impl BuildOp {
    /// conservative world bounds of the edit, with a one-cell margin so
    /// boundary cells on neighboring chunks are revisited too.
    pub fn world_aabb(&self) -> Aabb {
        // rotation is arbitrary, so bound by the shape's circumscribed sphere
        let radius = self.config.bounding_radius() + CELL_SIZE;
        Aabb {
            min: self.center - nalgebra::vector![radius, radius, radius],
            max: self.center + nalgebra::vector![radius, radius, radius],
        }
    }

    pub fn affected_chunks(&self) -> Vec<ChunkPos> {
        let aabb = self.world_aabb();
        let min = ChunkPos::at_world(aabb.min);
        let max = ChunkPos::at_world(aabb.max);

        let mut chunks = Vec::new();
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    chunks.push(ChunkPos::new([x, y, z]));
                }
            }
        }
        chunks
    }
}

fn merge_cell(old: PackedCell, weight: f32, mode: BuildMode, material: u8) -> PackedCell {
    match mode {
        BuildMode::Add => {
            let bits = quantize_weight(weight);
            if bits <= old.weight_bits() {
                return old;
            }
            let new = old.with_weight_bits(bits);
            // newly solidified cells take the op's material; already-solid
            // cells keep theirs
            if new.is_solid() && old.is_air() {
                new.with_material(material)
            } else {
                new
            }
        }
        BuildMode::Subtract => {
            let bits = quantize_weight(-weight);
            if bits >= old.weight_bits() {
                return old;
            }
            old.with_weight_bits(bits)
        }
        BuildMode::Paint => {
            if old.is_solid() && weight > 0.0 {
                old.with_material(material)
            } else {
                old
            }
        }
        BuildMode::Fill => {
            if !old.is_air() {
                return old;
            }
            let bits = quantize_weight(weight);
            if bits <= old.weight_bits() {
                return old;
            }
            let new = old.with_weight_bits(bits);
            if new.is_solid() {
                new.with_material(material)
            } else {
                new
            }
        }
    }
}

/// draws the op into one chunk, returning whether any cell changed. the draw
/// is total within its bounds; invalid configs are rejected before they get
/// here.
pub fn draw_to_chunk(chunk: &mut Chunk, op: &BuildOp, target: BuildTarget) -> bool {
    let aabb = op.world_aabb();
    let origin = chunk.pos().origin();

    let len = CHUNK_LENGTH as i32;
    let cell_min = |w: f32, o: f32| (((w - o) / CELL_SIZE).floor() as i32).clamp(0, len - 1);
    let cell_max = |w: f32, o: f32| (((w - o) / CELL_SIZE).ceil() as i32).clamp(0, len - 1);

    let x_range = cell_min(aabb.min.x, origin.x)..=cell_max(aabb.max.x, origin.x);
    let y_range = cell_min(aabb.min.y, origin.y)..=cell_max(aabb.max.y, origin.y);
    let z_range = cell_min(aabb.min.z, origin.z)..=cell_max(aabb.max.z, origin.z);

    // invert once per op, apply per cell
    let inv_rotation = op.rotation.inverse();
    let mode = op.mode;
    let material = op.material;
    let config = op.config;
    let center = op.center;

    let was_dirty = chunk.is_dirty();
    let cells = match target {
        BuildTarget::Main => chunk.cells_mut(),
        BuildTarget::Preview => chunk.ensure_preview(),
    };

    let mut changed = false;
    for z in z_range.clone() {
        for y in y_range.clone() {
            for x in x_range.clone() {
                let world = origin + nalgebra::vector![x as f32, y as f32, z as f32] * CELL_SIZE;
                let local = Point3::from(inv_rotation * (world - center));
                let weight = sdf_to_weight(sdf_from_config(local, &config));

                let index = flat_index(x as usize, y as usize, z as usize);
                let old = cells[index];
                let new = merge_cell(old, weight, mode, material);
                if new != old {
                    cells[index] = new;
                    changed = true;
                }
            }
        }
    }

    // a draw that didn't touch anything shouldn't leave the chunk dirty
    if matches!(target, BuildTarget::Main) && !changed && !was_dirty {
        chunk.mark_clean();
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{BuildConfig, BuildShape};
    use nalgebra::{point, vector};

    fn sphere_op(center: Point3<f32>, diameter: f32, mode: BuildMode, material: u8) -> BuildOp {
        BuildOp {
            center,
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(BuildShape::Sphere, vector![diameter, diameter, diameter]),
            mode,
            material,
        }
    }

    #[test]
    fn small_op_affects_a_single_chunk() {
        let op = sphere_op(point![4.0, 4.0, 4.0], 1.0, BuildMode::Add, 5);
        assert_eq!(op.affected_chunks(), vec![ChunkPos::new([0, 0, 0])]);
    }

    #[test]
    fn op_near_a_boundary_spills_into_neighbors() {
        let op = sphere_op(point![7.9, 4.0, 4.0], 1.0, BuildMode::Add, 5);
        let affected = op.affected_chunks();
        assert!(affected.contains(&ChunkPos::new([0, 0, 0])));
        assert!(affected.contains(&ChunkPos::new([1, 0, 0])));
    }

    #[test]
    fn add_sphere_to_empty_chunk() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.fill(-0.5, 0, 0);

        let op = sphere_op(point![4.0, 4.0, 4.0], 1.0, BuildMode::Add, 5);
        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Main));

        let center = chunk.get_cell(16, 16, 16);
        assert!(center.is_solid());
        assert_eq!(center.material(), 5);

        // corners are far outside the sphere and stay air
        assert!(chunk.get_cell(0, 0, 0).is_air());
        assert!(chunk.get_cell(31, 31, 31).is_air());

        // everything more than a cell beyond the radius is still air
        let radius = 0.5;
        for z in 0..32 {
            for y in 0..32 {
                for x in 0..32 {
                    let world = point![x as f32, y as f32, z as f32] * CELL_SIZE;
                    if (world - point![4.0, 4.0, 4.0]).norm() > radius + CELL_SIZE {
                        assert!(chunk.get_cell(x, y, z).is_air(), "({}, {}, {})", x, y, z);
                    }
                }
            }
        }
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        let op = sphere_op(point![4.0, 4.0, 4.0], 2.0, BuildMode::Add, 5);

        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Main));
        let after_first = chunk.cells().to_vec();
        assert!(!draw_to_chunk(&mut chunk, &op, BuildTarget::Main));
        assert_eq!(chunk.cells(), &after_first[..]);
    }

    #[test]
    fn subtract_carves_and_preserves_materials() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.fill(0.5, 7, 0);

        let op = sphere_op(point![4.0, 4.0, 4.0], 2.0, BuildMode::Subtract, 1);
        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Main));

        assert!(chunk.get_cell(16, 16, 16).is_air());
        // outside the carve, solid cells keep their material
        let kept = chunk.get_cell(0, 0, 0);
        assert!(kept.is_solid());
        assert_eq!(kept.material(), 7);
        // carved cells keep their material too, only the weight moves
        assert_eq!(chunk.get_cell(16, 16, 16).material(), 7);
    }

    #[test]
    fn paint_changes_materials_of_solid_cells_only() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(15, 2, 31);

        let op = sphere_op(point![4.0, 15.0 * CELL_SIZE, 4.0], 2.0, BuildMode::Paint, 9);
        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Main));

        assert_eq!(chunk.get_cell(16, 15, 16).material(), 9);
        // the cell count didn't change: nothing above the surface appeared
        assert!(chunk.get_cell(16, 20, 16).is_air());
        // weight untouched
        assert_eq!(chunk.get_cell(16, 15, 16).weight_bits(), 15);
    }

    #[test]
    fn fill_only_touches_air() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(15, 2, 31);

        let op = sphere_op(point![4.0, 15.0 * CELL_SIZE, 4.0], 2.0, BuildMode::Fill, 9);
        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Main));

        // previously-solid terrain keeps its material
        assert_eq!(chunk.get_cell(16, 14, 16).material(), 2);
        // previously-air cells inside the sphere became material 9
        let filled = chunk.get_cell(16, 17, 16);
        assert!(filled.is_solid());
        assert_eq!(filled.material(), 9);
    }

    #[test]
    fn preview_target_leaves_main_data_alone() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        let op = sphere_op(point![4.0, 4.0, 4.0], 2.0, BuildMode::Add, 5);

        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Preview));
        assert!(chunk.get_cell(16, 16, 16).is_air());
        assert!(chunk.preview().unwrap()[flat_index(16, 16, 16)].is_solid());
    }

    #[test]
    fn rotation_is_applied_inverse() {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        // a thin slab standing on its side: rotated 90° about Z, its long
        // axis points along Y
        let op = BuildOp {
            center: point![4.0, 4.0, 4.0],
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, std::f32::consts::FRAC_PI_2),
            config: BuildConfig::solid(BuildShape::Cube, vector![3.0, 0.5, 0.5]),
            mode: BuildMode::Add,
            material: 5,
        };
        assert!(draw_to_chunk(&mut chunk, &op, BuildTarget::Main));

        // along +Y from center: inside; along +X: outside
        assert!(chunk.get_cell(16, 20, 16).is_solid());
        assert!(chunk.get_cell(20, 16, 16).is_air());
    }
}

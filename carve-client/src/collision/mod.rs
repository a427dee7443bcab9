//! the collision layer.
//!
//! each chunk's solid mesh layer feeds one triangle BVH, keyed by chunk and
//! rebuilt when the mesh generation advances. liquids and transparents never
//! collide. queries against missing BVHs simply miss; a zero-triangle mesh
//! stores nothing at all.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use carve_common::{
    aabb::Aabb,
    chunk::{ChunkPos, CELL_SIZE},
    prelude::*,
};

use crate::{
    mesh::{ChunkMeshes, MeshLayer, MeshLayerData, MeshLayerUpdated},
    store::ChunkUnloaded,
    stream::StreamLabel,
};

pub mod bvh;

pub use bvh::{ChunkBvh, Triangle};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RaycastHit {
    pub point: Point3<f32>,
    pub normal: Vector3<f32>,
    pub distance: f32,
    pub chunk: ChunkPos,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Contact {
    pub point: Point3<f32>,
    pub normal: Vector3<f32>,
    /// how far the query shape overlaps, along `normal`.
    pub depth: f32,
}

/// a vertical-ish capsule: a segment from `a` to `b` (offsets from the
/// owner's position) swept by `radius`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Capsule {
    pub radius: f32,
    pub a: Vector3<f32>,
    pub b: Vector3<f32>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CapsuleResolve {
    /// translation that moves the capsule out of the terrain.
    pub delta: Vector3<f32>,
    pub on_ground: bool,
    pub collided: bool,
}

struct ChunkCollider {
    generation: u64,
    bvh: ChunkBvh,
}

/// all chunk colliders, owned by the main task.
#[derive(Default)]
pub struct CollisionWorld {
    colliders: HashMap<ChunkPos, ChunkCollider>,
}

fn layer_triangles(pos: ChunkPos, layer: &MeshLayerData) -> Vec<Triangle> {
    let origin = pos.origin();
    let world_point = |index: u32| {
        let p = layer.positions[index as usize];
        origin + nalgebra::vector![p[0], p[1], p[2]] * CELL_SIZE
    };

    layer
        .indices
        .chunks_exact(3)
        .map(|tri| Triangle {
            a: world_point(tri[0]),
            b: world_point(tri[1]),
            c: world_point(tri[2]),
        })
        .collect()
}

impl CollisionWorld {
    /// (re)builds the collider for a chunk from its solid mesh layer. older
    /// generations are ignored; empty layers clear the collider.
    pub fn add_collider(&mut self, pos: ChunkPos, generation: u64, layer: &MeshLayerData) {
        if let Some(existing) = self.colliders.get(&pos) {
            if existing.generation >= generation {
                return;
            }
        }

        match ChunkBvh::build(layer_triangles(pos, layer)) {
            Some(bvh) => {
                self.colliders.insert(pos, ChunkCollider { generation, bvh });
            }
            None => {
                self.colliders.remove(&pos);
            }
        }
    }

    pub fn remove_collider(&mut self, pos: ChunkPos) -> bool {
        self.colliders.remove(&pos).is_some()
    }

    pub fn generation(&self, pos: ChunkPos) -> Option<u64> {
        self.colliders.get(&pos).map(|collider| collider.generation)
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn raycast(
        &self,
        origin: Point3<f32>,
        dir: Vector3<f32>,
        max_dist: f32,
    ) -> Option<RaycastHit> {
        let dir = dir.normalize();
        let mut best: Option<RaycastHit> = None;

        for (&pos, collider) in &self.colliders {
            let limit = best.map_or(max_dist, |hit| hit.distance);
            if let Some((distance, triangle)) = collider.bvh.raycast(&origin, &dir, limit) {
                if best.map_or(true, |hit| distance < hit.distance) {
                    best = Some(RaycastHit {
                        point: origin + dir * distance,
                        normal: triangle.normal(),
                        distance,
                        chunk: pos,
                    });
                }
            }
        }

        best
    }

    /// deepest contact of a sphere against the terrain, if any.
    pub fn sphere_collide(&self, center: Point3<f32>, radius: f32) -> Option<Contact> {
        let query = Aabb {
            min: center - nalgebra::vector![radius, radius, radius],
            max: center + nalgebra::vector![radius, radius, radius],
        };

        let mut deepest: Option<Contact> = None;
        for collider in self.colliders.values() {
            collider.bvh.for_each_in_aabb(&query, &mut |triangle| {
                if let Some(contact) = sphere_triangle_contact(&center, radius, triangle) {
                    if deepest.map_or(true, |best| contact.depth > best.depth) {
                        deepest = Some(contact);
                    }
                }
            });
        }
        deepest
    }

    /// iteratively pushes a capsule out of the terrain. near-vertical pushes
    /// are straightened to pure +Y so standing on slightly uneven ground
    /// doesn't jitter.
    pub fn resolve_capsule_collision(
        &self,
        capsule: &Capsule,
        position: Point3<f32>,
        velocity: Vector3<f32>,
        dt: f32,
    ) -> CapsuleResolve {
        const MAX_PASSES: usize = 8;
        const SKIN: f32 = 1e-4;

        let mut delta = Vector3::zeros();
        let mut collided = false;

        for _ in 0..MAX_PASSES {
            let a = position + capsule.a + delta;
            let b = position + capsule.b + delta;

            let mut query = Aabb::inverted();
            query.grow(&a);
            query.grow(&b);
            let query = query.inflate(capsule.radius + SKIN);

            let mut deepest: Option<(Vector3<f32>, f32)> = None;
            for collider in self.colliders.values() {
                collider.bvh.for_each_in_aabb(&query, &mut |triangle| {
                    if let Some((dir, depth)) = capsule_triangle_contact(&a, &b, capsule.radius, triangle) {
                        if deepest.map_or(true, |(_, best)| depth > best) {
                            deepest = Some((dir, depth));
                        }
                    }
                });
            }

            let (mut dir, depth) = match deepest {
                Some(hit) if hit.1 > SKIN => hit,
                _ => break,
            };

            if dir.y > 0.7 {
                dir = Vector3::y();
            }
            delta += dir * (depth + SKIN);
            collided = true;
        }

        let on_ground = delta.y > (dt * velocity.y * 0.25).abs();
        CapsuleResolve {
            delta,
            on_ground,
            collided,
        }
    }
}

fn sphere_triangle_contact(center: &Point3<f32>, radius: f32, triangle: &Triangle) -> Option<Contact> {
    let closest = triangle.closest_point(center);
    let offset = center - closest;
    let normal = triangle.normal();

    let side = offset.dot(&normal);
    let dist = offset.norm();

    if side >= 0.0 {
        if dist >= radius {
            return None;
        }
        let push = if dist > 1e-6 { offset / dist } else { normal };
        Some(Contact {
            point: closest,
            normal: push,
            depth: radius - dist,
        })
    } else {
        // the center sits behind the face: fully embedded
        Some(Contact {
            point: closest,
            normal,
            depth: radius + dist,
        })
    }
}

/// push-out direction and depth of a capsule segment against one triangle.
fn capsule_triangle_contact(
    a: &Point3<f32>,
    b: &Point3<f32>,
    radius: f32,
    triangle: &Triangle,
) -> Option<(Vector3<f32>, f32)> {
    let normal = triangle.normal();
    let axis = b - a;

    // reference point: where the segment crosses (or comes closest to) the
    // triangle's plane
    let denom = normal.dot(&axis);
    let reference = if denom.abs() > 1e-6 {
        let t = normal.dot(&(triangle.a - a)) / denom;
        a + axis * t.clamp(0.0, 1.0)
    } else {
        *a
    };

    let on_triangle = triangle.closest_point(&reference);
    let on_segment = closest_point_on_segment(a, b, &on_triangle);

    let offset = on_segment - on_triangle;
    let side = offset.dot(&normal);
    let dist = offset.norm();

    if side >= 0.0 {
        if dist >= radius {
            return None;
        }
        let dir = if dist > 1e-6 { offset / dist } else { normal };
        Some((dir, radius - dist))
    } else {
        Some((normal, radius + dist))
    }
}

fn closest_point_on_segment(a: &Point3<f32>, b: &Point3<f32>, p: &Point3<f32>) -> Point3<f32> {
    let axis = b - a;
    let len_sq = axis.norm_squared();
    if len_sq < 1e-12 {
        return *a;
    }
    let t = ((p - a).dot(&axis) / len_sq).clamp(0.0, 1.0);
    a + axis * t
}

/// mirrors solid mesh layers into colliders as their generations advance.
pub fn sync_colliders(
    mut updated: EventReader<MeshLayerUpdated>,
    meshes: Res<ChunkMeshes>,
    mut world: ResMut<CollisionWorld>,
) {
    for event in updated.iter() {
        if event.preview || event.layer != MeshLayer::Solid {
            continue;
        }

        match meshes.slots(event.pos).and_then(|slots| slots.layer(MeshLayer::Solid)) {
            Some(mesh) => world.add_collider(event.pos, event.generation, &mesh.data),
            None => {
                world.remove_collider(event.pos);
            }
        }
    }
}

pub fn drop_unloaded_colliders(
    mut unloaded: EventReader<ChunkUnloaded>,
    mut world: ResMut<CollisionWorld>,
) {
    for ChunkUnloaded(pos) in unloaded.iter() {
        world.remove_collider(*pos);
    }
}

#[derive(Debug, Default)]
pub struct CollisionPlugin {}

impl Plugin for CollisionPlugin {
    fn build(&self, app: &mut AppBuilder) {
        app.insert_resource(CollisionWorld::default());
        app.add_system(
            sync_colliders
                .system()
                .label(CollisionLabel("sync"))
                .after(StreamLabel("apply-packets")),
        );
        app.add_system(drop_unloaded_colliders.system().after(CollisionLabel("sync")));
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, SystemLabel)]
pub struct CollisionLabel(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::{expand_chunk, extract_mesh};
    use approx::assert_relative_eq;
    use carve_common::{
        chunk::Chunk,
        palette::{self, default_palette},
    };
    use nalgebra::{point, vector};

    /// flat terrain chunk at (0, 0, 0) with the surface at cell y = 10,
    /// meshed and registered as a collider.
    fn ground_world() -> CollisionWorld {
        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(10, palette::ROCK, 31);

        let layers = extract_mesh(&expand_chunk(&chunk, &(), false), &default_palette(), [false; 3]);
        let mut world = CollisionWorld::default();
        world.add_collider(chunk.pos(), 1, &layers[0]);
        assert_eq!(world.collider_count(), 1);
        world
    }

    #[test]
    fn empty_world_misses_everything() {
        let world = CollisionWorld::default();
        assert!(world.raycast(point![0.0, 10.0, 0.0], vector![0.0, -1.0, 0.0], 100.0).is_none());
        assert!(world.sphere_collide(point![0.0, 0.0, 0.0], 1.0).is_none());

        let capsule = Capsule {
            radius: 0.3,
            a: vector![0.0, 0.3, 0.0],
            b: vector![0.0, 1.5, 0.0],
        };
        let resolve =
            world.resolve_capsule_collision(&capsule, point![0.0, 0.0, 0.0], vector![0.0, -1.0, 0.0], 1.0 / 60.0);
        assert!(!resolve.collided);
        assert!(!resolve.on_ground);
        assert_relative_eq!(resolve.delta, Vector3::zeros());
    }

    #[test]
    fn zero_triangle_layers_store_no_collider() {
        let mut world = CollisionWorld::default();
        world.add_collider(ChunkPos::new([0, 0, 0]), 1, &MeshLayerData::default());
        assert_eq!(world.collider_count(), 0);
    }

    #[test]
    fn raycast_hits_the_ground() {
        let world = ground_world();

        // surface cells at y = 10 put the isosurface near world y = 2.6
        let hit = world
            .raycast(point![1.0, 10.0, 1.0], vector![0.0, -1.0, 0.0], 100.0)
            .expect("ray should hit the terrain");

        assert!((hit.point.y - 2.5).abs() < 0.5, "hit at y = {}", hit.point.y);
        assert!(hit.normal.y > 0.9);
        assert_eq!(hit.chunk, ChunkPos::new([0, 0, 0]));
        assert_relative_eq!(hit.distance, 10.0 - hit.point.y, epsilon = 1e-4);
    }

    #[test]
    fn capsule_settles_on_flat_ground() {
        let world = ground_world();

        let capsule = Capsule {
            radius: 0.3,
            a: vector![0.0, 0.3, 0.0],
            b: vector![0.0, 1.5, 0.0],
        };
        // the surface sits at ~2.625 m; start the capsule a metre under it
        let surface_y = 2.625;
        let position = point![4.0, surface_y - 1.0, 4.0];

        let resolve = world.resolve_capsule_collision(
            &capsule,
            position,
            vector![0.0, -1.0, 0.0],
            1.0 / 60.0,
        );

        assert!(resolve.collided);
        assert!(resolve.on_ground);
        assert!(resolve.delta.y > 0.0);
        assert!(resolve.delta.norm() < 1.1, "delta was {}", resolve.delta.norm());

        // after the push-out the capsule rests on (not in) the terrain
        let settled = position + resolve.delta;
        let bottom = settled + capsule.a;
        assert!(bottom.y >= surface_y + capsule.radius - 2e-2, "bottom at {}", bottom.y);
    }

    #[test]
    fn resting_capsule_reports_ground_without_motion() {
        let world = ground_world();
        let capsule = Capsule {
            radius: 0.3,
            a: vector![0.0, 0.3, 0.0],
            b: vector![0.0, 1.5, 0.0],
        };
        // barely touching: bottom sphere overlaps the surface by a hair
        let position = point![4.0, 2.625 - 0.01, 4.0];

        let resolve = world.resolve_capsule_collision(
            &capsule,
            position,
            vector![0.0, -1.0, 0.0],
            1.0 / 60.0,
        );
        assert!(resolve.collided);
        assert!(resolve.on_ground);
        assert!(resolve.delta.norm() < 0.1);
    }

    #[test]
    fn sphere_collide_reports_the_deepest_contact() {
        let world = ground_world();

        let contact = world
            .sphere_collide(point![4.0, 2.625 + 0.2, 4.0], 0.5)
            .expect("sphere should overlap the ground");
        assert!(contact.normal.y > 0.9);
        assert!(contact.depth > 0.25 && contact.depth < 0.35, "depth {}", contact.depth);

        assert!(world.sphere_collide(point![4.0, 5.0, 4.0], 0.5).is_none());
    }

    #[test]
    fn colliders_only_rebuild_for_newer_generations() {
        let mut world = ground_world();
        let pos = ChunkPos::new([0, 0, 0]);
        assert_eq!(world.generation(pos), Some(1));

        // same generation again: ignored
        world.add_collider(pos, 1, &MeshLayerData::default());
        assert_eq!(world.collider_count(), 1);

        // newer and empty: collider goes away
        world.add_collider(pos, 2, &MeshLayerData::default());
        assert_eq!(world.collider_count(), 0);
    }

    #[test]
    fn capsule_resolution_leaves_no_penetration() {
        let world = ground_world();
        let capsule = Capsule {
            radius: 0.3,
            a: vector![0.0, 0.3, 0.0],
            b: vector![0.0, 1.5, 0.0],
        };

        for &start in &[1.0f32, 1.8, 2.2, 2.6] {
            let position = point![3.0, start, 3.0];
            let resolve = world.resolve_capsule_collision(
                &capsule,
                position,
                vector![0.0, -1.0, 0.0],
                1.0 / 60.0,
            );
            let settled = position + resolve.delta;

            // min signed distance of the settled capsule to the terrain
            let bottom = settled + capsule.a;
            if let Some(contact) = world.sphere_collide(Point3::from(bottom.coords), capsule.radius) {
                assert!(contact.depth <= 1e-3, "still {} deep from y = {}", contact.depth, start);
            }
        }
    }
}

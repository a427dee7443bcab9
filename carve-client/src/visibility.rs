//! cave-culling visibility walk.
//!
//! every time the camera chunk changes (or every frame, it's cheap), a BFS
//! starts at the camera's chunk and flows outward through chunk faces. a
//! chunk's face connectivity summary gates the flow: if air provably can't
//! pass from the walk's entry face to an exit face, the walk doesn't either.
//! chunks the summary knows nothing about (absent, pending, or never
//! summarized) are treated as fully traversable — the walk is allowed to
//! overestimate, never to underestimate.
//!
//! the same walk drives two consumers: `reachable` is what the renderer
//! should consider drawing, and `to_request` is what streaming should load
//! ahead (reachable but absent). for the load decision the frustum test is
//! skipped.

use std::collections::VecDeque;

use nalgebra::{Point3, Vector3};

use carve_common::{
    aabb::Aabb,
    chunk::{ChunkPos, FaceMask},
    prelude::*,
    Side, SIDES,
};

use crate::{
    store::{ChunkSlot, ChunkStore},
    stream::{RequestQueue, StreamAnchor, StreamLabel},
};

/// what the walk needs to know about one chunk position.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChunkVis {
    /// not in the store at all; a candidate for `to_request`.
    Absent,
    /// requested but not arrived; traversed like an unknown chunk.
    Pending,
    /// resident, with its face summary if one has been computed.
    Resident(Option<FaceMask>),
}

#[derive(Clone, Debug)]
pub struct Frustum {
    /// planes as (normal, d) with `normal · p + d >= 0` inside.
    pub planes: [(Vector3<f32>, f32); 6],
}

impl Frustum {
    /// conservative test: rejects the box only if it is fully outside a plane.
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        for (normal, d) in &self.planes {
            let positive = nalgebra::point![
                if normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if normal.z >= 0.0 { aabb.max.z } else { aabb.min.z }
            ];
            if normal.dot(&positive.coords) + d < 0.0 {
                return false;
            }
        }
        true
    }
}

pub struct VisibilityOptions {
    /// taxicab radius of the walk, in chunks.
    pub radius: i32,
    /// when enabled, a parent's exit face that is entirely behind the camera
    /// plane is not crossed.
    pub back_cull: bool,
    /// render-path frustum; `None` for load-ahead walks.
    pub frustum: Option<Frustum>,
}

impl Default for VisibilityOptions {
    fn default() -> Self {
        Self {
            radius: 6,
            back_cull: false,
            frustum: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VisibilityOutput {
    pub reachable: Vec<ChunkPos>,
    pub to_request: Vec<ChunkPos>,
}

/// reusable BFS scratch. the visited map is a generation-stamped array over
/// the walk's bounding box, so nothing is cleared between walks.
pub struct VisibilityWalk {
    radius: i32,
    visited: Vec<u32>,
    generation: u32,
    queue: VecDeque<(ChunkPos, Option<Side>)>,
}

impl VisibilityWalk {
    pub fn new(radius: i32) -> Self {
        let dim = (2 * radius + 1) as usize;
        Self {
            radius,
            visited: vec![0; dim * dim * dim],
            generation: 0,
            queue: VecDeque::with_capacity(dim * dim * dim),
        }
    }

    fn visited_index(&self, center: ChunkPos, pos: ChunkPos) -> usize {
        let dim = (2 * self.radius + 1) as usize;
        let x = (pos.x - center.x + self.radius) as usize;
        let y = (pos.y - center.y + self.radius) as usize;
        let z = (pos.z - center.z + self.radius) as usize;
        x + y * dim + z * dim * dim
    }

    fn check_and_mark(&mut self, center: ChunkPos, pos: ChunkPos) -> bool {
        let index = self.visited_index(center, pos);
        if self.visited[index] == self.generation {
            return false;
        }
        self.visited[index] = self.generation;
        true
    }

    pub fn traverse<F>(
        &mut self,
        camera_pos: Point3<f32>,
        camera_forward: Vector3<f32>,
        options: &VisibilityOptions,
        mut lookup: F,
    ) -> VisibilityOutput
    where
        F: FnMut(ChunkPos) -> ChunkVis,
    {
        if options.radius != self.radius {
            *self = Self::new(options.radius);
        }
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.visited.iter_mut().for_each(|v| *v = 0);
            self.generation = 1;
        }
        self.queue.clear();

        let center = ChunkPos::at_world(camera_pos);
        let mut output = VisibilityOutput::default();

        self.check_and_mark(center, center);
        self.queue.push_back((center, None));

        while let Some((pos, entry)) = self.queue.pop_front() {
            let vis = lookup(pos);
            output.reachable.push(pos);
            if matches!(vis, ChunkVis::Absent) {
                output.to_request.push(pos);
            }

            // the camera's own chunk is always fully traversable; unknown
            // chunks traverse as if open
            let mask = match vis {
                _ if entry.is_none() => None,
                ChunkVis::Resident(mask) => mask,
                ChunkVis::Absent | ChunkVis::Pending => None,
            };

            for side in SIDES {
                let next = pos.neighbor(side);
                if next.taxicab_distance(center) > options.radius {
                    continue;
                }

                if let Some(mask) = mask {
                    if !mask.allows(entry, side) {
                        continue;
                    }
                }

                if options.back_cull && !face_reaches_forward(pos, side, camera_pos, camera_forward) {
                    continue;
                }

                if let Some(frustum) = &options.frustum {
                    if !frustum.contains_aabb(&next.aabb()) {
                        continue;
                    }
                }

                if self.check_and_mark(center, next) {
                    // the face we cross through is the neighbor's opposite face
                    self.queue.push_back((next, Some(side.opposite())));
                }
            }
        }

        output
    }
}

/// whether any corner of the chunk face lies on the camera's forward side.
fn face_reaches_forward(
    pos: ChunkPos,
    side: Side,
    camera_pos: Point3<f32>,
    camera_forward: Vector3<f32>,
) -> bool {
    let aabb = pos.aabb();
    let (fixed_axis, fixed_value) = match side {
        Side::Top => (1, aabb.max.y),
        Side::Bottom => (1, aabb.min.y),
        Side::Right => (0, aabb.max.x),
        Side::Left => (0, aabb.min.x),
        Side::Front => (2, aabb.max.z),
        Side::Back => (2, aabb.min.z),
    };

    let choices = [[aabb.min.x, aabb.max.x], [aabb.min.y, aabb.max.y], [aabb.min.z, aabb.max.z]];
    for i in 0..2 {
        for j in 0..2 {
            let mut corner = [0.0f32; 3];
            corner[fixed_axis] = fixed_value;
            let (a, b) = ((fixed_axis + 1) % 3, (fixed_axis + 2) % 3);
            corner[a] = choices[a][i];
            corner[b] = choices[b][j];
            let corner = nalgebra::point![corner[0], corner[1], corner[2]];
            if (corner - camera_pos).dot(&camera_forward) > 0.0 {
                return true;
            }
        }
    }
    false
}

/// chunks currently selected by the walk, refreshed every frame.
#[derive(Clone, Debug, Default)]
pub struct VisibleChunks {
    pub reachable: Vec<ChunkPos>,
}

fn store_lookup(store: &ChunkStore, pos: ChunkPos) -> ChunkVis {
    match store.slot(pos) {
        None => ChunkVis::Absent,
        Some(ChunkSlot::Pending { .. }) => ChunkVis::Pending,
        Some(ChunkSlot::Loaded(loaded)) => ChunkVis::Resident(loaded.chunk.face_mask()),
    }
}

pub fn update_visibility(
    mut walk: Local<Option<VisibilityWalk>>,
    options: Res<VisibilityOptions>,
    anchor: Res<StreamAnchor>,
    time: Res<Time>,
    mut store: ResMut<ChunkStore>,
    requests: Res<RequestQueue>,
    mut visible: ResMut<VisibleChunks>,
) {
    let walk = walk.get_or_insert_with(|| VisibilityWalk::new(options.radius));
    let output = walk.traverse(anchor.position, anchor.forward, &options, |pos| {
        store_lookup(&store, pos)
    });

    visible.reachable = output.reachable;

    // load ahead: cave culling already filtered what can't be seen
    let now = time.seconds_since_startup();
    for pos in output.to_request {
        if !store.contains(pos) {
            requests.request_chunk(pos);
            store.mark_pending(pos, now);
        }
    }
}

#[derive(Debug, Default)]
pub struct VisibilityPlugin {}

impl Plugin for VisibilityPlugin {
    fn build(&self, app: &mut AppBuilder) {
        app.insert_resource(VisibilityOptions::default());
        app.insert_resource(VisibleChunks::default());
        app.add_system(
            update_visibility
                .system()
                .label(VisibilityLabel("walk"))
                .after(StreamLabel("residency")),
        );
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, SystemLabel)]
pub struct VisibilityLabel(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn camera() -> (Point3<f32>, Vector3<f32>) {
        (nalgebra::point![4.0, 4.0, 4.0], nalgebra::vector![1.0, 0.0, 0.0])
    }

    fn walk_world(
        world: &HashMap<ChunkPos, ChunkVis>,
        options: &VisibilityOptions,
    ) -> VisibilityOutput {
        let (pos, forward) = camera();
        let mut walk = VisibilityWalk::new(options.radius);
        walk.traverse(pos, forward, options, |p| {
            world.get(&p).copied().unwrap_or(ChunkVis::Absent)
        })
    }

    #[test]
    fn open_world_reaches_the_whole_taxicab_ball() {
        let mut world = HashMap::new();
        for z in -3..=3 {
            for y in -3..=3 {
                for x in -3..=3 {
                    world.insert(
                        ChunkPos::new([x, y, z]),
                        ChunkVis::Resident(Some(FaceMask::ALL)),
                    );
                }
            }
        }

        let options = VisibilityOptions { radius: 2, ..Default::default() };
        let output = walk_world(&world, &options);

        // |x| + |y| + |z| <= 2 has 25 members
        assert_eq!(output.reachable.len(), 25);
        assert!(output.to_request.is_empty());
        assert!(output
            .reachable
            .iter()
            .all(|pos| pos.taxicab_distance(ChunkPos::new([0, 0, 0])) <= 2));
    }

    #[test]
    fn sealed_chunks_stop_the_walk() {
        let mut world = HashMap::new();
        for z in -2..=2 {
            for y in -2..=2 {
                for x in -2..=2 {
                    // a solid wall of chunks at x = 1
                    let mask = if x == 1 { FaceMask::NONE } else { FaceMask::ALL };
                    world.insert(ChunkPos::new([x, y, z]), ChunkVis::Resident(Some(mask)));
                }
            }
        }

        let options = VisibilityOptions { radius: 2, ..Default::default() };
        let output = walk_world(&world, &options);

        // the wall itself is reached, nothing behind it is
        assert!(output.reachable.contains(&ChunkPos::new([1, 0, 0])));
        assert!(!output.reachable.contains(&ChunkPos::new([2, 0, 0])));
        // the open side is unaffected
        assert!(output.reachable.contains(&ChunkPos::new([-2, 0, 0])));
    }

    #[test]
    fn unknown_summaries_are_fully_visible() {
        let mut world = HashMap::new();
        world.insert(ChunkPos::new([0, 0, 0]), ChunkVis::Resident(Some(FaceMask::ALL)));
        world.insert(ChunkPos::new([1, 0, 0]), ChunkVis::Resident(None));
        world.insert(ChunkPos::new([2, 0, 0]), ChunkVis::Resident(Some(FaceMask::ALL)));

        let options = VisibilityOptions { radius: 2, ..Default::default() };
        let output = walk_world(&world, &options);
        assert!(output.reachable.contains(&ChunkPos::new([2, 0, 0])));
    }

    #[test]
    fn absent_chunks_are_requested_and_traversed() {
        let mut world = HashMap::new();
        world.insert(ChunkPos::new([0, 0, 0]), ChunkVis::Resident(Some(FaceMask::ALL)));
        world.insert(ChunkPos::new([1, 0, 0]), ChunkVis::Pending);

        let options = VisibilityOptions { radius: 2, ..Default::default() };
        let output = walk_world(&world, &options);

        // pending chunks are not re-requested, absent ones are
        assert!(!output.to_request.contains(&ChunkPos::new([1, 0, 0])));
        assert!(output.to_request.contains(&ChunkPos::new([2, 0, 0])));
        // the walk continued through the pending chunk
        assert!(output.reachable.contains(&ChunkPos::new([2, 0, 0])));
    }

    #[test]
    fn back_cull_skips_faces_behind_the_camera() {
        let mut world = HashMap::new();
        for x in -2..=2 {
            world.insert(
                ChunkPos::new([x, 0, 0]),
                ChunkVis::Resident(Some(FaceMask::ALL)),
            );
        }

        let options = VisibilityOptions {
            radius: 2,
            back_cull: true,
            ..Default::default()
        };
        let output = walk_world(&world, &options);

        // looking along +X from the chunk center: -X is entirely behind
        assert!(!output.reachable.contains(&ChunkPos::new([-1, 0, 0])));
        assert!(output.reachable.contains(&ChunkPos::new([2, 0, 0])));
    }

    #[test]
    fn frustum_culls_render_selection() {
        let mut world = HashMap::new();
        for x in -2..=2 {
            world.insert(
                ChunkPos::new([x, 0, 0]),
                ChunkVis::Resident(Some(FaceMask::ALL)),
            );
        }

        // a single plane keeping x >= 0
        let frustum = Frustum {
            planes: [
                (nalgebra::vector![1.0, 0.0, 0.0], 0.0),
                (nalgebra::vector![0.0, 0.0, 0.0], 1.0),
                (nalgebra::vector![0.0, 0.0, 0.0], 1.0),
                (nalgebra::vector![0.0, 0.0, 0.0], 1.0),
                (nalgebra::vector![0.0, 0.0, 0.0], 1.0),
                (nalgebra::vector![0.0, 0.0, 0.0], 1.0),
            ],
        };
        let options = VisibilityOptions {
            radius: 2,
            back_cull: false,
            frustum: Some(frustum),
        };
        let output = walk_world(&world, &options);

        assert!(output.reachable.contains(&ChunkPos::new([1, 0, 0])));
        assert!(!output.reachable.contains(&ChunkPos::new([-2, 0, 0])));
    }
}

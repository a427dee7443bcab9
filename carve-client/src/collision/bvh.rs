//! per-chunk triangle BVH.
//!
//! built once per mesh generation: recursive median split along the longest
//! axis of the node bounds, stopping at 8 triangles per leaf. queries are the
//! usual slab-test descent.

use nalgebra::{Point3, Vector3};

use carve_common::aabb::Aabb;

pub const LEAF_TRIANGLES: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triangle {
    pub a: Point3<f32>,
    pub b: Point3<f32>,
    pub c: Point3<f32>,
}

impl Triangle {
    pub fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::inverted();
        aabb.grow(&self.a);
        aabb.grow(&self.b);
        aabb.grow(&self.c);
        aabb
    }

    pub fn centroid(&self) -> Point3<f32> {
        Point3::from((self.a.coords + self.b.coords + self.c.coords) / 3.0)
    }

    /// geometric normal; with the mesher's winding it points from solid into
    /// air.
    pub fn normal(&self) -> Vector3<f32> {
        let normal = (self.b - self.a).cross(&(self.c - self.a));
        let len = normal.norm();
        if len > 1e-12 {
            normal / len
        } else {
            Vector3::y()
        }
    }

    /// closest point on the triangle to `p` (Ericson, Real-Time Collision
    /// Detection, 5.1.5).
    pub fn closest_point(&self, p: &Point3<f32>) -> Point3<f32> {
        let ab = self.b - self.a;
        let ac = self.c - self.a;
        let ap = p - self.a;

        let d1 = ab.dot(&ap);
        let d2 = ac.dot(&ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return self.a;
        }

        let bp = p - self.b;
        let d3 = ab.dot(&bp);
        let d4 = ac.dot(&bp);
        if d3 >= 0.0 && d4 <= d3 {
            return self.b;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return self.a + ab * v;
        }

        let cp = p - self.c;
        let d5 = ab.dot(&cp);
        let d6 = ac.dot(&cp);
        if d6 >= 0.0 && d5 <= d6 {
            return self.c;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return self.a + ac * w;
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return self.b + (self.c - self.b) * w;
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        self.a + ab * v + ac * w
    }

    /// Möller–Trumbore. returns the distance along the (unit) ray direction.
    pub fn raycast(&self, origin: &Point3<f32>, dir: &Vector3<f32>) -> Option<f32> {
        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;
        let pvec = dir.cross(&edge2);
        let det = edge1.dot(&pvec);
        if det.abs() < 1e-9 {
            return None;
        }

        let inv_det = 1.0 / det;
        let tvec = origin - self.a;
        let u = tvec.dot(&pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let qvec = tvec.cross(&edge1);
        let v = dir.dot(&qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(&qvec) * inv_det;
        if t >= 0.0 {
            Some(t)
        } else {
            None
        }
    }
}

fn ray_hits_aabb(origin: &Point3<f32>, inv_dir: &Vector3<f32>, aabb: &Aabb, max_dist: f32) -> bool {
    let t1x = (aabb.min.x - origin.x) * inv_dir.x;
    let t2x = (aabb.max.x - origin.x) * inv_dir.x;
    let t1y = (aabb.min.y - origin.y) * inv_dir.y;
    let t2y = (aabb.max.y - origin.y) * inv_dir.y;
    let t1z = (aabb.min.z - origin.z) * inv_dir.z;
    let t2z = (aabb.max.z - origin.z) * inv_dir.z;

    let tmin = t1x.min(t2x).max(t1y.min(t2y)).max(t1z.min(t2z));
    let tmax = t1x.max(t2x).min(t1y.max(t2y)).min(t1z.max(t2z));

    tmax >= tmin && tmax >= 0.0 && tmin <= max_dist
}

#[derive(Copy, Clone, Debug)]
struct BvhNode {
    aabb: Aabb,
    /// leaf: first index into `order`. internal: index of the left child
    /// (the right child is `left_first + 1`).
    left_first: u32,
    /// triangle count; zero for internal nodes.
    count: u32,
}

impl BvhNode {
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

pub struct ChunkBvh {
    nodes: Vec<BvhNode>,
    triangles: Vec<Triangle>,
    order: Vec<u32>,
}

impl ChunkBvh {
    /// builds a BVH over the given triangles; `None` when there is nothing
    /// to collide with.
    pub fn build(triangles: Vec<Triangle>) -> Option<ChunkBvh> {
        if triangles.is_empty() {
            return None;
        }

        let mut bvh = ChunkBvh {
            order: (0..triangles.len() as u32).collect(),
            nodes: Vec::with_capacity(triangles.len() * 2),
            triangles,
        };

        let count = bvh.order.len();
        bvh.nodes.push(BvhNode {
            aabb: Aabb::inverted(),
            left_first: 0,
            count: count as u32,
        });
        bvh.build_node(0, 0, count);
        Some(bvh)
    }

    fn range_aabb(&self, first: usize, count: usize) -> Aabb {
        let mut aabb = Aabb::inverted();
        for &index in &self.order[first..first + count] {
            let triangle = &self.triangles[index as usize];
            aabb.grow(&triangle.a);
            aabb.grow(&triangle.b);
            aabb.grow(&triangle.c);
        }
        aabb
    }

    fn build_node(&mut self, node: usize, first: usize, count: usize) {
        self.nodes[node].aabb = self.range_aabb(first, count);

        if count <= LEAF_TRIANGLES {
            self.nodes[node].left_first = first as u32;
            self.nodes[node].count = count as u32;
            return;
        }

        // median split along the longest axis of the node bounds
        let axis = self.nodes[node].aabb.longest_axis() as usize;
        let mid = count / 2;
        let triangles = &self.triangles;
        self.order[first..first + count].select_nth_unstable_by(mid, |&a, &b| {
            let ca = triangles[a as usize].centroid()[axis];
            let cb = triangles[b as usize].centroid()[axis];
            ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let left = self.nodes.len();
        self.nodes.push(BvhNode {
            aabb: Aabb::inverted(),
            left_first: 0,
            count: 0,
        });
        self.nodes.push(BvhNode {
            aabb: Aabb::inverted(),
            left_first: 0,
            count: 0,
        });
        self.nodes[node].left_first = left as u32;
        self.nodes[node].count = 0;

        self.build_node(left, first, mid);
        self.build_node(left + 1, first + mid, count - mid);
    }

    pub fn aabb(&self) -> Aabb {
        self.nodes[0].aabb
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn raycast(&self, origin: &Point3<f32>, dir: &Vector3<f32>, max_dist: f32) -> Option<(f32, &Triangle)> {
        let inv_dir = Vector3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
        let mut best: Option<(f32, &Triangle)> = None;
        let mut stack = vec![0usize];

        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            let limit = best.map_or(max_dist, |(t, _)| t);
            if !ray_hits_aabb(origin, &inv_dir, &node.aabb, limit) {
                continue;
            }

            if node.is_leaf() {
                let first = node.left_first as usize;
                for &index in &self.order[first..first + node.count as usize] {
                    let triangle = &self.triangles[index as usize];
                    if let Some(t) = triangle.raycast(origin, dir) {
                        if t <= limit && best.map_or(true, |(bt, _)| t < bt) {
                            best = Some((t, triangle));
                        }
                    }
                }
            } else {
                stack.push(node.left_first as usize);
                stack.push(node.left_first as usize + 1);
            }
        }

        best
    }

    /// visits every triangle whose node bounds intersect the query box.
    pub fn for_each_in_aabb<F>(&self, query: &Aabb, func: &mut F)
    where
        F: FnMut(&Triangle),
    {
        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            if !node.aabb.intersects(query) {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_first as usize;
                for &index in &self.order[first..first + node.count as usize] {
                    func(&self.triangles[index as usize]);
                }
            } else {
                stack.push(node.left_first as usize);
                stack.push(node.left_first as usize + 1);
            }
        }
    }
}

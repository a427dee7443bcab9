use nalgebra::{vector, Point3, Vector3};

use crate::Axis;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn with_dimensions(dims: Vector3<f32>) -> Self {
        let half_dims = dims / 2.0;
        Aabb {
            min: Point3::from(-half_dims),
            max: Point3::from(half_dims),
        }
    }

    /// the empty box, an identity for [`Aabb::union`] and [`Aabb::grow`].
    pub fn inverted() -> Self {
        Aabb {
            min: Point3::from(vector![f32::MAX, f32::MAX, f32::MAX]),
            max: Point3::from(vector![f32::MIN, f32::MIN, f32::MIN]),
        }
    }

    #[rustfmt::skip]
    pub fn contains(&self, point: &Point3<f32>) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    #[rustfmt::skip]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    pub fn intersects_sphere(&self, center: &Point3<f32>, radius: f32) -> bool {
        let closest = self.closest_point(center);
        (closest - center).norm_squared() <= radius * radius
    }

    pub fn closest_point(&self, point: &Point3<f32>) -> Point3<f32> {
        nalgebra::point![
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z)
        ]
    }

    pub fn dimensions(&self) -> Vector3<f32> {
        vector![
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z
        ]
    }

    pub fn center(&self) -> Point3<f32> {
        self.min + self.dimensions() / 2.0
    }

    pub fn translated(&self, translation: Vector3<f32>) -> Aabb {
        Aabb {
            min: self.min + translation,
            max: self.max + translation,
        }
    }

    pub fn inflate(&self, distance: f32) -> Aabb {
        Aabb {
            min: self.min - vector![distance, distance, distance],
            max: self.max + vector![distance, distance, distance],
        }
    }

    pub fn grow(&mut self, point: &Point3<f32>) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut res = *self;
        res.grow(&other.min);
        res.grow(&other.max);
        res
    }

    pub fn longest_axis(&self) -> Axis {
        let dims = self.dimensions();
        if dims.x >= dims.y && dims.x >= dims.z {
            Axis::X
        } else if dims.y >= dims.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    #[test]
    fn intersection_is_inclusive() {
        let a = Aabb {
            min: point![0.0, 0.0, 0.0],
            max: point![1.0, 1.0, 1.0],
        };
        let b = a.translated(vector![1.0, 0.0, 0.0]);
        let c = a.translated(vector![1.5, 0.0, 0.0]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn grow_covers_points() {
        let mut aabb = Aabb::inverted();
        aabb.grow(&point![1.0, -2.0, 0.5]);
        aabb.grow(&point![-1.0, 3.0, 0.0]);
        assert!(aabb.contains(&point![0.0, 0.0, 0.25]));
        assert_eq!(aabb.longest_axis(), Axis::Y);
    }

    #[test]
    fn sphere_test_uses_closest_point() {
        let aabb = Aabb {
            min: point![0.0, 0.0, 0.0],
            max: point![1.0, 1.0, 1.0],
        };
        assert!(aabb.intersects_sphere(&point![1.5, 0.5, 0.5], 0.6));
        assert!(!aabb.intersects_sphere(&point![1.5, 0.5, 0.5], 0.4));
    }
}

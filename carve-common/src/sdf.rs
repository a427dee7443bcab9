//! signed distance functions for build shapes.
//!
//! every function takes a point in the shape's local frame (the build op
//! inverse-rotates world points before sampling) and follows the usual
//! contract: negative strictly inside, zero on the surface, positive outside,
//! continuous across the boundary. distances are in world metres.

use nalgebra::{Point3, Vector3};

use crate::cell::{WEIGHT_MAX_F, WEIGHT_MIN_F};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildShape {
    Cube,
    Sphere,
    Cylinder,
    Prism,
}

impl BuildShape {
    pub fn code(&self) -> u8 {
        match self {
            BuildShape::Cube => 0,
            BuildShape::Sphere => 1,
            BuildShape::Cylinder => 2,
            BuildShape::Prism => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<BuildShape> {
        Some(match code {
            0 => BuildShape::Cube,
            1 => BuildShape::Sphere,
            2 => BuildShape::Cylinder,
            3 => BuildShape::Prism,
            _ => return None,
        })
    }
}

/// the shape half of a build op: what to carve, not where or how.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BuildConfig {
    pub shape: BuildShape,
    /// full extents per axis, in metres. spheres use only `x`; cylinders use
    /// `x` (diameter) and `y` (height).
    pub size: Vector3<f32>,
    /// `Some` turns the shape into a shell of this wall thickness.
    pub thickness: Option<f32>,
    /// hollow cubes and cylinders keep their top/bottom caps only when
    /// closed; spheres and prisms are always closed shells.
    pub closed: bool,
    /// keeps only the part of the shape whose XZ angle is within this many
    /// radians of the +X axis.
    pub arc_sweep: Option<f32>,
}

impl BuildConfig {
    pub fn solid(shape: BuildShape, size: Vector3<f32>) -> Self {
        Self {
            shape,
            size,
            thickness: None,
            closed: true,
            arc_sweep: None,
        }
    }

    /// radius of a sphere bounding the whole shape, used for AABB estimates.
    pub fn bounding_radius(&self) -> f32 {
        self.size.norm() * 0.5
    }
}

pub fn sd_sphere(p: Point3<f32>, radius: f32) -> f32 {
    p.coords.norm() - radius
}

pub fn sd_box(p: Point3<f32>, half: Vector3<f32>) -> f32 {
    let q = p.coords.abs() - half;
    let outside = Vector3::new(q.x.max(0.0), q.y.max(0.0), q.z.max(0.0)).norm();
    let inside = q.x.max(q.y).max(q.z).min(0.0);
    outside + inside
}

pub fn sd_cylinder(p: Point3<f32>, radius: f32, half_height: f32) -> f32 {
    let dx = (p.x * p.x + p.z * p.z).sqrt() - radius;
    let dy = p.y.abs() - half_height;
    let outside = (dx.max(0.0).powi(2) + dy.max(0.0).powi(2)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// triangular prism extruded along Z.
pub fn sd_prism(p: Point3<f32>, width: f32, half_depth: f32) -> f32 {
    let qx = p.x.abs();
    let qz = p.z.abs();
    (qz - half_depth).max((qx * 0.866_025 + p.y * 0.5).max(-p.y) - width * 0.5)
}

pub fn hollow(d: f32, thickness: f32) -> f32 {
    d.abs() - thickness
}

/// restricts `d` to the wedge of XZ angles within `angle` of +X. beyond the
/// wedge the distance to the cut plane takes over, so the field stays
/// continuous.
pub fn arc_sweep(p: Point3<f32>, d: f32, angle: f32) -> f32 {
    let a = p.z.atan2(p.x).abs();
    let r = (p.x * p.x + p.z * p.z).sqrt();
    d.max((a - angle) * r)
}

/// evaluates the full configured field: primitive, then hollowing (with cap
/// removal for open cubes/cylinders), then the arc sweep.
pub fn sdf_from_config(p: Point3<f32>, config: &BuildConfig) -> f32 {
    let half = config.size * 0.5;

    let mut d = match config.shape {
        BuildShape::Sphere => sd_sphere(p, half.x),
        BuildShape::Cube => sd_box(p, half),
        BuildShape::Cylinder => sd_cylinder(p, half.x, half.y),
        BuildShape::Prism => sd_prism(p, config.size.x, half.z),
    };

    if let Some(thickness) = config.thickness {
        d = if config.closed {
            hollow(d, thickness)
        } else {
            match config.shape {
                // an open shell keeps only the side walls: hollow the
                // infinite extrusion and cut it to height.
                BuildShape::Cylinder => {
                    let wall = ((p.x * p.x + p.z * p.z).sqrt() - half.x).abs() - thickness;
                    wall.max(p.y.abs() - half.y)
                }
                BuildShape::Cube => {
                    let qx = p.x.abs() - half.x;
                    let qz = p.z.abs() - half.z;
                    let outside = (qx.max(0.0).powi(2) + qz.max(0.0).powi(2)).sqrt();
                    let wall = (outside + qx.max(qz).min(0.0)).abs() - thickness;
                    wall.max(p.y.abs() - half.y)
                }
                _ => hollow(d, thickness),
            }
        };
    }

    if let Some(angle) = config.arc_sweep {
        d = arc_sweep(p, d, angle);
    }

    d
}

/// converts a signed distance in metres into the cell weight band.
pub fn sdf_to_weight(d: f32) -> f32 {
    (-d).clamp(WEIGHT_MIN_F, WEIGHT_MAX_F)
}

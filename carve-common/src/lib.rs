use nalgebra::{vector, Vector3};
use num_traits::{One, Zero};
use serde_derive::{Deserialize, Serialize};
use std::ops::Neg;

pub mod aabb;
pub mod cell;
pub mod chunk;
pub mod edit;
pub mod lighting;
pub mod net;
pub mod palette;
pub mod sdf;
pub mod tile;
pub mod util;

pub mod math {
    pub use nalgebra::{Matrix3, Matrix4, Point1, Point2, Point3, UnitQuaternion, Vector2, Vector3, Vector4};
}

pub mod prelude {
    pub use super::util;

    pub use bevy_app::prelude::*;
    pub use bevy_core::prelude::*;
    pub use bevy_ecs::prelude::*;

    pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
    pub use anyhow::{anyhow, bail};

    pub use nalgebra::{point, vector};
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

/// Six sides of a cube.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Positive Y.
    Top,
    /// Negative Y.
    Bottom,
    /// Positive X.
    Right,
    /// Negative X.
    Left,
    /// Positive Z.
    Front,
    /// Negative Z.
    Back,
}

pub const SIDES: [Side; 6] = [
    Side::Top,
    Side::Bottom,
    Side::Right,
    Side::Left,
    Side::Front,
    Side::Back,
];

impl Side {
    pub fn normal<S: nalgebra::Scalar + One + Zero + Neg<Output = S>>(&self) -> Vector3<S> {
        match *self {
            Side::Top => vector!(S::zero(), S::one(), S::zero()),
            Side::Bottom => vector!(S::zero(), -S::one(), S::zero()),
            Side::Right => vector!(S::one(), S::zero(), S::zero()),
            Side::Left => vector!(-S::one(), S::zero(), S::zero()),
            Side::Front => vector!(S::zero(), S::zero(), S::one()),
            Side::Back => vector!(S::zero(), S::zero(), -S::one()),
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Top => Side::Bottom,
            Side::Bottom => Side::Top,
            Side::Right => Side::Left,
            Side::Left => Side::Right,
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }

    /// stable index in `[0, 6)`, used for face bit masks and per-side tables.
    pub fn index(&self) -> usize {
        match self {
            Side::Top => 0,
            Side::Bottom => 1,
            Side::Right => 2,
            Side::Left => 3,
            Side::Front => 4,
            Side::Back => 5,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Faces<T> {
    pub top: T,
    pub bottom: T,
    pub right: T,
    pub left: T,
    pub front: T,
    pub back: T,
}

impl<T> Faces<T> {
    pub fn map<U, F>(self, mut func: F) -> Faces<U>
    where
        F: FnMut(T) -> U,
    {
        Faces {
            top: func(self.top),
            bottom: func(self.bottom),
            left: func(self.left),
            right: func(self.right),
            front: func(self.front),
            back: func(self.back),
        }
    }

    pub fn all<F>(&self, mut func: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        func(&self.top)
            && func(&self.bottom)
            && func(&self.left)
            && func(&self.right)
            && func(&self.front)
            && func(&self.back)
    }

    pub fn any<F>(&self, mut func: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        func(&self.top)
            || func(&self.bottom)
            || func(&self.left)
            || func(&self.right)
            || func(&self.front)
            || func(&self.back)
    }
}

impl<T> std::ops::Index<Side> for Faces<T> {
    type Output = T;

    fn index(&self, index: Side) -> &Self::Output {
        match index {
            Side::Top => &self.top,
            Side::Bottom => &self.bottom,
            Side::Right => &self.right,
            Side::Left => &self.left,
            Side::Front => &self.front,
            Side::Back => &self.back,
        }
    }
}

impl<T> std::ops::IndexMut<Side> for Faces<T> {
    fn index_mut(&mut self, index: Side) -> &mut Self::Output {
        match index {
            Side::Top => &mut self.top,
            Side::Bottom => &mut self.bottom,
            Side::Right => &mut self.right,
            Side::Left => &mut self.left,
            Side::Front => &mut self.front,
            Side::Back => &mut self.back,
        }
    }
}

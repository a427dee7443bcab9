//! the client half of the voxel core: chunk streaming, meshing, visibility,
//! and collision. rendering is not here; the renderer subscribes to mesh
//! layer events and mirrors the geometry buffers however it likes.

pub mod collision;
pub mod mesh;
pub mod mesher;
pub mod store;
pub mod stream;
pub mod visibility;

pub mod prelude {
    pub use carve_common::prelude::*;
}

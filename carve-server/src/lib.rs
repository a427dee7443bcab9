//! the authoritative server half of the voxel core.
//!
//! owns the canonical chunk and tile state, validates build intents, applies
//! committed edits with the same draw code the clients run, bundles surface
//! columns, and persists chunk/tile blobs. wire transport is external; the
//! [`session::Server`] router maps decoded client packets to replies and
//! broadcasts.

pub mod config;
pub mod persist;
pub mod runner;
pub mod session;
pub mod validate;
pub mod world;

pub mod prelude {
    pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
    pub use anyhow::{anyhow, bail};
}

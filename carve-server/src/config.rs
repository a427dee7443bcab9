use serde_derive::Deserialize;
use std::{fs::File, path::{Path, PathBuf}};

use crate::prelude::*;

/// server-side tuning, loaded once at startup. everything has a default so a
/// bare server runs without a config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(default)]
pub struct ServerConfig {
    /// builds farther than this from the requesting player are rejected
    /// (metres).
    pub build_distance_cap: f32,
    /// per-axis size limit of a build shape (metres).
    pub max_build_size: f32,
    /// build intents allowed per player within one rate window.
    pub rate_limit: u32,
    /// rate window length in seconds.
    pub rate_window: f64,
    /// global cell Y of the fallback flat terrain used when no persisted
    /// chunk exists.
    pub fallback_surface_y: i32,
    pub fallback_surface_material: u8,
    /// where chunk and tile blobs live; `None` disables persistence.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            build_distance_cap: 12.0,
            max_build_size: 20.0,
            rate_limit: 10,
            rate_window: 1.0,
            fallback_surface_y: 10,
            fallback_surface_material: carve_common::palette::GRASS,
            data_dir: None,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
    Ok(serde_json::from_reader(File::open(path)?)?)
}

//! the material palette.
//!
//! every material id in `[0, 127]` maps to a [`MaterialKind`] and an emission
//! light level. the palette is loaded once at startup and passed around as an
//! `Arc` handle; nothing mutates it afterwards, so the hot paths read from two
//! plain arrays without any locking.

use crate::{cell::LIGHT_MAX, prelude::*};
use serde_derive::Deserialize;
use std::{fs::File, path::Path, sync::Arc};

pub const MATERIAL_COUNT: usize = 128;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaterialKind {
    Solid,
    Transparent,
    Liquid,
}

impl MaterialKind {
    /// Returns `true` if the material kind is [`Solid`].
    ///
    /// [`Solid`]: MaterialKind::Solid
    pub fn is_solid(&self) -> bool {
        matches!(self, Self::Solid)
    }

    pub fn is_liquid(&self) -> bool {
        matches!(self, Self::Liquid)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MaterialDescription {
    id: u8,
    name: String,
    kind: MaterialKind,
    #[serde(default)]
    emission: u8,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PaletteManifest {
    materials: Vec<MaterialDescription>,
}

// kinds and emissions are parallel arrays indexed by material id; material
// dispatch is a branch on the kind enum, not a method lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialPalette {
    kinds: [MaterialKind; MATERIAL_COUNT],
    emissions: [u8; MATERIAL_COUNT],
}

impl Default for MaterialPalette {
    fn default() -> Self {
        Self {
            kinds: [MaterialKind::Solid; MATERIAL_COUNT],
            emissions: [0; MATERIAL_COUNT],
        }
    }
}

impl MaterialPalette {
    #[inline(always)]
    pub fn kind(&self, material: u8) -> MaterialKind {
        self.kinds[material as usize & (MATERIAL_COUNT - 1)]
    }

    #[inline(always)]
    pub fn emission(&self, material: u8) -> u8 {
        self.emissions[material as usize & (MATERIAL_COUNT - 1)]
    }

    /// whether a solid cell of this material blocks light completely.
    #[inline(always)]
    pub fn is_opaque(&self, material: u8) -> bool {
        self.kind(material).is_solid()
    }
}

pub fn load_palette<P: AsRef<Path>>(path: P) -> Result<Arc<MaterialPalette>> {
    let manifest: PaletteManifest = serde_json::from_reader(File::open(path)?)?;
    let mut palette = MaterialPalette::default();

    for material in manifest.materials {
        if material.emission as u16 > LIGHT_MAX {
            bail!(
                "material '{}' has emission {} outside [0, {}]",
                material.name,
                material.emission,
                LIGHT_MAX
            );
        }
        palette.kinds[material.id as usize] = material.kind;
        palette.emissions[material.id as usize] = material.emission;
    }

    Ok(Arc::new(palette))
}

/// the built-in palette used by tests and by servers running without a
/// manifest: a handful of solids, glass, water, and a single emissive lamp.
pub fn default_palette() -> Arc<MaterialPalette> {
    let mut palette = MaterialPalette::default();
    palette.kinds[GLASS as usize] = MaterialKind::Transparent;
    palette.kinds[WATER as usize] = MaterialKind::Liquid;
    palette.emissions[LAMP as usize] = LIGHT_MAX as u8;
    Arc::new(palette)
}

pub const ROCK: u8 = 1;
pub const DIRT: u8 = 2;
pub const GRASS: u8 = 3;
pub const SAND: u8 = 4;
pub const GLASS: u8 = 8;
pub const WATER: u8 = 9;
pub const LAMP: u8 = 10;

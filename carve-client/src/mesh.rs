//! chunk mesh layers and their lifecycle.
//!
//! every chunk exposes up to three meshes at a time, one per material kind
//! (solid / transparent / liquid), plus a parallel triple for previews. the
//! core never touches a scene graph: a mesh here is a set of plain buffers
//! with a generation counter, and the renderer mirrors them by listening to
//! [`MeshLayerUpdated`] events. buffers are swapped in place so downstream
//! systems can key off object identity plus generation.

use std::collections::HashMap;

use carve_common::{
    chunk::ChunkPos,
    palette::MaterialKind,
    prelude::*,
};

pub const LAYER_COUNT: usize = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MeshLayer {
    Solid,
    Transparent,
    Liquid,
}

pub const LAYERS: [MeshLayer; LAYER_COUNT] = [MeshLayer::Solid, MeshLayer::Transparent, MeshLayer::Liquid];

impl MeshLayer {
    pub fn index(&self) -> usize {
        match self {
            MeshLayer::Solid => 0,
            MeshLayer::Transparent => 1,
            MeshLayer::Liquid => 2,
        }
    }

    pub fn from_index(index: usize) -> MeshLayer {
        LAYERS[index]
    }

    pub fn from_kind(kind: MaterialKind) -> MeshLayer {
        match kind {
            MaterialKind::Solid => MeshLayer::Solid,
            MaterialKind::Transparent => MeshLayer::Transparent,
            MaterialKind::Liquid => MeshLayer::Liquid,
        }
    }

    /// render conventions per layer: (casts shadows, receives shadows,
    /// render order). liquids draw last and cast nothing.
    pub fn settings(&self) -> LayerSettings {
        match self {
            MeshLayer::Solid => LayerSettings {
                casts_shadow: true,
                receives_shadow: true,
                render_order: 0,
            },
            MeshLayer::Transparent => LayerSettings {
                casts_shadow: true,
                receives_shadow: true,
                render_order: 1,
            },
            MeshLayer::Liquid => LayerSettings {
                casts_shadow: false,
                receives_shadow: true,
                render_order: 2,
            },
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LayerSettings {
    pub casts_shadow: bool,
    pub receives_shadow: bool,
    pub render_order: i32,
}

/// geometry buffers for one material-kind layer of one chunk. positions are
/// in cell units within `[0, 32)`; the chunk's world transform places them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshLayerData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub materials: Vec<u8>,
    pub ao: Vec<u8>,
    pub light: Vec<u8>,
    pub indices: Vec<u32>,
}

impl MeshLayerData {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// one live mesh slot. the struct is kept across buffer swaps so its identity
/// is stable; `generation` tells consumers when the contents changed.
#[derive(Clone, Debug)]
pub struct ChunkMesh {
    pub layer: MeshLayer,
    pub data: MeshLayerData,
    pub generation: u64,
    pub preview: bool,
    pub visible: bool,
    pub settings: LayerSettings,
}

#[derive(Default)]
pub struct ChunkMeshSlots {
    main: [Option<ChunkMesh>; LAYER_COUNT],
    preview: [Option<ChunkMesh>; LAYER_COUNT],
    preview_active: bool,
    generation: u64,
}

impl ChunkMeshSlots {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layer(&self, layer: MeshLayer) -> Option<&ChunkMesh> {
        self.main[layer.index()].as_ref()
    }

    pub fn preview_layer(&self, layer: MeshLayer) -> Option<&ChunkMesh> {
        self.preview[layer.index()].as_ref()
    }

    pub fn preview_active(&self) -> bool {
        self.preview_active
    }

    fn update_slots(
        slots: &mut [Option<ChunkMesh>; LAYER_COUNT],
        layers: [MeshLayerData; LAYER_COUNT],
        generation: u64,
        preview: bool,
        visible: bool,
    ) {
        for (index, data) in layers.into_iter().enumerate() {
            let layer = MeshLayer::from_index(index);
            let slot = &mut slots[index];

            if data.is_empty() {
                // empty payload disposes the old mesh
                *slot = None;
                continue;
            }

            match slot {
                // swap buffers in place, preserving mesh identity
                Some(mesh) => {
                    mesh.data = data;
                    mesh.generation = generation;
                }
                None => {
                    *slot = Some(ChunkMesh {
                        layer,
                        data,
                        generation,
                        preview,
                        visible,
                        settings: layer.settings(),
                    });
                }
            }
        }
    }

    /// installs freshly meshed geometry into the main slots and bumps the
    /// generation counter.
    pub fn update_from_data(&mut self, layers: [MeshLayerData; LAYER_COUNT]) -> u64 {
        self.generation += 1;
        let visible = !self.preview_active;
        Self::update_slots(&mut self.main, layers, self.generation, false, visible);
        self.generation
    }

    pub fn update_preview(&mut self, layers: [MeshLayerData; LAYER_COUNT]) -> u64 {
        self.generation += 1;
        Self::update_slots(&mut self.preview, layers, self.generation, true, self.preview_active);
        self.generation
    }

    /// showing the preview hides the main meshes; deactivating disposes the
    /// preview meshes.
    pub fn set_preview_active(&mut self, active: bool) {
        if self.preview_active == active {
            return;
        }
        self.preview_active = active;

        for slot in self.main.iter_mut().flatten() {
            slot.visible = !active;
        }
        if active {
            for slot in self.preview.iter_mut().flatten() {
                slot.visible = true;
            }
        } else {
            self.preview = Default::default();
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        for slot in self.main.iter_mut().flatten() {
            slot.visible = visible && !self.preview_active;
        }
    }

    /// cosmetic override of the per-layer shadow conventions.
    pub fn set_shadows(&mut self, casts: bool, receives: bool) {
        for slot in self.main.iter_mut().chain(self.preview.iter_mut()).flatten() {
            slot.settings.casts_shadow = casts;
            slot.settings.receives_shadow = receives;
        }
    }
}

/// all chunk meshes, keyed by chunk position. owned by the main task.
#[derive(Default)]
pub struct ChunkMeshes {
    slots: HashMap<ChunkPos, ChunkMeshSlots>,
}

impl ChunkMeshes {
    pub fn slots(&self, pos: ChunkPos) -> Option<&ChunkMeshSlots> {
        self.slots.get(&pos)
    }

    pub fn slots_mut(&mut self, pos: ChunkPos) -> &mut ChunkMeshSlots {
        self.slots.entry(pos).or_default()
    }

    pub fn remove(&mut self, pos: ChunkPos) -> bool {
        self.slots.remove(&pos).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkPos, &ChunkMeshSlots)> {
        self.slots.iter().map(|(&pos, slots)| (pos, slots))
    }
}

/// emitted whenever a layer's buffers change (including becoming empty), so
/// renderers and collision can refresh their mirrored copies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MeshLayerUpdated {
    pub pos: ChunkPos,
    pub layer: MeshLayer,
    pub generation: u64,
    pub preview: bool,
    pub empty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_with_one_triangle() -> MeshLayerData {
        MeshLayerData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            materials: vec![1; 3],
            ao: vec![255; 3],
            light: vec![31; 3],
            indices: vec![0, 1, 2],
        }
    }

    fn triple(solid: MeshLayerData) -> [MeshLayerData; LAYER_COUNT] {
        [solid, MeshLayerData::default(), MeshLayerData::default()]
    }

    #[test]
    fn update_creates_then_swaps_in_place() {
        let mut slots = ChunkMeshSlots::default();
        let first = slots.update_from_data(triple(layer_with_one_triangle()));
        assert_eq!(first, 1);
        assert!(slots.layer(MeshLayer::Solid).is_some());
        assert!(slots.layer(MeshLayer::Liquid).is_none());

        let second = slots.update_from_data(triple(layer_with_one_triangle()));
        assert_eq!(second, 2);
        assert_eq!(slots.layer(MeshLayer::Solid).unwrap().generation, 2);
    }

    #[test]
    fn empty_payload_disposes_the_slot() {
        let mut slots = ChunkMeshSlots::default();
        slots.update_from_data(triple(layer_with_one_triangle()));
        slots.update_from_data(Default::default());
        assert!(slots.layer(MeshLayer::Solid).is_none());
    }

    #[test]
    fn preview_hides_main_and_disposes_on_deactivate() {
        let mut slots = ChunkMeshSlots::default();
        slots.update_from_data(triple(layer_with_one_triangle()));
        slots.update_preview(triple(layer_with_one_triangle()));

        slots.set_preview_active(true);
        assert!(!slots.layer(MeshLayer::Solid).unwrap().visible);
        assert!(slots.preview_layer(MeshLayer::Solid).unwrap().visible);

        slots.set_preview_active(false);
        assert!(slots.layer(MeshLayer::Solid).unwrap().visible);
        assert!(slots.preview_layer(MeshLayer::Solid).is_none());
    }

    #[test]
    fn layer_conventions_match_the_render_contract() {
        assert_eq!(MeshLayer::Solid.settings().render_order, 0);
        assert_eq!(MeshLayer::Transparent.settings().render_order, 1);
        assert_eq!(MeshLayer::Liquid.settings().render_order, 2);
        assert!(!MeshLayer::Liquid.settings().casts_shadow);
        assert!(MeshLayer::Liquid.settings().receives_shadow);
    }
}

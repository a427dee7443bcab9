//! the lighting + meshing worker pool.
//!
//! the main task snapshots a dirty chunk into a 34³ expansion (interior plus
//! a one-cell margin sampled from resident neighbors), hands it to a rayon
//! pool, and collects finished meshes over a channel. a worker job relights
//! its snapshot, extracts the surface-net mesh, and recomputes the face
//! connectivity summary in one non-suspending call; the main task applies the
//! result only if the chunk still exists and the job's input generation is
//! not older than what has already been applied.

use std::{panic::AssertUnwindSafe, sync::Arc};

use carve_common::{
    cell::PackedCell,
    chunk::{
        compute_face_mask, flat_index, in_chunk_bounds, Chunk, ChunkPos, ChunkSource, FaceMask,
        CHUNK_AREA, CHUNK_LENGTH, CHUNK_VOLUME,
    },
    edit::BuildTarget,
    lighting::{self, BorderLight, LightQueue},
    palette::MaterialPalette,
    prelude::*,
    SIDES,
};
use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{
    mesh::{ChunkMeshes, MeshLayerData, MeshLayerUpdated, LAYER_COUNT, LAYERS},
    store::{ChunkStore, MeshPhase},
    stream::StreamLabel,
};

pub mod surface_net;

pub use surface_net::extract_mesh;

/// the chunk plus its one-cell margin: lattice coordinates in `[-1, 32]`.
pub const EXPANSE_LENGTH: usize = CHUNK_LENGTH + 2;
pub const EXPANSE_VOLUME: usize = EXPANSE_LENGTH * EXPANSE_LENGTH * EXPANSE_LENGTH;

pub struct ChunkExpanse {
    cells: Box<[PackedCell]>,
}

impl ChunkExpanse {
    pub fn empty() -> Self {
        Self {
            cells: vec![PackedCell::EMPTY; EXPANSE_VOLUME].into_boxed_slice(),
        }
    }

    #[inline(always)]
    fn index(x: i32, y: i32, z: i32) -> usize {
        debug_assert!(
            (-1..=CHUNK_LENGTH as i32).contains(&x)
                && (-1..=CHUNK_LENGTH as i32).contains(&y)
                && (-1..=CHUNK_LENGTH as i32).contains(&z)
        );
        (x + 1) as usize
            + (y + 1) as usize * EXPANSE_LENGTH
            + (z + 1) as usize * EXPANSE_LENGTH * EXPANSE_LENGTH
    }

    #[inline(always)]
    pub fn get(&self, x: i32, y: i32, z: i32) -> PackedCell {
        self.cells[Self::index(x, y, z)]
    }

    #[inline(always)]
    pub fn set(&mut self, x: i32, y: i32, z: i32, cell: PackedCell) {
        self.cells[Self::index(x, y, z)] = cell;
    }

    pub fn copy_interior(&self) -> Box<[PackedCell]> {
        let mut interior = vec![PackedCell::EMPTY; CHUNK_VOLUME].into_boxed_slice();
        for z in 0..CHUNK_LENGTH {
            for y in 0..CHUNK_LENGTH {
                for x in 0..CHUNK_LENGTH {
                    interior[flat_index(x, y, z)] = self.get(x as i32, y as i32, z as i32);
                }
            }
        }
        interior
    }

    pub fn write_interior(&mut self, interior: &[PackedCell]) {
        assert_eq!(interior.len(), CHUNK_VOLUME);
        for z in 0..CHUNK_LENGTH {
            for y in 0..CHUNK_LENGTH {
                for x in 0..CHUNK_LENGTH {
                    self.set(x as i32, y as i32, z as i32, interior[flat_index(x, y, z)]);
                }
            }
        }
    }

    /// light values of the margin cells, face by face, for border seeding.
    pub fn border_light(&self) -> BorderLight {
        let mut borders = BorderLight::default();
        for side in SIDES {
            let normal = side.normal::<i32>();
            let mut border = Box::new([0u8; CHUNK_AREA]);
            for v in 0..CHUNK_LENGTH {
                for u in 0..CHUNK_LENGTH {
                    let (x, y, z) = lighting::border_cell_of(side, u, v);
                    let cell =
                        self.get(x as i32 + normal.x, y as i32 + normal.y, z as i32 + normal.z);
                    border[carve_common::chunk::column_index(u, v)] = cell.light();
                }
            }
            borders[side] = Some(border);
        }
        borders
    }
}

/// samples a chunk (or its preview buffer) plus margins from resident
/// neighbors into a transfer-safe expansion.
pub fn expand_chunk<S: ChunkSource>(chunk: &Chunk, neighbors: &S, use_preview: bool) -> ChunkExpanse {
    let interior = match use_preview {
        true => chunk.preview().unwrap_or_else(|| chunk.cells()),
        false => chunk.cells(),
    };

    let mut expanse = ChunkExpanse::empty();
    let len = CHUNK_LENGTH as i32;
    for z in -1..=len {
        for y in -1..=len {
            for x in -1..=len {
                let cell = if in_chunk_bounds(x, y, z) {
                    interior[flat_index(x as usize, y as usize, z as usize)]
                } else {
                    chunk.cell_with_margin(x, y, z, neighbors)
                };
                expanse.set(x, y, z, cell);
            }
        }
    }
    expanse
}

pub struct MeshJobInput {
    pub pos: ChunkPos,
    /// the chunk's data generation when this snapshot was taken.
    pub generation: u64,
    pub target: BuildTarget,
    pub expanse: ChunkExpanse,
    /// +X / +Y / +Z neighbor residency; absent high neighbors suppress
    /// boundary faces.
    pub neighbors_present: [bool; 3],
    /// skylight entering from the chunk above; `None` means open sky.
    pub incoming_sunlight: Option<Box<[u8; CHUNK_AREA]>>,
}

pub struct CompletedMesh {
    pub pos: ChunkPos,
    pub generation: u64,
    pub target: BuildTarget,
    pub layers: [MeshLayerData; LAYER_COUNT],
    /// relit light values for every interior cell.
    pub light: Box<[u8]>,
    pub sunlight_out: Box<[u8; CHUNK_AREA]>,
    pub face_mask: FaceMask,
}

pub enum MeshJobOutput {
    Completed(Box<CompletedMesh>),
    Failed { pos: ChunkPos },
}

/// one worker job: relight the snapshot, mesh it, summarize connectivity.
pub fn run_mesh_job(mut input: MeshJobInput, palette: &MaterialPalette) -> CompletedMesh {
    let mut interior = input.expanse.copy_interior();

    let sunlight_out =
        lighting::compute_sunlight_columns(&mut interior, palette, input.incoming_sunlight.as_deref());

    let borders = input.expanse.border_light();
    let mut queue = LightQueue::new();
    lighting::propagate_light(&mut interior, palette, &borders, &mut queue);

    // the mesher averages light from the expansion, so write the lit cells
    // back before extracting
    input.expanse.write_interior(&interior);
    let layers = extract_mesh(&input.expanse, palette, input.neighbors_present);

    let face_mask = compute_face_mask(&interior);
    let light = interior.iter().map(|cell| cell.light()).collect::<Vec<_>>().into_boxed_slice();

    CompletedMesh {
        pos: input.pos,
        generation: input.generation,
        target: input.target,
        layers,
        light,
        sunlight_out: Box::new(sunlight_out),
        face_mask,
    }
}

pub struct MesherContext {
    pool: ThreadPool,
    output_tx: Sender<MeshJobOutput>,
    output_rx: Receiver<MeshJobOutput>,
    jobs_per_frame: usize,
}

impl MesherContext {
    pub fn new(threads: Option<usize>, jobs_per_frame: usize) -> Self {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let (output_tx, output_rx) = crossbeam_channel::unbounded();
        Self {
            pool: builder.build().unwrap(),
            output_tx,
            output_rx,
            jobs_per_frame,
        }
    }

    /// runs a job on the pool; panics inside the job become `Failed` outputs
    /// instead of taking the process down.
    pub fn queue_job(&self, palette: Arc<MaterialPalette>, input: MeshJobInput) {
        let sender = self.output_tx.clone();
        let pos = input.pos;
        self.pool.spawn(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| run_mesh_job(input, &palette)));
            let output = match result {
                Ok(completed) => MeshJobOutput::Completed(Box::new(completed)),
                Err(_) => MeshJobOutput::Failed { pos },
            };
            let _ = sender.send(output);
        });
    }
}

fn build_job_input(store: &ChunkStore, pos: ChunkPos, target: BuildTarget) -> Option<MeshJobInput> {
    let loaded = store.loaded(pos)?;
    let use_preview = matches!(target, BuildTarget::Preview);
    let expanse = expand_chunk(&loaded.chunk, store, use_preview);

    let neighbors_present = [
        store.loaded(pos.offset([1, 0, 0])).is_some(),
        store.loaded(pos.offset([0, 1, 0])).is_some(),
        store.loaded(pos.offset([0, 0, 1])).is_some(),
    ];

    let incoming_sunlight = store
        .loaded(pos.offset([0, 1, 0]))
        .and_then(|above| above.sunlight_out.clone());

    Some(MeshJobInput {
        pos,
        generation: loaded.data_generation,
        target,
        expanse,
        neighbors_present,
        incoming_sunlight,
    })
}

pub fn dispatch_mesh_jobs(
    ctx: Res<MesherContext>,
    mut store: ResMut<ChunkStore>,
    palette: Res<Arc<MaterialPalette>>,
) {
    let mut budget = ctx.jobs_per_frame;

    let positions: Vec<ChunkPos> = store.needs_mesh().collect();
    for pos in positions {
        if budget == 0 {
            break;
        }
        let input = match build_job_input(&store, pos, BuildTarget::Main) {
            Some(input) => input,
            None => continue,
        };
        if let Some(loaded) = store.loaded_mut(pos) {
            loaded.inflight = true;
        }
        ctx.queue_job(Arc::clone(&palette), input);
        budget -= 1;
    }

    // preview jobs bypass the budget so staged edits feel immediate
    let previews: Vec<ChunkPos> = store.needs_preview_mesh().collect();
    for pos in previews {
        let input = match build_job_input(&store, pos, BuildTarget::Preview) {
            Some(input) => input,
            None => continue,
        };
        if let Some(loaded) = store.loaded_mut(pos) {
            loaded.preview_dirty = false;
        }
        ctx.queue_job(Arc::clone(&palette), input);
    }
}

pub fn apply_completed_meshes(
    ctx: Res<MesherContext>,
    mut store: ResMut<ChunkStore>,
    mut meshes: ResMut<ChunkMeshes>,
    mut updated: EventWriter<MeshLayerUpdated>,
) {
    for output in ctx.output_rx.try_iter() {
        match output {
            MeshJobOutput::Failed { pos } => {
                log::error!("lighting/meshing job for {:?} panicked; keeping old meshes", pos);
                if let Some(loaded) = store.loaded_mut(pos) {
                    loaded.inflight = false;
                    // mark clean so a deterministic panic can't loop forever
                    loaded.applied_generation = loaded.data_generation;
                    loaded.phase = MeshPhase::Resident;
                }
            }
            MeshJobOutput::Completed(completed) => {
                let CompletedMesh {
                    pos,
                    generation,
                    target,
                    layers,
                    light,
                    sunlight_out,
                    face_mask,
                } = *completed;

                if store.loaded(pos).is_none() {
                    log::debug!("dropping mesh for evicted chunk {:?}", pos);
                    continue;
                }

                let empty = [layers[0].is_empty(), layers[1].is_empty(), layers[2].is_empty()];

                if matches!(target, BuildTarget::Preview) {
                    // the preview may have been cancelled while the job ran
                    let still_staged = store
                        .loaded(pos)
                        .map_or(false, |loaded| loaded.chunk.has_preview());
                    if !still_staged {
                        continue;
                    }

                    let slots = meshes.slots_mut(pos);
                    let slot_generation = slots.update_preview(layers);
                    slots.set_preview_active(true);
                    for layer in LAYERS {
                        updated.send(MeshLayerUpdated {
                            pos,
                            layer,
                            generation: slot_generation,
                            preview: true,
                            empty: empty[layer.index()],
                        });
                    }
                    continue;
                }

                let mut sunlight_changed = false;
                {
                    let loaded = store.loaded_mut(pos).unwrap();
                    loaded.inflight = false;
                    if generation < loaded.applied_generation {
                        continue;
                    }

                    for (cell, &value) in loaded.chunk.cells_mut().iter_mut().zip(light.iter()) {
                        *cell = cell.with_light(value);
                    }
                    loaded.chunk.set_face_mask(face_mask);

                    if loaded.sunlight_out.as_deref() != Some(&*sunlight_out) {
                        sunlight_changed = true;
                    }
                    loaded.sunlight_out = Some(sunlight_out);
                    loaded.applied_generation = generation;
                    loaded.phase = if loaded.data_generation > generation {
                        MeshPhase::Dirty
                    } else {
                        MeshPhase::Resident
                    };
                }

                // our skylight feeds the chunk below; if it moved, the chunk
                // below needs a relight
                if sunlight_changed {
                    store.mark_dirty(pos.offset([0, -1, 0]));
                }

                let slots = meshes.slots_mut(pos);
                let slot_generation = slots.update_from_data(layers);
                for layer in LAYERS {
                    updated.send(MeshLayerUpdated {
                        pos,
                        layer,
                        generation: slot_generation,
                        preview: false,
                        empty: empty[layer.index()],
                    });
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ChunkMesherPlugin {
    pub threads: Option<usize>,
    pub jobs_per_frame: usize,
}

impl Default for ChunkMesherPlugin {
    fn default() -> Self {
        Self {
            threads: None,
            jobs_per_frame: 4,
        }
    }
}

impl Plugin for ChunkMesherPlugin {
    fn build(&self, app: &mut AppBuilder) {
        app.insert_resource(MesherContext::new(self.threads, self.jobs_per_frame));
        app.insert_resource(ChunkMeshes::default());
        app.add_event::<MeshLayerUpdated>();

        app.add_system(
            dispatch_mesh_jobs
                .system()
                .label(MesherLabel("dispatch"))
                .after(StreamLabel("apply-packets")),
        );
        app.add_system(
            apply_completed_meshes
                .system()
                .label(MesherLabel("apply"))
                .after(MesherLabel("dispatch")),
        );
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, SystemLabel)]
pub struct MesherLabel(pub &'static str);

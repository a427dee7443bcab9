//! world streaming.
//!
//! keeps a residency window of chunks around the camera, requests what is
//! missing (bundled surface columns where the map tile says they help,
//! individual chunks otherwise), applies server payloads and build commits,
//! retries requests a bounded number of times before settling for empty air,
//! and stages local build previews.
//!
//! the transport layer is external: it feeds decoded packets in as
//! [`ServerPacketEvent`]s and drains the shared [`RequestQueue`] from its own
//! thread.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
};

use nalgebra::{Point3, Vector3};
use parking_lot::RwLock;

use carve_common::{
    chunk::{Chunk, ChunkPos},
    edit::{draw_to_chunk, BuildOp, BuildTarget},
    net::{BuildCommit, BuildIntent, ClientPacket, ServerPacket},
    palette::{default_palette, load_palette},
    prelude::*,
    tile::{MapTile, TilePos},
    util::DedupQueue,
};

use crate::{
    mesh::ChunkMeshes,
    store::{ChunkLoaded, ChunkStore, ChunkUnloaded, InsertOutcome},
};

pub struct StreamingConfig {
    /// residency window half-extent, in chunks.
    pub visibility_radius: i32,
    /// extra ring kept resident beyond the request radius, so small camera
    /// wobbles don't thrash loads.
    pub unload_margin: i32,
    /// seconds to wait on a request before retrying.
    pub request_timeout: f64,
    pub retry_limit: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            visibility_radius: 6,
            unload_margin: 1,
            request_timeout: 2.0,
            retry_limit: 3,
        }
    }
}

/// where the world is being watched from, set by the application every frame.
pub struct StreamAnchor {
    pub position: Point3<f32>,
    pub forward: Vector3<f32>,
}

impl Default for StreamAnchor {
    fn default() -> Self {
        Self {
            position: nalgebra::point![0.0, 0.0, 0.0],
            forward: nalgebra::vector![0.0, 0.0, 1.0],
        }
    }
}

pub struct LocalPlayer {
    pub id: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
enum RequestKey {
    Chunk(ChunkPos),
    Column(TilePos),
}

#[derive(Default)]
struct MutableRequestQueue {
    requests: DedupQueue<RequestKey>,
    intents: Vec<BuildIntent>,
}

/// outgoing request queue, shared with the transport thread.
#[derive(Clone, Default)]
pub struct RequestQueue {
    inner: Arc<RwLock<MutableRequestQueue>>,
}

impl RequestQueue {
    pub fn request_chunk(&self, pos: ChunkPos) {
        self.inner.write().requests.push_back(RequestKey::Chunk(pos));
    }

    pub fn request_column(&self, pos: TilePos) {
        self.inner.write().requests.push_back(RequestKey::Column(pos));
    }

    pub fn send_intent(&self, intent: BuildIntent) {
        self.inner.write().intents.push(intent);
    }

    /// empties the queue into concrete packets, in request order.
    pub fn drain_packets(&self, out: &mut Vec<ClientPacket>) {
        let mut inner = self.inner.write();
        for key in inner.requests.pop_iter() {
            out.push(match key {
                RequestKey::Chunk(pos) => ClientPacket::ChunkRequest { pos, force_regen: false },
                RequestKey::Column(pos) => ClientPacket::ColumnRequest { pos },
            });
        }
        for intent in inner.intents.drain(..) {
            out.push(ClientPacket::BuildIntent(intent));
        }
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.requests.is_empty() && inner.intents.is_empty()
    }
}

#[derive(Default)]
pub struct TileCache {
    tiles: std::collections::HashMap<TilePos, MapTile>,
}

impl TileCache {
    pub fn get(&self, pos: TilePos) -> Option<&MapTile> {
        self.tiles.get(&pos)
    }

    pub fn insert(&mut self, pos: TilePos, tile: MapTile) {
        self.tiles.insert(pos, tile);
    }

    pub fn remove(&mut self, pos: TilePos) {
        self.tiles.remove(&pos);
    }
}

/// a decoded packet from the server, fed in by the transport layer.
#[derive(Clone, Debug)]
pub struct ServerPacketEvent(pub ServerPacket);

/// build preview staging, driven by the player's input layer.
#[derive(Clone, Debug)]
pub enum BuildPreviewEvent {
    Stage(BuildOp),
    Cancel,
}

#[derive(Default)]
pub struct PreviewState {
    staged: Option<BuildOp>,
    chunks: Vec<ChunkPos>,
}

impl PreviewState {
    pub fn staged(&self) -> Option<&BuildOp> {
        self.staged.as_ref()
    }
}

pub fn desired_residency(center: ChunkPos, radius: i32) -> Vec<ChunkPos> {
    let mut desired = Vec::with_capacity(((2 * radius + 1) as usize).pow(3));
    for dz in -radius..=radius {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                desired.push(center.offset([dx, dy, dz]));
            }
        }
    }
    desired
}

fn outside_box(pos: ChunkPos, center: ChunkPos, radius: i32) -> bool {
    (pos.x - center.x).abs() > radius
        || (pos.y - center.y).abs() > radius
        || (pos.z - center.z).abs() > radius
}

pub fn update_residency(
    mut previous_center: Local<Option<ChunkPos>>,
    config: Res<StreamingConfig>,
    anchor: Res<StreamAnchor>,
    time: Res<Time>,
    mut store: ResMut<ChunkStore>,
    mut meshes: ResMut<ChunkMeshes>,
    mut tiles: ResMut<TileCache>,
    requests: Res<RequestQueue>,
    mut unloaded: EventWriter<ChunkUnloaded>,
) {
    let center = ChunkPos::at_world(anchor.position);
    if *previous_center == Some(center) {
        return;
    }
    *previous_center = Some(center);

    let keep_radius = config.visibility_radius + config.unload_margin;
    let to_evict: Vec<ChunkPos> = store
        .positions()
        .filter(|&pos| outside_box(pos, center, keep_radius))
        .collect();
    let mut evicted_tiles = HashSet::new();
    for pos in to_evict {
        store.evict(pos);
        meshes.remove(pos);
        unloaded.send(ChunkUnloaded(pos));
        evicted_tiles.insert(TilePos::from(pos));
    }
    // drop cached tiles whose whole footprint left the window
    for tile_pos in evicted_tiles {
        let column_resident = store
            .positions()
            .any(|pos| TilePos::from(pos) == tile_pos);
        if !column_resident {
            tiles.remove(tile_pos);
        }
    }

    let now = time.seconds_since_startup();
    for pos in desired_residency(center, config.visibility_radius) {
        if store.contains(pos) {
            continue;
        }
        let tile_pos = TilePos::from(pos);
        match tiles.get(tile_pos).and_then(|tile| tile.chunk_y_range()) {
            // the surface column bundle covers this chunk
            Some(range) if range.contains(&pos.y) => requests.request_column(tile_pos),
            // known tile, but this chunk is above or below the surface band
            Some(_) => requests.request_chunk(pos),
            // unknown tile: ask for the column first, it carries the tile
            None => requests.request_column(tile_pos),
        }
        store.mark_pending(pos, now);
    }
}

pub fn retry_requests(
    config: Res<StreamingConfig>,
    time: Res<Time>,
    mut store: ResMut<ChunkStore>,
    requests: Res<RequestQueue>,
) {
    let now = time.seconds_since_startup();
    let pending: Vec<ChunkPos> = store
        .positions()
        .filter(|&pos| store.is_pending(pos))
        .collect();

    for pos in pending {
        let mut give_up = false;
        let mut resend = false;
        if let Some((attempts, requested_at)) = store.pending_mut(pos) {
            if now - *requested_at >= config.request_timeout {
                if *attempts >= config.retry_limit {
                    give_up = true;
                } else {
                    *attempts += 1;
                    *requested_at = now;
                    resend = true;
                }
            }
        }

        if give_up {
            log::warn!("chunk {:?} never arrived; treating it as empty air", pos);
            store.insert_chunk_forced(Chunk::new(pos));
            // neighbors held back their seam faces while this was missing
            for side in carve_common::SIDES {
                let neighbor = pos.neighbor(side);
                if store.loaded(neighbor).is_some() {
                    store.mark_dirty(neighbor);
                }
            }
        } else if resend {
            requests.request_chunk(pos);
        }
    }
}

fn apply_chunk_payload(
    store: &mut ChunkStore,
    pos: ChunkPos,
    last_build_seq: u32,
    data: &[u8],
    loaded_events: &mut EventWriter<ChunkLoaded>,
) {
    let mut chunk = Chunk::new(pos);
    if let Err(err) = chunk.copy_cells_from(data) {
        log::error!("chunk payload for {:?} rejected: {}", pos, err);
        return;
    }
    chunk.observe_build_seq(last_build_seq);

    match store.insert_chunk(chunk) {
        InsertOutcome::Inserted => {
            loaded_events.send(ChunkLoaded(pos));
            // resident neighbors skipped their boundary faces while we were
            // absent; their seams depend on our border now
            for side in carve_common::SIDES {
                let neighbor = pos.neighbor(side);
                if store.loaded(neighbor).is_some() {
                    store.mark_dirty(neighbor);
                }
            }
        }
        InsertOutcome::StaleSeq => {
            log::debug!("dropping stale chunk payload for {:?} (seq {})", pos, last_build_seq);
        }
        InsertOutcome::Unwanted => {
            log::debug!("dropping unsolicited chunk payload for {:?}", pos);
        }
    }
}

/// applies a successful commit to every affected resident chunk. all clients
/// and the server run the same draw, so cell data converges.
pub fn apply_commit(
    store: &mut ChunkStore,
    meshes: &mut ChunkMeshes,
    preview: &mut PreviewState,
    local_player: u16,
    commit: &BuildCommit,
) {
    if commit.result.is_success() {
        let intent = match &commit.intent {
            Some(intent) => intent,
            None => {
                log::error!("successful commit {} without an intent body", commit.build_seq);
                return;
            }
        };

        let op = intent.to_op();
        let affected = op.affected_chunks();
        let mut any_changed = false;
        for &pos in &affected {
            if let Some(loaded) = store.loaded_mut(pos) {
                let changed = draw_to_chunk(&mut loaded.chunk, &op, BuildTarget::Main);
                loaded.chunk.observe_build_seq(commit.build_seq);
                any_changed |= changed;
            }
        }
        if any_changed {
            // every chunk in the affected set borders a changed cell, and
            // their meshes sample each other's margins
            for &pos in &affected {
                store.mark_dirty(pos);
            }
        }

        if commit.player_id == local_player {
            clear_preview(store, meshes, preview);
        }
    } else if commit.player_id == local_player {
        log::debug!("build intent rejected: {:?}", commit.result);
        clear_preview(store, meshes, preview);
    }
}

pub fn apply_server_packets(
    mut events: EventReader<ServerPacketEvent>,
    mut store: ResMut<ChunkStore>,
    mut meshes: ResMut<ChunkMeshes>,
    mut tiles: ResMut<TileCache>,
    mut preview: ResMut<PreviewState>,
    requests: Res<RequestQueue>,
    local: Res<LocalPlayer>,
    mut loaded_events: EventWriter<ChunkLoaded>,
) {
    for ServerPacketEvent(packet) in events.iter() {
        match packet {
            ServerPacket::ChunkData(msg) => {
                apply_chunk_payload(&mut store, msg.pos, msg.last_build_seq, &msg.data, &mut loaded_events);
            }
            ServerPacket::MapTile { pos, tile } => {
                tiles.insert(*pos, tile.clone());
            }
            ServerPacket::ColumnResponse(response) => {
                tiles.insert(response.pos, response.tile.clone());
                for chunk in &response.chunks {
                    let pos = ChunkPos::new([response.pos.x, chunk.cy as i32, response.pos.z]);
                    apply_chunk_payload(&mut store, pos, chunk.last_build_seq, &chunk.data, &mut loaded_events);
                }

                // chunks of this footprint the bundle didn't carry sit outside
                // the surface band; fetch them individually
                let stragglers: Vec<ChunkPos> = store
                    .positions()
                    .filter(|&pos| TilePos::from(pos) == response.pos && store.is_pending(pos))
                    .collect();
                for pos in stragglers {
                    requests.request_chunk(pos);
                }
            }
            ServerPacket::BuildCommit(commit) => {
                apply_commit(&mut store, &mut meshes, &mut preview, local.id, commit);
            }
        }
    }
}

/// draws the staged op into preview buffers of every affected resident chunk
/// and queues preview remeshes.
pub fn stage_preview(
    store: &mut ChunkStore,
    meshes: &mut ChunkMeshes,
    preview: &mut PreviewState,
    op: BuildOp,
) {
    let affected = op.affected_chunks();

    // chunks that were part of the previous preview but not this one revert
    let stale: Vec<ChunkPos> = preview
        .chunks
        .iter()
        .copied()
        .filter(|pos| !affected.contains(pos))
        .collect();
    for pos in stale {
        if let Some(loaded) = store.loaded_mut(pos) {
            loaded.chunk.clear_preview();
            loaded.preview_dirty = false;
        }
        meshes.slots_mut(pos).set_preview_active(false);
    }

    let mut staged_chunks = Vec::new();
    for &pos in &affected {
        if let Some(loaded) = store.loaded_mut(pos) {
            // restart from the committed cells each time the op moves
            loaded.chunk.clear_preview();
            if draw_to_chunk(&mut loaded.chunk, &op, BuildTarget::Preview) {
                loaded.preview_dirty = true;
                staged_chunks.push(pos);
            } else {
                loaded.chunk.clear_preview();
            }
        }
    }

    preview.staged = Some(op);
    preview.chunks = staged_chunks;
}

/// discards all staged preview data and meshes, after a commit or a cancel.
pub fn clear_preview(store: &mut ChunkStore, meshes: &mut ChunkMeshes, preview: &mut PreviewState) {
    for &pos in &preview.chunks {
        if let Some(loaded) = store.loaded_mut(pos) {
            loaded.chunk.clear_preview();
            loaded.preview_dirty = false;
        }
        meshes.slots_mut(pos).set_preview_active(false);
    }
    preview.staged = None;
    preview.chunks.clear();
}

pub fn update_preview(
    mut events: EventReader<BuildPreviewEvent>,
    mut store: ResMut<ChunkStore>,
    mut meshes: ResMut<ChunkMeshes>,
    mut preview: ResMut<PreviewState>,
) {
    for event in events.iter() {
        match event {
            BuildPreviewEvent::Stage(op) => stage_preview(&mut store, &mut meshes, &mut preview, *op),
            BuildPreviewEvent::Cancel => clear_preview(&mut store, &mut meshes, &mut preview),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, SystemLabel)]
pub struct StreamLabel(pub &'static str);

#[derive(Debug, Default)]
pub struct ClientStreamPlugin {
    palette_path: Option<PathBuf>,
    config: Option<StreamingConfig>,
}

impl ClientStreamPlugin {
    pub fn with_palette_path<P: AsRef<std::path::Path>>(mut self, path: &P) -> Self {
        self.palette_path = Some(path.as_ref().into());
        self
    }

    pub fn with_config(mut self, config: StreamingConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl std::fmt::Debug for StreamingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingConfig")
            .field("visibility_radius", &self.visibility_radius)
            .field("retry_limit", &self.retry_limit)
            .finish()
    }
}

impl Plugin for ClientStreamPlugin {
    fn build(&self, app: &mut AppBuilder) {
        let palette = match &self.palette_path {
            Some(path) => load_palette(path).unwrap(),
            None => default_palette(),
        };
        app.insert_resource(palette);

        app.insert_resource(ChunkStore::default());
        app.insert_resource(TileCache::default());
        app.insert_resource(RequestQueue::default());
        app.insert_resource(PreviewState::default());
        app.insert_resource(StreamAnchor::default());
        app.insert_resource(LocalPlayer { id: 0 });
        app.insert_resource(StreamingConfig::default());
        if let Some(config) = &self.config {
            app.insert_resource(StreamingConfig {
                visibility_radius: config.visibility_radius,
                unload_margin: config.unload_margin,
                request_timeout: config.request_timeout,
                retry_limit: config.retry_limit,
            });
        }

        app.add_event::<ServerPacketEvent>();
        app.add_event::<BuildPreviewEvent>();
        app.add_event::<ChunkLoaded>();
        app.add_event::<ChunkUnloaded>();

        app.add_system(apply_server_packets.system().label(StreamLabel("apply-packets")));
        app.add_system(
            update_residency
                .system()
                .label(StreamLabel("residency"))
                .after(StreamLabel("apply-packets")),
        );
        app.add_system(
            retry_requests
                .system()
                .label(StreamLabel("retries"))
                .after(StreamLabel("residency")),
        );
        app.add_system(update_preview.system().after(StreamLabel("apply-packets")));
    }
}

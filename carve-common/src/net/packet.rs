use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};
use std::io::{Read, Write};

use crate::{
    chunk::{ChunkPos, CHUNK_DATA_BYTES},
    edit::{BuildMode, BuildOp},
    net::wire::{self, WireError},
    prelude::*,
    sdf::{BuildConfig, BuildShape},
    tile::{MapTile, TilePos, TILE_AREA},
};

mod tag {
    pub const CHUNK_DATA: u8 = 1;
    pub const CHUNK_REQUEST: u8 = 2;
    pub const MAP_TILE: u8 = 3;
    pub const COLUMN_REQUEST: u8 = 4;
    pub const COLUMN_RESPONSE: u8 = 5;
    pub const BUILD_INTENT: u8 = 6;
    pub const BUILD_COMMIT: u8 = 7;
}

mod intent_flags {
    pub const HAS_THICKNESS: u8 = 1 << 0;
    pub const CLOSED: u8 = 1 << 1;
    pub const HAS_ARC_SWEEP: u8 = 1 << 2;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientPacket {
    ChunkRequest { pos: ChunkPos, force_regen: bool },
    ColumnRequest { pos: TilePos },
    BuildIntent(BuildIntent),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerPacket {
    ChunkData(ChunkDataMsg),
    MapTile { pos: TilePos, tile: MapTile },
    ColumnResponse(ColumnResponse),
    BuildCommit(BuildCommit),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkDataMsg {
    pub pos: ChunkPos,
    pub last_build_seq: u32,
    /// raw little-endian cell payload, always [`CHUNK_DATA_BYTES`] long.
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnChunk {
    pub cy: i16,
    pub last_build_seq: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnResponse {
    pub pos: TilePos,
    pub tile: MapTile,
    pub chunks: Vec<ColumnChunk>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildResult {
    Success,
    TooFar,
    NoPermission,
    Collision,
    InvalidConfig,
    RateLimited,
}

impl BuildResult {
    pub fn code(&self) -> u8 {
        match self {
            BuildResult::Success => 0,
            BuildResult::TooFar => 1,
            BuildResult::NoPermission => 2,
            BuildResult::Collision => 3,
            BuildResult::InvalidConfig => 4,
            BuildResult::RateLimited => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<BuildResult> {
        Some(match code {
            0 => BuildResult::Success,
            1 => BuildResult::TooFar,
            2 => BuildResult::NoPermission,
            3 => BuildResult::Collision,
            4 => BuildResult::InvalidConfig,
            5 => BuildResult::RateLimited,
            _ => return None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Success)
    }
}

/// the client's request to apply a volumetric edit, exactly as it travels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BuildIntent {
    /// world metres.
    pub center: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub shape: BuildShape,
    pub mode: BuildMode,
    pub size: Vector3<f32>,
    pub material: u8,
    pub thickness: Option<f32>,
    pub closed: bool,
    pub arc_sweep: Option<f32>,
}

impl BuildIntent {
    pub fn from_op(op: &BuildOp) -> Self {
        Self {
            center: op.center,
            rotation: op.rotation,
            shape: op.config.shape,
            mode: op.mode,
            size: op.config.size,
            material: op.material,
            thickness: op.config.thickness,
            closed: op.config.closed,
            arc_sweep: op.config.arc_sweep,
        }
    }

    pub fn to_op(&self) -> BuildOp {
        BuildOp {
            center: self.center,
            rotation: self.rotation,
            config: BuildConfig {
                shape: self.shape,
                size: self.size,
                thickness: self.thickness,
                closed: self.closed,
                arc_sweep: self.arc_sweep,
            },
            mode: self.mode,
            material: self.material,
        }
    }

    fn encode_body<W: Write>(&self, writer: &mut W) -> Result<()> {
        wire::write_f32(writer, self.center.x)?;
        wire::write_f32(writer, self.center.y)?;
        wire::write_f32(writer, self.center.z)?;
        wire::write_f32(writer, self.rotation.i)?;
        wire::write_f32(writer, self.rotation.j)?;
        wire::write_f32(writer, self.rotation.k)?;
        wire::write_f32(writer, self.rotation.w)?;
        wire::write_u8(writer, self.shape.code())?;
        wire::write_u8(writer, self.mode.code())?;
        wire::write_f32(writer, self.size.x)?;
        wire::write_f32(writer, self.size.y)?;
        wire::write_f32(writer, self.size.z)?;
        if self.material > 127 {
            bail!("build intent material {} out of range", self.material);
        }
        wire::write_u8(writer, self.material)?;

        let mut flags = 0;
        if self.thickness.is_some() {
            flags |= intent_flags::HAS_THICKNESS;
        }
        if self.closed {
            flags |= intent_flags::CLOSED;
        }
        if self.arc_sweep.is_some() {
            flags |= intent_flags::HAS_ARC_SWEEP;
        }
        wire::write_u8(writer, flags)?;

        if let Some(thickness) = self.thickness {
            wire::write_f32(writer, thickness)?;
        }
        if let Some(arc_sweep) = self.arc_sweep {
            wire::write_f32(writer, arc_sweep)?;
        }
        Ok(())
    }

    fn decode_body<R: Read>(reader: &mut R) -> Result<Self, WireError> {
        let center = nalgebra::point![
            wire::read_f32(reader)?,
            wire::read_f32(reader)?,
            wire::read_f32(reader)?
        ];
        let i = wire::read_f32(reader)?;
        let j = wire::read_f32(reader)?;
        let k = wire::read_f32(reader)?;
        let w = wire::read_f32(reader)?;
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(w, i, j, k));

        let shape = BuildShape::from_code(wire::read_u8(reader)?)
            .ok_or(WireError::BadField("build shape code"))?;
        let mode = BuildMode::from_code(wire::read_u8(reader)?)
            .ok_or(WireError::BadField("build mode code"))?;
        let size = nalgebra::vector![
            wire::read_f32(reader)?,
            wire::read_f32(reader)?,
            wire::read_f32(reader)?
        ];
        let material = wire::read_u8(reader)?;
        if material > 127 {
            return Err(WireError::BadField("build material id"));
        }

        let flags = wire::read_u8(reader)?;
        let thickness = if flags & intent_flags::HAS_THICKNESS != 0 {
            Some(wire::read_f32(reader)?)
        } else {
            None
        };
        let arc_sweep = if flags & intent_flags::HAS_ARC_SWEEP != 0 {
            Some(wire::read_f32(reader)?)
        } else {
            None
        };

        Ok(Self {
            center,
            rotation,
            shape,
            mode,
            size,
            material,
            thickness,
            closed: flags & intent_flags::CLOSED != 0,
            arc_sweep,
        })
    }
}

/// the server's verdict on a build intent. successful commits carry the full
/// intent so every client can apply the identical edit locally.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildCommit {
    pub build_seq: u32,
    pub player_id: u16,
    pub result: BuildResult,
    pub intent: Option<BuildIntent>,
}

fn write_chunk_coord<W: Write>(writer: &mut W, value: i32, what: &'static str) -> Result<()> {
    let value: i16 = value
        .try_into()
        .map_err(|_| anyhow!("{} {} does not fit the wire format", what, value))?;
    wire::write_i16(writer, value)
}

fn write_tile<W: Write>(writer: &mut W, tile: &MapTile) -> Result<()> {
    for &height in tile.heights.iter() {
        wire::write_i16(writer, height)?;
    }
    writer.write_all(&tile.materials[..])?;
    Ok(())
}

fn read_tile<R: Read>(reader: &mut R) -> Result<MapTile, WireError> {
    let mut tile = MapTile::default();
    for height in tile.heights.iter_mut() {
        *height = wire::read_i16(reader)?;
    }
    let materials = wire::read_bytes(reader, TILE_AREA)?;
    tile.materials.copy_from_slice(&materials);
    Ok(tile)
}

fn write_cell_payload<W: Write>(writer: &mut W, data: &[u8]) -> Result<()> {
    if data.len() != CHUNK_DATA_BYTES {
        bail!("cell payload is {} bytes, expected {}", data.len(), CHUNK_DATA_BYTES);
    }
    writer.write_all(data)?;
    Ok(())
}

impl ClientPacket {
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            ClientPacket::ChunkRequest { pos, force_regen } => {
                wire::write_u8(writer, tag::CHUNK_REQUEST)?;
                write_chunk_coord(writer, pos.x, "chunk x")?;
                write_chunk_coord(writer, pos.y, "chunk y")?;
                write_chunk_coord(writer, pos.z, "chunk z")?;
                wire::write_u8(writer, *force_regen as u8)?;
            }
            ClientPacket::ColumnRequest { pos } => {
                wire::write_u8(writer, tag::COLUMN_REQUEST)?;
                write_chunk_coord(writer, pos.x, "tile x")?;
                write_chunk_coord(writer, pos.z, "tile z")?;
            }
            ClientPacket::BuildIntent(intent) => {
                wire::write_u8(writer, tag::BUILD_INTENT)?;
                intent.encode_body(writer)?;
            }
        }
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, WireError> {
        let tag = wire::read_u8(reader)?;
        Ok(match tag {
            tag::CHUNK_REQUEST => {
                let x = wire::read_i16(reader)? as i32;
                let y = wire::read_i16(reader)? as i32;
                let z = wire::read_i16(reader)? as i32;
                let force_regen = wire::read_u8(reader)? != 0;
                ClientPacket::ChunkRequest {
                    pos: ChunkPos::new([x, y, z]),
                    force_regen,
                }
            }
            tag::COLUMN_REQUEST => {
                let x = wire::read_i16(reader)? as i32;
                let z = wire::read_i16(reader)? as i32;
                ClientPacket::ColumnRequest { pos: TilePos::new(x, z) }
            }
            tag::BUILD_INTENT => ClientPacket::BuildIntent(BuildIntent::decode_body(reader)?),
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

impl ServerPacket {
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            ServerPacket::ChunkData(msg) => {
                wire::write_u8(writer, tag::CHUNK_DATA)?;
                write_chunk_coord(writer, msg.pos.x, "chunk x")?;
                write_chunk_coord(writer, msg.pos.y, "chunk y")?;
                write_chunk_coord(writer, msg.pos.z, "chunk z")?;
                wire::write_u32(writer, msg.last_build_seq)?;
                write_cell_payload(writer, &msg.data)?;
            }
            ServerPacket::MapTile { pos, tile } => {
                wire::write_u8(writer, tag::MAP_TILE)?;
                write_chunk_coord(writer, pos.x, "tile x")?;
                write_chunk_coord(writer, pos.z, "tile z")?;
                write_tile(writer, tile)?;
            }
            ServerPacket::ColumnResponse(response) => {
                wire::write_u8(writer, tag::COLUMN_RESPONSE)?;
                write_chunk_coord(writer, response.pos.x, "tile x")?;
                write_chunk_coord(writer, response.pos.z, "tile z")?;
                write_tile(writer, &response.tile)?;
                let count: u8 = response
                    .chunks
                    .len()
                    .try_into()
                    .map_err(|_| anyhow!("column bundle has {} chunks", response.chunks.len()))?;
                wire::write_u8(writer, count)?;
                for chunk in &response.chunks {
                    wire::write_i16(writer, chunk.cy)?;
                    wire::write_u32(writer, chunk.last_build_seq)?;
                    write_cell_payload(writer, &chunk.data)?;
                }
            }
            ServerPacket::BuildCommit(commit) => {
                wire::write_u8(writer, tag::BUILD_COMMIT)?;
                wire::write_u32(writer, commit.build_seq)?;
                wire::write_u16(writer, commit.player_id)?;
                wire::write_u8(writer, commit.result.code())?;
                if commit.result.is_success() {
                    let intent = commit
                        .intent
                        .as_ref()
                        .ok_or_else(|| anyhow!("successful commit without an intent"))?;
                    intent.encode_body(writer)?;
                }
            }
        }
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, WireError> {
        let tag = wire::read_u8(reader)?;
        Ok(match tag {
            tag::CHUNK_DATA => {
                let x = wire::read_i16(reader)? as i32;
                let y = wire::read_i16(reader)? as i32;
                let z = wire::read_i16(reader)? as i32;
                let last_build_seq = wire::read_u32(reader)?;
                let data = wire::read_bytes(reader, CHUNK_DATA_BYTES)?;
                ServerPacket::ChunkData(ChunkDataMsg {
                    pos: ChunkPos::new([x, y, z]),
                    last_build_seq,
                    data,
                })
            }
            tag::MAP_TILE => {
                let x = wire::read_i16(reader)? as i32;
                let z = wire::read_i16(reader)? as i32;
                let tile = read_tile(reader)?;
                ServerPacket::MapTile { pos: TilePos::new(x, z), tile }
            }
            tag::COLUMN_RESPONSE => {
                let x = wire::read_i16(reader)? as i32;
                let z = wire::read_i16(reader)? as i32;
                let tile = read_tile(reader)?;
                let count = wire::read_u8(reader)?;
                let mut chunks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let cy = wire::read_i16(reader)?;
                    let last_build_seq = wire::read_u32(reader)?;
                    let data = wire::read_bytes(reader, CHUNK_DATA_BYTES)?;
                    chunks.push(ColumnChunk { cy, last_build_seq, data });
                }
                ServerPacket::ColumnResponse(ColumnResponse {
                    pos: TilePos::new(x, z),
                    tile,
                    chunks,
                })
            }
            tag::BUILD_COMMIT => {
                let build_seq = wire::read_u32(reader)?;
                let player_id = wire::read_u16(reader)?;
                let result = BuildResult::from_code(wire::read_u8(reader)?)
                    .ok_or(WireError::BadField("build result code"))?;
                let intent = if result.is_success() {
                    Some(BuildIntent::decode_body(reader)?)
                } else {
                    None
                };
                ServerPacket::BuildCommit(BuildCommit {
                    build_seq,
                    player_id,
                    result,
                    intent,
                })
            }
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

//! the on-the-wire shape of the core's messages.
//!
//! everything here is hand-encoded little-endian with a one-byte message tag.
//! encoding failures are programmer errors and surface as plain `Result`s;
//! decoding failures mean the peer sent garbage and come back as a typed
//! [`WireError`] so the transport layer can disconnect it.

pub mod packet;
pub mod wire;

pub use packet::{
    BuildCommit, BuildIntent, BuildResult, ChunkDataMsg, ClientPacket, ColumnChunk, ColumnResponse,
    ServerPacket,
};
pub use wire::WireError;

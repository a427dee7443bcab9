//! chunk and tile blob persistence.
//!
//! one file per chunk (the raw 65,536-byte cell payload plus its build
//! sequence) and one per tile, written atomically by renaming a finished
//! temporary into place. the layout is opaque to clients.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use carve_common::{
    chunk::{Chunk, ChunkPos, CHUNK_DATA_BYTES},
    tile::{MapTile, TilePos, TILE_AREA},
};

use crate::prelude::*;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().into(),
        })
    }

    fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.root.join(format!("chunk_{}_{}_{}.bin", pos.x, pos.y, pos.z))
    }

    fn tile_path(&self, pos: TilePos) -> PathBuf {
        self.root.join(format!("tile_{}_{}.bin", pos.x, pos.z))
    }

    fn write_atomic(&self, path: &Path, payload: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn save_chunk(&self, chunk: &Chunk) -> Result<()> {
        let serialized = chunk.to_serialized();
        let mut payload = Vec::with_capacity(4 + CHUNK_DATA_BYTES);
        payload.extend_from_slice(&serialized.last_build_seq.to_le_bytes());
        payload.extend_from_slice(&serialized.data);
        self.write_atomic(&self.chunk_path(chunk.pos()), &payload)
    }

    pub fn load_chunk(&self, pos: ChunkPos) -> Result<Option<Chunk>> {
        let path = self.chunk_path(pos);
        let payload = match fs::read(&path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if payload.len() != 4 + CHUNK_DATA_BYTES {
            bail!("chunk blob {} has {} bytes", path.display(), payload.len());
        }

        let seq = u32::from_le_bytes(payload[..4].try_into().unwrap());
        let mut chunk = Chunk::new(pos);
        chunk.copy_cells_from(&payload[4..])?;
        chunk.observe_build_seq(seq);
        Ok(Some(chunk))
    }

    pub fn save_tile(&self, pos: TilePos, tile: &MapTile) -> Result<()> {
        let mut payload = Vec::with_capacity(TILE_AREA * 3);
        for &height in tile.heights.iter() {
            payload.extend_from_slice(&height.to_le_bytes());
        }
        payload.extend_from_slice(&tile.materials[..]);
        self.write_atomic(&self.tile_path(pos), &payload)
    }

    pub fn load_tile(&self, pos: TilePos) -> Result<Option<MapTile>> {
        let path = self.tile_path(pos);
        let payload = match fs::read(&path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if payload.len() != TILE_AREA * 3 {
            bail!("tile blob {} has {} bytes", path.display(), payload.len());
        }

        let mut tile = MapTile::default();
        for (height, bytes) in tile.heights.iter_mut().zip(payload[..TILE_AREA * 2].chunks_exact(2)) {
            *height = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        tile.materials.copy_from_slice(&payload[TILE_AREA * 2..]);
        Ok(Some(tile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_common::palette;

    #[test]
    fn chunk_blobs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let mut chunk = Chunk::new(ChunkPos::new([3, -1, 7]));
        chunk.generate_flat(12, palette::DIRT, 31);
        chunk.observe_build_seq(77);
        store.save_chunk(&chunk).unwrap();

        let restored = store.load_chunk(chunk.pos()).unwrap().unwrap();
        assert_eq!(restored.cells(), chunk.cells());
        assert_eq!(restored.last_build_seq(), 77);

        assert!(store.load_chunk(ChunkPos::new([9, 9, 9])).unwrap().is_none());
    }

    #[test]
    fn tile_blobs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let mut chunk = Chunk::new(ChunkPos::new([0, 0, 0]));
        chunk.generate_flat(9, palette::SAND, 31);
        let tile = MapTile::derive([&chunk]);

        let pos = TilePos::new(0, 0);
        store.save_tile(pos, &tile).unwrap();
        let restored = store.load_tile(pos).unwrap().unwrap();
        assert_eq!(restored, tile);
    }

    #[test]
    fn truncated_blobs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let pos = ChunkPos::new([0, 0, 0]);
        std::fs::write(dir.path().join("chunk_0_0_0.bin"), b"short").unwrap();
        assert!(store.load_chunk(pos).is_err());
    }
}

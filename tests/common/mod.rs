#![allow(dead_code)]

use std::path::PathBuf;
use tempfile::TempDir;

pub const CATALOG_SIGNATURE: u32 = 0x4A10_59E8;
pub const ATLAS_SIGNATURE: u32 = 0x4A10_59E9;

/// A 1x1 single-frame texture block with one sprite per pattern column.
pub fn texture(sprite_ids: &[u32]) -> Vec<u8> {
    let mut bytes = vec![1, 1, 1, sprite_ids.len() as u8, 1, 1, 1];
    for id in sprite_ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    bytes
}

/// Flag bytes (payloads included) followed by the terminator and a texture.
pub fn record(flags: &[u8], sprite_ids: &[u32]) -> Vec<u8> {
    let mut bytes = flags.to_vec();
    bytes.push(0xFF);
    bytes.extend(texture(sprite_ids));
    bytes
}

pub fn catalog_bytes(items: &[Vec<u8>], outfits: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = vec![];
    bytes.extend_from_slice(&CATALOG_SIGNATURE.to_le_bytes());
    bytes.extend_from_slice(&(99 + items.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&(outfits.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    for record in items.iter().chain(outfits) {
        bytes.extend_from_slice(record);
    }
    bytes
}

/// Packs payloads back to back; `None` gets a zero offset.
pub fn atlas_bytes(payloads: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut bytes = vec![];
    bytes.extend_from_slice(&ATLAS_SIGNATURE.to_le_bytes());
    bytes.extend_from_slice(&(payloads.len() as u32).to_le_bytes());
    let mut cursor = 8 + payloads.len() * 4;
    for payload in payloads {
        match payload {
            Some(p) => {
                bytes.extend_from_slice(&(cursor as u32).to_le_bytes());
                cursor += p.len();
            }
            None => bytes.extend_from_slice(&0u32.to_le_bytes()),
        }
    }
    for payload in payloads.iter().flatten() {
        bytes.extend_from_slice(payload);
    }
    bytes
}

/// An RGBA payload with no header filling `width x height` with `rgba`.
pub fn solid_sprite(width: u16, height: u16, rgba: [u8; 4]) -> Vec<u8> {
    let count = width * height;
    let mut bytes = vec![];
    bytes.extend_from_slice(&width.to_le_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    for _ in 0..count {
        bytes.extend_from_slice(&rgba);
    }
    bytes
}

/// Catalog and atlas files in a scratch directory.
pub struct Workspace {
    dir: TempDir,
    pub catalog: PathBuf,
    pub atlas: PathBuf,
}

impl Workspace {
    pub fn new(catalog: &[u8], atlas: &[u8]) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let catalog_path = dir.path().join("Things.dat");
        let atlas_path = dir.path().join("Things.spr");
        std::fs::write(&catalog_path, catalog).expect("Failed to write catalog");
        std::fs::write(&atlas_path, atlas).expect("Failed to write atlas");
        Self {
            dir,
            catalog: catalog_path,
            atlas: atlas_path,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

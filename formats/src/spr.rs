use byteorder::{LE, ReadBytesExt};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::error::{FormatError, ReadContext, Result};

pub const HEADER_LEN: usize = 8;
pub const MAX_SPRITE_DIMENSION: u16 = 128;
pub const MAX_SPRITE_PIXELS: usize = 16384;

/// Payloads this short cannot hold a header plus a single chunk.
const MIN_DECODABLE_LEN: usize = 5;

/// One guess at how a sprite payload is laid out: bytes to skip before the
/// dimensions, and bytes per coloured pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeHypothesis {
    pub header_skip: usize,
    pub bytes_per_pixel: usize,
}

impl DecodeHypothesis {
    const fn new(header_skip: usize, bytes_per_pixel: usize) -> Self {
        Self {
            header_skip,
            bytes_per_pixel,
        }
    }
}

/// Tried in order; the first that decodes wins. RGBA before RGB, shorter
/// headers before longer ones.
pub const DECODE_HYPOTHESES: [DecodeHypothesis; 6] = [
    DecodeHypothesis::new(0, 4),
    DecodeHypothesis::new(2, 4),
    DecodeHypothesis::new(0, 3),
    DecodeHypothesis::new(2, 3),
    DecodeHypothesis::new(3, 3),
    DecodeHypothesis::new(1, 3),
];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short for the sprite header")]
    TooShort,

    #[error("implausible sprite dimensions {width}x{height}")]
    BadDimensions { width: u16, height: u16 },

    #[error("chunk at offset {offset} claims {colored} pixels past the end of the payload")]
    ChunkOverrun { offset: usize, colored: u16 },
}

/// A decoded sprite. `data` is row-major RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteImage {
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl SpriteImage {
    pub fn pixel(&self, x: u16, y: u16) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    data.get(pos..pos + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

/// Decodes `data` under a single hypothesis.
///
/// Chunks are a transparent run length followed by a coloured run length and
/// that many pixels. Transparent runs only move the cursor. Decoding stops
/// once every pixel is covered or the data runs out between chunks.
pub fn attempt_decode(data: &[u8], hypothesis: DecodeHypothesis) -> std::result::Result<SpriteImage, DecodeError> {
    let bpp = hypothesis.bytes_per_pixel;
    let mut p = hypothesis.header_skip;

    let (Some(width), Some(height)) = (read_u16(data, p), read_u16(data, p + 2)) else {
        return Err(DecodeError::TooShort);
    };
    p += 4;

    let pixel_count = width as usize * height as usize;
    if width == 0
        || height == 0
        || width > MAX_SPRITE_DIMENSION
        || height > MAX_SPRITE_DIMENSION
        || pixel_count > MAX_SPRITE_PIXELS
    {
        return Err(DecodeError::BadDimensions { width, height });
    }

    let w = width as usize;
    let h = height as usize;
    let mut pixels = vec![0u8; pixel_count * 4];
    let (mut x, mut y) = (0usize, 0usize);
    let mut drawn = 0usize;

    while p + 4 <= data.len() && drawn < pixel_count {
        let transparent = read_u16(data, p).unwrap_or(0) as usize;
        let colored = read_u16(data, p + 2).unwrap_or(0);
        p += 4;

        drawn += transparent;
        x += transparent;
        y += x / w;
        x %= w;

        if p + colored as usize * bpp > data.len() {
            return Err(DecodeError::ChunkOverrun { offset: p - 4, colored });
        }

        for _ in 0..colored {
            if y >= h {
                break;
            }
            let i = (y * w + x) * 4;
            pixels[i..i + 3].copy_from_slice(&data[p..p + 3]);
            pixels[i + 3] = if bpp == 4 { data[p + 3] } else { 0xFF };
            p += bpp;

            drawn += 1;
            x += 1;
            if x >= w {
                x = 0;
                y += 1;
            }
        }
    }

    Ok(SpriteImage {
        width,
        height,
        data: pixels,
    })
}

/// Tries every hypothesis in order and returns the first success.
pub fn decode_payload(data: &[u8]) -> Option<(SpriteImage, DecodeHypothesis)> {
    DECODE_HYPOTHESES.iter().find_map(|&hypothesis| {
        attempt_decode(data, hypothesis)
            .inspect_err(|e| trace!(?hypothesis, "rejected: {e}"))
            .ok()
            .map(|image| (image, hypothesis))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpriteSlot {
    /// Offset 0 in the table.
    Absent,
    Stored(Vec<u8>),
}

/// The sprite atlas. Ids are 1-based; slot `i` holds sprite `i + 1`.
#[derive(Debug, Clone)]
pub struct SpriteAtlas {
    pub signature: u32,
    slots: Vec<SpriteSlot>,
}

impl SpriteAtlas {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let signature = cursor.read_u32::<LE>().at("atlas header", 0)?;
        let count = cursor.read_u32::<LE>().at("atlas header", 4)? as usize;

        let table_end = count
            .checked_mul(4)
            .and_then(|n| n.checked_add(HEADER_LEN))
            .filter(|&end| end <= bytes.len())
            .ok_or(FormatError::Truncated {
                context: "atlas offset table",
                offset: bytes.len() as u64,
            })?;

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let position = (HEADER_LEN + i * 4) as u64;
            offsets.push(cursor.read_u32::<LE>().at("atlas offset table", position)? as usize);
        }

        // next non-zero offset for every slot, scanning backwards once
        let mut next_offsets = vec![None; count];
        let mut next = None;
        for i in (0..count).rev() {
            next_offsets[i] = next;
            if offsets[i] != 0 {
                next = Some(offsets[i]);
            }
        }

        let mut slots = Vec::with_capacity(count);
        let mut out_of_range = 0usize;
        for (i, &offset) in offsets.iter().enumerate() {
            if offset == 0 {
                slots.push(SpriteSlot::Absent);
                continue;
            }
            if offset > bytes.len() {
                out_of_range += 1;
                slots.push(SpriteSlot::Stored(Vec::new()));
                continue;
            }
            let end = match next_offsets[i] {
                Some(next) if next >= offset => next.min(bytes.len()),
                _ => bytes.len(),
            };
            slots.push(SpriteSlot::Stored(bytes[offset..end].to_vec()));
        }

        if out_of_range > 0 {
            warn!(out_of_range, "atlas offsets point past the end of the file");
        }

        info!(signature, sprites = count, table_end, "atlas loaded");

        Ok(Self { signature, slots })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Serializes with payloads packed back to back in id order. Absent
    /// sprites keep a zero offset; empty payloads keep a non-zero offset
    /// spanning no bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let table_end = HEADER_LEN + self.slots.len() * 4;
        let payload_len: usize = self.slots.iter().map(|s| self.slot_bytes(s).len()).sum();

        let mut buf = Vec::with_capacity(table_end + payload_len);
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.extend_from_slice(&(self.slots.len() as u32).to_le_bytes());

        let mut cursor = table_end;
        for slot in &self.slots {
            match slot {
                SpriteSlot::Absent => buf.extend_from_slice(&0u32.to_le_bytes()),
                SpriteSlot::Stored(payload) => {
                    buf.extend_from_slice(&(cursor as u32).to_le_bytes());
                    cursor += payload.len();
                }
            }
        }
        for slot in &self.slots {
            buf.extend_from_slice(self.slot_bytes(slot));
        }
        buf
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes();
        std::fs::write(path.as_ref(), &bytes)?;
        info!(path = ?path.as_ref(), bytes = bytes.len(), "atlas saved");
        Ok(())
    }

    fn slot_bytes<'a>(&self, slot: &'a SpriteSlot) -> &'a [u8] {
        match slot {
            SpriteSlot::Absent => &[],
            SpriteSlot::Stored(payload) => payload,
        }
    }

    fn slot(&self, id: u32) -> Option<&SpriteSlot> {
        let index = (id as usize).checked_sub(1)?;
        self.slots.get(index)
    }

    pub fn sprite_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slot(id).is_some()
    }

    /// Raw payload bytes of sprite `id`; empty for absent or unknown ids.
    pub fn payload(&self, id: u32) -> &[u8] {
        self.slot(id).map(|s| self.slot_bytes(s)).unwrap_or(&[])
    }

    pub fn has_offset(&self, id: u32) -> bool {
        matches!(self.slot(id), Some(SpriteSlot::Stored(_)))
    }

    /// Drops the payload of sprite `id` while keeping its table entry.
    /// Returns whether any bytes were released.
    pub fn clear_payload(&mut self, id: u32) -> bool {
        let Some(index) = (id as usize).checked_sub(1) else {
            return false;
        };
        match self.slots.get_mut(index) {
            Some(SpriteSlot::Stored(payload)) if !payload.is_empty() => {
                payload.clear();
                payload.shrink_to_fit();
                true
            }
            _ => false,
        }
    }

    /// Decodes sprite `id`, reporting which layout matched.
    pub fn decode_sprite(&self, id: u32) -> Result<Option<(SpriteImage, DecodeHypothesis)>> {
        let payload = match self.slot(id) {
            None => {
                return Err(FormatError::InvalidId {
                    id,
                    min: 1,
                    max: self.sprite_count(),
                });
            }
            Some(SpriteSlot::Absent) => return Ok(None),
            Some(SpriteSlot::Stored(payload)) => payload,
        };
        if payload.len() < MIN_DECODABLE_LEN {
            return Ok(None);
        }
        decode_payload(payload)
            .map(Some)
            .ok_or(FormatError::UnsupportedSpriteFormat { sprite_id: id })
    }

    /// Best-effort decode: `None` for unknown ids, missing payloads and
    /// payloads no hypothesis accepts.
    pub fn get_sprite(&self, id: u32) -> Option<SpriteImage> {
        match self.decode_sprite(id) {
            Ok(decoded) => decoded.map(|(image, _)| image),
            Err(e) => {
                trace!("sprite {id}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atlas_bytes(payloads: &[Option<&[u8]>]) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x5A3B_0001u32.to_le_bytes());
        bytes.extend_from_slice(&(payloads.len() as u32).to_le_bytes());
        let mut cursor = HEADER_LEN + payloads.len() * 4;
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

    fn rgba_sprite() -> Vec<u8> {
        // 2x1: one transparent pixel, then one red pixel with alpha 0x80
        let mut p = vec![];
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&[0xFF, 0x00, 0x00, 0x80]);
        p
    }

    #[test]
    fn test_round_trip() {
        let sprite = rgba_sprite();
        let bytes = atlas_bytes(&[Some(&sprite), None, Some(&[]), Some(&sprite)]);
        let atlas = SpriteAtlas::from_bytes(&bytes).unwrap();
        assert_eq!(atlas.sprite_count(), 4);
        assert_eq!(atlas.payload(1), sprite.as_slice());
        assert!(!atlas.has_offset(2));
        assert!(atlas.has_offset(3));
        assert!(atlas.payload(3).is_empty());
        assert_eq!(atlas.payload(4), sprite.as_slice());
        assert_eq!(atlas.to_bytes(), bytes);
    }

    #[test]
    fn test_truncated_offset_table_is_fatal() {
        let mut bytes = atlas_bytes(&[None, None]);
        bytes.truncate(HEADER_LEN + 5);
        assert!(matches!(
            SpriteAtlas::from_bytes(&bytes),
            Err(FormatError::Truncated { context: "atlas offset table", .. })
        ));
        assert!(matches!(
            SpriteAtlas::from_bytes(&bytes[..6]),
            Err(FormatError::Truncated { context: "atlas header", .. })
        ));
    }

    #[test]
    fn test_rgba_hypothesis_wins_when_both_fit() {
        // the same bytes also decode as RGB, leaving one byte unread
        let sprite = rgba_sprite();
        assert!(attempt_decode(&sprite, DecodeHypothesis::new(0, 3)).is_ok());

        let (image, hypothesis) = decode_payload(&sprite).unwrap();
        assert_eq!(hypothesis, DecodeHypothesis::new(0, 4));
        assert_eq!(image.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(image.pixel(1, 0), [0xFF, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_rgb_payload_gets_opaque_alpha() {
        // 2x2 with a short size prefix; 3 RGB pixels overrun under RGBA
        let mut p = vec![0x20, 0x00];
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&3u16.to_le_bytes());
        p.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let (image, hypothesis) = decode_payload(&p).unwrap();
        assert_eq!(hypothesis, DecodeHypothesis::new(2, 3));
        assert_eq!(image.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(image.pixel(1, 0), [1, 2, 3, 0xFF]);
        assert_eq!(image.pixel(0, 1), [4, 5, 6, 0xFF]);
        assert_eq!(image.pixel(1, 1), [7, 8, 9, 0xFF]);
    }

    #[test]
    fn test_rejects_absurd_dimensions() {
        let mut p = vec![];
        p.extend_from_slice(&129u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        assert_eq!(
            attempt_decode(&p, DecodeHypothesis::new(0, 4)),
            Err(DecodeError::BadDimensions { width: 129, height: 1 })
        );
    }

    #[test]
    fn test_transparent_runs_wrap_rows() {
        let mut p = vec![];
        p.extend_from_slice(&3u16.to_le_bytes());
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&4u16.to_le_bytes());
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&[9, 9, 9, 9]);

        let image = attempt_decode(&p, DecodeHypothesis::new(0, 4)).unwrap();
        assert_eq!(image.pixel(1, 1), [9, 9, 9, 9]);
        assert_eq!(image.pixel(0, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_get_sprite_edge_cases() {
        let garbage = [0u8; 12];
        let sprite = rgba_sprite();
        let bytes = atlas_bytes(&[None, Some(&[1, 2, 3, 4]), Some(&garbage), Some(&sprite)]);
        let atlas = SpriteAtlas::from_bytes(&bytes).unwrap();

        assert!(atlas.get_sprite(0).is_none());
        assert!(atlas.get_sprite(1).is_none());
        assert!(atlas.get_sprite(2).is_none());
        assert!(matches!(
            atlas.decode_sprite(3),
            Err(FormatError::UnsupportedSpriteFormat { sprite_id: 3 })
        ));
        assert!(atlas.get_sprite(3).is_none());
        assert!(atlas.get_sprite(4).is_some());
        assert!(atlas.get_sprite(5).is_none());
    }

    #[test]
    fn test_cleared_payload_stays_addressable() {
        let sprite = rgba_sprite();
        let bytes = atlas_bytes(&[Some(&sprite), Some(&sprite), Some(&sprite)]);
        let mut atlas = SpriteAtlas::from_bytes(&bytes).unwrap();

        assert!(atlas.clear_payload(2));
        assert!(!atlas.clear_payload(2));

        let saved = atlas.to_bytes();
        assert_eq!(saved.len(), bytes.len() - sprite.len());

        let reloaded = SpriteAtlas::from_bytes(&saved).unwrap();
        assert_eq!(reloaded.sprite_count(), 3);
        assert!(reloaded.has_offset(2));
        assert!(reloaded.payload(2).is_empty());
        assert_eq!(reloaded.payload(3), sprite.as_slice());
    }
}

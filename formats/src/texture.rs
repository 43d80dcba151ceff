//! Texture block addressing.
//!
//! A texture block has no stored length: it is a small header of byte-sized
//! dimensions, an optional animation segment, then one sprite id per cell of
//! `width * height * layers * pattern_x * pattern_y * pattern_z * frames`.
//! Everything here works on plain byte slices so the same rules apply to
//! blocks owned by a [`crate::dat::ThingRecord`] and to blocks located inside
//! the opaque catalog tail.

use thiserror::Error;

/// Fixed part of the animation segment: mode, loop count, start frame.
pub const ANIMATION_FIXED_LEN: usize = 1 + 4 + 1;
/// Per-frame part of the animation segment: minimum and maximum duration.
pub const ANIMATION_FRAME_LEN: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureError {
    #[error("texture block truncated: {needed} bytes required, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("texture block has a zero-sized dimension")]
    ZeroSized,

    #[error("texture block dimensions overflow the addressable range")]
    Oversized,
}

/// Width of one sprite id in a texture block's id array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdWidth {
    U16,
    U32,
}

impl IdWidth {
    pub fn bytes(self) -> usize {
        match self {
            IdWidth::U16 => 2,
            IdWidth::U32 => 4,
        }
    }

    /// Infers the id width from the bytes left after the header. Anything
    /// other than an exact 2 or 4 bytes per sprite is ambiguous.
    pub fn infer(remaining: usize, sprite_count: usize) -> Option<Self> {
        if sprite_count == 0 || remaining % sprite_count != 0 {
            return None;
        }
        match remaining / sprite_count {
            2 => Some(IdWidth::U16),
            4 => Some(IdWidth::U32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHeader {
    pub width: u8,
    pub height: u8,
    /// Only present when the block spans more than one cell.
    pub exact_size: Option<u8>,
    pub layers: u8,
    pub pattern_x: u8,
    pub pattern_y: u8,
    pub pattern_z: u8,
    pub frames: u8,
}

impl TextureHeader {
    pub fn header_len(&self) -> usize {
        if self.exact_size.is_some() { 8 } else { 7 }
    }

    pub fn animation_len(&self) -> usize {
        if self.frames > 1 {
            ANIMATION_FIXED_LEN + ANIMATION_FRAME_LEN * self.frames as usize
        } else {
            0
        }
    }

    pub fn sprite_count(&self) -> Option<usize> {
        [
            self.height,
            self.layers,
            self.pattern_x,
            self.pattern_y,
            self.pattern_z,
            self.frames,
        ]
        .iter()
        .try_fold(self.width as usize, |acc, &n| acc.checked_mul(n as usize))
    }
}

/// Where the parts of a texture block sit relative to its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureLayout {
    pub header: TextureHeader,
    pub ids_offset: usize,
    pub sprite_count: usize,
}

impl TextureLayout {
    /// Reads the header and animation segment at the start of `bytes`.
    pub fn read(bytes: &[u8]) -> Result<Self, TextureError> {
        let byte = |i: usize| {
            bytes.get(i).copied().ok_or(TextureError::Truncated {
                needed: i + 1,
                available: bytes.len(),
            })
        };

        let width = byte(0)?;
        let height = byte(1)?;
        let mut pos = 2;
        let exact_size = if width > 1 || height > 1 {
            pos += 1;
            Some(byte(2)?)
        } else {
            None
        };

        let header = TextureHeader {
            width,
            height,
            exact_size,
            layers: byte(pos)?,
            pattern_x: byte(pos + 1)?,
            pattern_y: byte(pos + 2)?,
            pattern_z: byte(pos + 3)?,
            frames: byte(pos + 4)?,
        };

        let sprite_count = header.sprite_count().ok_or(TextureError::Oversized)?;
        if sprite_count == 0 {
            return Err(TextureError::ZeroSized);
        }

        let ids_offset = header.header_len() + header.animation_len();
        if bytes.len() < ids_offset {
            return Err(TextureError::Truncated {
                needed: ids_offset,
                available: bytes.len(),
            });
        }

        Ok(Self {
            header,
            ids_offset,
            sprite_count,
        })
    }

    pub fn total_len(&self, width: IdWidth) -> Option<usize> {
        self.sprite_count
            .checked_mul(width.bytes())
            .and_then(|ids| ids.checked_add(self.ids_offset))
    }
}

/// Computes the exact length of the block at the start of `bytes` assuming
/// ids of `width` bytes, failing if the slice is too short to hold it.
pub fn block_len(bytes: &[u8], width: IdWidth) -> Result<usize, TextureError> {
    let layout = TextureLayout::read(bytes)?;
    let len = layout.total_len(width).ok_or(TextureError::Oversized)?;
    if bytes.len() < len {
        return Err(TextureError::Truncated {
            needed: len,
            available: bytes.len(),
        });
    }
    Ok(len)
}

fn read_id(chunk: &[u8], width: IdWidth) -> u32 {
    match width {
        IdWidth::U16 => u16::from_le_bytes([chunk[0], chunk[1]]) as u32,
        IdWidth::U32 => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
    }
}

fn write_id(chunk: &mut [u8], width: IdWidth, id: u32) {
    match width {
        IdWidth::U16 => chunk.copy_from_slice(&(id as u16).to_le_bytes()),
        IdWidth::U32 => chunk.copy_from_slice(&id.to_le_bytes()),
    }
}

/// Result of rewriting the sprite ids of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Unchanged,
    Patched { rewritten: usize },
    AmbiguousIdWidth { remaining: usize, sprite_count: usize },
    Unreadable(TextureError),
}

impl PatchOutcome {
    pub fn is_patched(&self) -> bool {
        matches!(self, PatchOutcome::Patched { .. })
    }
}

/// Rewrites every sprite id for which `lookup` returns a replacement, in
/// place. `block` must span exactly one texture block; the id width is
/// inferred from the bytes after the header and the block is left untouched
/// when that inference is ambiguous. The block length never changes.
pub fn patch_sprite_ids(block: &mut [u8], lookup: impl Fn(u32) -> Option<u32>) -> PatchOutcome {
    let layout = match TextureLayout::read(block) {
        Ok(layout) => layout,
        Err(e) => return PatchOutcome::Unreadable(e),
    };

    let remaining = block.len() - layout.ids_offset;
    let Some(width) = IdWidth::infer(remaining, layout.sprite_count) else {
        return PatchOutcome::AmbiguousIdWidth {
            remaining,
            sprite_count: layout.sprite_count,
        };
    };

    let mut rewritten = 0;
    for chunk in block[layout.ids_offset..].chunks_exact_mut(width.bytes()) {
        let id = read_id(chunk, width);
        if let Some(replacement) = lookup(id) {
            if replacement != id {
                // canonical ids are always lower than the id they replace,
                // so a replacement fits wherever the original did
                write_id(chunk, width, replacement);
                rewritten += 1;
            }
        }
    }

    if rewritten == 0 {
        PatchOutcome::Unchanged
    } else {
        PatchOutcome::Patched { rewritten }
    }
}

/// An owned texture block using the catalog's 4-byte sprite ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBlock(Vec<u8>);

impl TextureBlock {
    /// Captures the block at the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self, TextureError> {
        let len = block_len(bytes, IdWidth::U32)?;
        Ok(Self(bytes[..len].to_vec()))
    }

    /// One cell, one layer, one frame, pointing at no sprite.
    pub fn empty() -> Self {
        Self(vec![1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn layout(&self) -> Result<TextureLayout, TextureError> {
        TextureLayout::read(&self.0)
    }

    /// Sprite ids in file order, with the id width inferred the same way
    /// the optimizer does.
    pub fn sprite_ids(&self) -> Result<Vec<u32>, TextureError> {
        let layout = self.layout()?;
        let remaining = self.0.len() - layout.ids_offset;
        let width = IdWidth::infer(remaining, layout.sprite_count).unwrap_or(IdWidth::U32);
        let ids: Vec<u32> = self.0[layout.ids_offset..]
            .chunks_exact(width.bytes())
            .take(layout.sprite_count)
            .map(|chunk| read_id(chunk, width))
            .collect();
        if ids.len() < layout.sprite_count {
            return Err(TextureError::Truncated {
                needed: layout.ids_offset + layout.sprite_count * width.bytes(),
                available: self.0.len(),
            });
        }
        Ok(ids)
    }
}

use thiserror::Error;

use crate::dat::{PayloadShape, ThingFlag};
use crate::texture::TextureError;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input truncated while reading {context} at offset {offset}")]
    Truncated { context: &'static str, offset: u64 },

    #[error("unknown flag 0x{flag:02X} in thing {thing_id} at offset {offset}")]
    UnknownFlag { flag: u8, thing_id: u16, offset: u64 },

    #[error("texture block of thing {thing_id} cannot be resolved: {source}")]
    UnresolvableTextureBlock {
        thing_id: u16,
        #[source]
        source: TextureError,
    },

    #[error("{count} bytes left over after the last record")]
    TrailingBytes { count: usize },

    #[error("sprite {sprite_id} matches none of the known payload layouts")]
    UnsupportedSpriteFormat { sprite_id: u32 },

    #[error("id {id} is outside the accepted range {min}..={max}")]
    InvalidId { id: u32, min: u32, max: u32 },

    #[error("flag {flag:?} expects a {expected:?} payload")]
    PayloadMismatch {
        flag: ThingFlag,
        expected: PayloadShape,
    },

    #[error("value {value} is not valid for {field}")]
    InvalidNumeric { field: &'static str, value: i64 },
}

pub type Result<T> = std::result::Result<T, FormatError>;

/// Attaches the read position to a failed byte read.
pub(crate) trait ReadContext<T> {
    fn at(self, context: &'static str, offset: u64) -> Result<T>;
}

impl<T> ReadContext<T> for std::io::Result<T> {
    fn at(self, context: &'static str, offset: u64) -> Result<T> {
        self.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FormatError::Truncated { context, offset },
            _ => FormatError::Io(e),
        })
    }
}

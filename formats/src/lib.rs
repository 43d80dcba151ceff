//! Codecs for the object catalog (`.dat`) and sprite atlas (`.spr`) files
//! used by the legacy tile client.

pub mod dat;
pub mod error;
pub mod spr;
pub mod texture;

pub use error::{FormatError, Result};

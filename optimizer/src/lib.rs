//! Sprite deduplication: a scan over the atlas that groups identical and
//! empty payloads, then an apply pass that points every texture block at
//! the canonical sprite of its group.

use thiserror::Error;
use tracing::info;

pub mod apply;
pub mod scan;

pub use apply::{ApplyOptions, ApplyReport, apply};
pub use scan::{AtlasFingerprint, RemapTable, ScanReport, scan};

/// Progress sink for the long-running phases. Both methods may be called
/// from a worker thread.
pub trait Progress: Send + Sync {
    fn progress(&self, percent: u8);
    fn log(&self, line: String);
}

pub struct NoProgress;

impl Progress for NoProgress {
    fn progress(&self, _percent: u8) {}
    fn log(&self, _line: String) {}
}

pub(crate) fn log_line(progress: &dyn Progress, line: String) {
    info!("{line}");
    progress.log(line);
}

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("scan report was taken from a different atlas (expected {expected}, found {found})")]
    AtlasMismatch {
        expected: AtlasFingerprint,
        found: AtlasFingerprint,
    },

    #[error("remap table is invalid: {0}")]
    InvalidRemap(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode scan report: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode scan report: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

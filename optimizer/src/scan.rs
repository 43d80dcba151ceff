use bincode::{Decode, Encode};
use formats::spr::SpriteAtlas;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::{OptimizeError, Progress, log_line};

const PROGRESS_INTERVAL: u32 = 2000;

/// Non-canonical sprite id -> canonical sprite id. Canonical ids are the
/// lowest id of their group and never appear as keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct RemapTable(BTreeMap<u32, u32>);

impl RemapTable {
    pub fn get(&self, id: u32) -> Option<u32> {
        self.0.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    /// Checks the table is chain-free, points downward, and stays inside
    /// `1..=sprite_count`.
    pub fn validate(&self, sprite_count: u32) -> Result<(), OptimizeError> {
        for (&from, &to) in &self.0 {
            if from == 0 || from > sprite_count || to == 0 || to > sprite_count {
                return Err(OptimizeError::InvalidRemap(format!(
                    "{from} -> {to} is outside 1..={sprite_count}"
                )));
            }
            if to >= from {
                return Err(OptimizeError::InvalidRemap(format!(
                    "{from} -> {to} does not point at a lower id"
                )));
            }
            if self.0.contains_key(&to) {
                return Err(OptimizeError::InvalidRemap(format!(
                    "{from} -> {to} chains through another entry"
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(u32, u32)> for RemapTable {
    fn from_iter<T: IntoIterator<Item = (u32, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identifies the atlas state a scan ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct AtlasFingerprint {
    pub signature: u32,
    pub sprite_count: u32,
    pub content_digest: [u8; 16],
}

impl AtlasFingerprint {
    /// Digest of every sprite's presence, payload length and payload bytes.
    pub fn of(atlas: &SpriteAtlas) -> Self {
        Self::from_digests(atlas, |id| md5::compute(atlas.payload(id)).0)
    }

    /// Folds per-sprite digests into one. `payload_digest` is only asked
    /// about sprites with a nonempty payload.
    fn from_digests(atlas: &SpriteAtlas, mut payload_digest: impl FnMut(u32) -> [u8; 16]) -> Self {
        let mut folded = Vec::with_capacity(atlas.sprite_count() as usize * 24);
        for id in 1..=atlas.sprite_count() {
            let len = if atlas.has_offset(id) {
                atlas.payload(id).len() as u64
            } else {
                u64::MAX
            };
            folded.extend_from_slice(&len.to_le_bytes());
            if len > 0 && len != u64::MAX {
                folded.extend_from_slice(&payload_digest(id));
            }
        }
        Self {
            signature: atlas.signature,
            sprite_count: atlas.sprite_count(),
            content_digest: md5::compute(&folded).0,
        }
    }
}

impl fmt::Display for AtlasFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}/{} sprites/", self.signature, self.sprite_count)?;
        for byte in &self.content_digest[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ScanReport {
    pub remap: RemapTable,
    pub empties_merged: u32,
    pub duplicates_merged: u32,
    pub total_sprites: u32,
    pub fingerprint: AtlasFingerprint,
}

impl ScanReport {
    pub fn merged(&self) -> u32 {
        self.empties_merged + self.duplicates_merged
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, OptimizeError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OptimizeError> {
        let (report, _): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())?;
        report.remap.validate(report.total_sprites)?;
        Ok(report)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), OptimizeError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptimizeError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// Groups sprites by exact payload content. The first empty sprite and the
/// first sprite of each distinct payload become canonical; every later
/// member of a group is remapped to it.
pub fn scan(atlas: &SpriteAtlas, progress: &dyn Progress) -> ScanReport {
    log_line(progress, "Starting scan...".to_string());

    let total = atlas.sprite_count();
    let mut first_by_digest: HashMap<[u8; 16], u32> = HashMap::new();
    let mut digests: HashMap<u32, [u8; 16]> = HashMap::new();
    let mut canonical_empty: Option<u32> = None;
    let mut remap = BTreeMap::new();
    let mut empties_merged = 0;
    let mut duplicates_merged = 0;

    for id in 1..=total {
        if id % PROGRESS_INTERVAL == 0 {
            progress.progress((id as u64 * 100 / total as u64) as u8);
        }

        let payload = atlas.payload(id);
        if payload.is_empty() {
            match canonical_empty {
                None => canonical_empty = Some(id),
                Some(canonical) => {
                    remap.insert(id, canonical);
                    empties_merged += 1;
                }
            }
            continue;
        }

        let digest = md5::compute(payload).0;
        digests.insert(id, digest);
        match first_by_digest.get(&digest) {
            Some(&canonical) => {
                debug!(id, canonical, "duplicate sprite");
                remap.insert(id, canonical);
                duplicates_merged += 1;
            }
            None => {
                first_by_digest.insert(digest, id);
            }
        }
    }

    let report = ScanReport {
        remap: RemapTable(remap),
        empties_merged,
        duplicates_merged,
        total_sprites: total,
        fingerprint: AtlasFingerprint::from_digests(atlas, |id| {
            digests
                .get(&id)
                .copied()
                .unwrap_or_else(|| md5::compute(atlas.payload(id)).0)
        }),
    };

    log_line(progress, "Scan completed.".to_string());
    log_line(progress, format!("Total sprites: {total}"));
    log_line(progress, format!("Empty merged: {empties_merged}"));
    log_line(progress, format!("Duplicates merged: {duplicates_merged}"));
    log_line(progress, format!("Total to optimize: {}", report.remap.len()));
    progress.progress(100);

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoProgress;

    /// Builds an atlas where the listed ids carry `payload`, the `empty`
    /// ids have an offset but no bytes, and every other id has a unique
    /// payload.
    fn atlas_with(count: u32, shared: &[u32], empty: &[u32]) -> SpriteAtlas {
        let mut payloads: Vec<Vec<u8>> = Vec::new();
        for id in 1..=count {
            if shared.contains(&id) {
                payloads.push(vec![0xAB; 16]);
            } else if empty.contains(&id) {
                payloads.push(vec![]);
            } else {
                payloads.push(id.to_le_bytes().repeat(4));
            }
        }

        let mut bytes = vec![];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        let mut cursor = 8 + count as usize * 4;
        for payload in &payloads {
            bytes.extend_from_slice(&(cursor as u32).to_le_bytes());
            cursor += payload.len();
        }
        for payload in &payloads {
            bytes.extend_from_slice(payload);
        }
        SpriteAtlas::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_duplicates_map_to_lowest_id() {
        let atlas = atlas_with(14, &[5, 9, 12], &[]);
        let report = scan(&atlas, &NoProgress);

        let expected: RemapTable = [(9, 5), (12, 5)].into_iter().collect();
        assert_eq!(report.remap, expected);
        assert_eq!(report.duplicates_merged, 2);
        assert_eq!(report.empties_merged, 0);
        assert!(report.remap.validate(14).is_ok());
    }

    #[test]
    fn test_empties_merge_into_first_empty() {
        let atlas = atlas_with(20, &[], &[3, 7, 20]);
        let report = scan(&atlas, &NoProgress);

        let expected: RemapTable = [(7, 3), (20, 3)].into_iter().collect();
        assert_eq!(report.remap, expected);
        assert_eq!(report.empties_merged, 2);
        assert_eq!(report.duplicates_merged, 0);
    }

    #[test]
    fn test_absent_offsets_count_as_empty() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 12]);
        let atlas = SpriteAtlas::from_bytes(&bytes).unwrap();

        let report = scan(&atlas, &NoProgress);
        let expected: RemapTable = [(2, 1), (3, 1)].into_iter().collect();
        assert_eq!(report.remap, expected);
    }

    #[test]
    fn test_validate_rejects_chains() {
        let chained: RemapTable = [(9, 5), (5, 2)].into_iter().collect();
        assert!(matches!(chained.validate(10), Err(OptimizeError::InvalidRemap(_))));

        let upward: RemapTable = [(3, 4)].into_iter().collect();
        assert!(upward.validate(10).is_err());

        let out_of_range: RemapTable = [(11, 1)].into_iter().collect();
        assert!(out_of_range.validate(10).is_err());
    }

    #[test]
    fn test_report_survives_encoding() {
        let atlas = atlas_with(14, &[5, 9, 12], &[1, 2]);
        let report = scan(&atlas, &NoProgress);
        let decoded = ScanReport::from_bytes(&report.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn test_fingerprint_tracks_payload_layout() {
        let mut atlas = atlas_with(4, &[1, 2], &[]);
        let before = AtlasFingerprint::of(&atlas);
        assert_eq!(before, AtlasFingerprint::of(&atlas));

        atlas.clear_payload(2);
        assert_ne!(before, AtlasFingerprint::of(&atlas));
    }

    #[test]
    fn test_fingerprint_tracks_payload_bytes() {
        // same lengths everywhere, only the bytes of sprite 2 differ
        let shared = atlas_with(4, &[1, 2], &[]);
        let distinct = atlas_with(4, &[1], &[]);
        assert_eq!(shared.payload(2).len(), distinct.payload(2).len());

        assert_ne!(AtlasFingerprint::of(&shared), AtlasFingerprint::of(&distinct));
        assert_eq!(scan(&shared, &NoProgress).fingerprint, AtlasFingerprint::of(&shared));
    }
}

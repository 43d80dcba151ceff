use formats::dat::Catalog;
use formats::spr::SpriteAtlas;
use formats::texture::{PatchOutcome, patch_sprite_ids};
use tracing::{debug, warn};

use crate::scan::{AtlasFingerprint, RemapTable, ScanReport};
use crate::{OptimizeError, Progress, log_line};

const PROGRESS_INTERVAL: usize = 1000;
const CATALOG_SHARE: usize = 90;

#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Drop the payload of every remapped sprite once nothing points at it.
    pub clean_empty: bool,
    /// Also patch outfits, effects and missiles when their records can be
    /// walked unambiguously.
    pub patch_tail: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            clean_empty: true,
            patch_tail: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub things_updated: usize,
    pub ids_rewritten: usize,
    pub ambiguous_skipped: usize,
    pub unreadable_skipped: usize,
    pub sprites_cleared: usize,
    pub tail_patched: bool,
    /// Cleaning was requested but withheld because some texture blocks may
    /// still point at remapped sprites.
    pub clean_skipped: bool,
}

impl ApplyReport {
    fn record(&mut self, outcome: PatchOutcome) {
        match outcome {
            PatchOutcome::Patched { rewritten } => {
                self.things_updated += 1;
                self.ids_rewritten += rewritten;
            }
            PatchOutcome::Unchanged => {}
            PatchOutcome::AmbiguousIdWidth { .. } => self.ambiguous_skipped += 1,
            PatchOutcome::Unreadable(_) => self.unreadable_skipped += 1,
        }
    }
}

/// Rewrites the sprite ids of one texture block through `remap`.
pub fn patch_block(block: &mut [u8], remap: &RemapTable) -> PatchOutcome {
    patch_sprite_ids(block, |id| remap.get(id))
}

/// Names the texture blocks that may still reference remapped ids after
/// patching, if any.
fn unpatched_references(catalog: &Catalog, result: &ApplyReport) -> Option<String> {
    if catalog.tail_thing_count() > 0 && !result.tail_patched {
        return Some("outfits, effects and missiles were not patched".to_string());
    }
    let skipped = result.ambiguous_skipped + result.unreadable_skipped;
    if skipped > 0 {
        return Some(format!("{skipped} texture blocks could not be patched"));
    }
    None
}

/// Points every texture block in `catalog` at canonical sprites and,
/// optionally, drops the payloads nothing references any more.
pub fn apply(
    catalog: &mut Catalog,
    atlas: &mut SpriteAtlas,
    report: &ScanReport,
    options: ApplyOptions,
    progress: &dyn Progress,
) -> Result<ApplyReport, OptimizeError> {
    let found = AtlasFingerprint::of(atlas);
    if found != report.fingerprint {
        return Err(OptimizeError::AtlasMismatch {
            expected: report.fingerprint,
            found,
        });
    }
    report.remap.validate(atlas.sprite_count())?;

    log_line(progress, "Starting apply...".to_string());
    progress.progress(0);

    let remap = &report.remap;
    let mut result = ApplyReport::default();

    let tail_blocks = if options.patch_tail && catalog.tail_thing_count() > 0 {
        match catalog.tail_texture_blocks() {
            Ok(blocks) => Some(blocks),
            Err(e) => {
                warn!("leaving outfits, effects and missiles untouched: {e}");
                log_line(progress, format!("Skipping outfits, effects and missiles: {e}"));
                None
            }
        }
    } else {
        None
    };

    let total = catalog.item_ids().len() + tail_blocks.as_ref().map_or(0, Vec::len);
    let mut visited = 0usize;
    let tick = |visited: usize| {
        if visited % PROGRESS_INTERVAL == 0 && total > 0 {
            progress.progress((visited * CATALOG_SHARE / total) as u8);
        }
    };

    for (id, record) in catalog.items_mut() {
        let outcome = patch_block(record.texture.as_mut_bytes(), remap);
        if let PatchOutcome::AmbiguousIdWidth { remaining, sprite_count } = outcome {
            debug!(id, remaining, sprite_count, "skipping texture block with ambiguous id width");
        }
        result.record(outcome);
        visited += 1;
        tick(visited);
    }

    if let Some(blocks) = tail_blocks {
        let tail = catalog.tail_mut();
        for range in blocks {
            result.record(patch_block(&mut tail[range], remap));
            visited += 1;
            tick(visited);
        }
        result.tail_patched = true;
    }

    progress.progress(CATALOG_SHARE as u8);
    log_line(progress, format!("Things updated: {}", result.things_updated));
    if result.ambiguous_skipped > 0 {
        log_line(
            progress,
            format!("Skipped {} texture blocks with an ambiguous id width", result.ambiguous_skipped),
        );
    }

    if options.clean_empty {
        match unpatched_references(catalog, &result) {
            Some(reason) => {
                warn!("keeping remapped sprite payloads: {reason}");
                log_line(progress, format!("Sprites not cleaned: {reason}"));
                result.clean_skipped = true;
            }
            None => {
                for id in remap.ids() {
                    if atlas.clear_payload(id) {
                        result.sprites_cleared += 1;
                    }
                }
                log_line(progress, format!("Sprites cleaned: {}", result.sprites_cleared));
            }
        }
    }

    progress.progress(100);
    log_line(progress, "Apply completed.".to_string());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoProgress, scan};

    fn block(sprite_ids: &[u32]) -> Vec<u8> {
        let mut bytes = vec![1, 1, 1, sprite_ids.len() as u8, 1, 1, 1];
        for id in sprite_ids {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        bytes
    }

    fn record(sprite_ids: &[u32]) -> Vec<u8> {
        let mut bytes = vec![0x05, 0xFF];
        bytes.extend(block(sprite_ids));
        bytes
    }

    fn catalog_bytes(items: &[&[u32]], outfits: &[&[u32]]) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x4A10_59E8u32.to_le_bytes());
        bytes.extend_from_slice(&(99 + items.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(outfits.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        for ids in items.iter().chain(outfits) {
            bytes.extend(record(ids));
        }
        bytes
    }

    fn catalog(items: &[&[u32]], outfits: &[&[u32]]) -> Catalog {
        Catalog::from_bytes(&catalog_bytes(items, outfits)).unwrap()
    }

    /// Sprites 5, 9 and 12 share a payload; 3, 7 and 20 are empty.
    fn atlas() -> SpriteAtlas {
        let count = 20u32;
        let payloads: Vec<Vec<u8>> = (1..=count)
            .map(|id| match id {
                5 | 9 | 12 => vec![0xAB; 12],
                3 | 7 | 20 => vec![],
                _ => id.to_le_bytes().repeat(3),
            })
            .collect();

        let mut bytes = vec![];
        bytes.extend_from_slice(&7u32.to_le_bytes());
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
    fn test_patch_rewrites_in_place() {
        let remap: RemapTable = [(9, 5), (12, 5)].into_iter().collect();
        let mut bytes = block(&[9]);
        let len = bytes.len();

        let outcome = patch_block(&mut bytes, &remap);

        assert_eq!(outcome, PatchOutcome::Patched { rewritten: 1 });
        assert_eq!(bytes.len(), len);
        assert_eq!(&bytes[7..], &5u32.to_le_bytes());
    }

    #[test]
    fn test_patch_skips_three_byte_ids() {
        let remap: RemapTable = [(9, 5)].into_iter().collect();
        let mut bytes = vec![1, 1, 1, 1, 1, 1, 1, 9, 0, 0];
        let before = bytes.clone();

        let outcome = patch_block(&mut bytes, &remap);

        assert!(matches!(outcome, PatchOutcome::AmbiguousIdWidth { remaining: 3, sprite_count: 1 }));
        assert_eq!(bytes, before);

        let mut report = ApplyReport::default();
        report.record(outcome);
        assert_eq!(report.things_updated, 0);
        assert_eq!(report.ambiguous_skipped, 1);
    }

    #[test]
    fn test_apply_patches_items_and_tail() {
        let mut catalog = catalog(&[&[9], &[1, 2], &[12, 7]], &[&[20, 9]]);
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);

        let result = apply(&mut catalog, &mut atlas, &report, ApplyOptions::default(), &NoProgress).unwrap();

        assert_eq!(result.things_updated, 3);
        assert_eq!(result.ids_rewritten, 5);
        assert!(result.tail_patched);
        assert_eq!(catalog.item(100).unwrap().texture.sprite_ids().unwrap(), vec![5]);
        assert_eq!(catalog.item(101).unwrap().texture.sprite_ids().unwrap(), vec![1, 2]);
        assert_eq!(catalog.item(102).unwrap().texture.sprite_ids().unwrap(), vec![5, 3]);

        let blocks = catalog.tail_texture_blocks().unwrap();
        let tail_block = &catalog.tail()[blocks[0].clone()];
        assert_eq!(&tail_block[7..11], &3u32.to_le_bytes());
        assert_eq!(&tail_block[11..15], &5u32.to_le_bytes());
    }

    #[test]
    fn test_clean_keeps_offsets() {
        let mut catalog = catalog(&[&[9]], &[]);
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);

        let result = apply(&mut catalog, &mut atlas, &report, ApplyOptions::default(), &NoProgress).unwrap();

        assert_eq!(result.sprites_cleared, 2);
        assert_eq!(atlas.sprite_count(), 20);
        assert!(atlas.payload(9).is_empty());
        assert!(atlas.has_offset(9));
        assert_eq!(atlas.payload(5).len(), 12);
    }

    #[test]
    fn test_clean_can_be_disabled() {
        let mut catalog = catalog(&[&[9]], &[]);
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);
        let options = ApplyOptions {
            clean_empty: false,
            patch_tail: true,
        };

        let result = apply(&mut catalog, &mut atlas, &report, options, &NoProgress).unwrap();

        assert_eq!(result.sprites_cleared, 0);
        assert_eq!(atlas.payload(9).len(), 12);
    }

    #[test]
    fn test_rejects_report_from_other_atlas() {
        let mut catalog = catalog(&[&[9]], &[]);
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);
        atlas.clear_payload(1);

        let err = apply(&mut catalog, &mut atlas, &report, ApplyOptions::default(), &NoProgress).unwrap_err();

        assert!(matches!(err, OptimizeError::AtlasMismatch { .. }));
        assert_eq!(catalog.item(100).unwrap().texture.sprite_ids().unwrap(), vec![9]);
    }

    #[test]
    fn test_broken_tail_is_left_alone() {
        let mut bytes = catalog_bytes(&[&[9]], &[&[12]]);
        // bytes the declared outfit count does not account for
        bytes.extend_from_slice(&[0xFF; 3]);
        let mut catalog = Catalog::from_bytes(&bytes).unwrap();
        let tail_before = catalog.tail().to_vec();
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);

        let result = apply(&mut catalog, &mut atlas, &report, ApplyOptions::default(), &NoProgress).unwrap();

        assert!(!result.tail_patched);
        assert_eq!(result.things_updated, 1);
        assert_eq!(catalog.tail(), tail_before.as_slice());
    }

    #[test]
    fn test_unpatched_tail_keeps_payloads() {
        // the outfit still points at 12, a duplicate of 5
        let mut bytes = catalog_bytes(&[&[9]], &[&[12]]);
        bytes.extend_from_slice(&[0xFF; 3]);
        let mut catalog = Catalog::from_bytes(&bytes).unwrap();
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);

        let result = apply(&mut catalog, &mut atlas, &report, ApplyOptions::default(), &NoProgress).unwrap();

        assert!(result.clean_skipped);
        assert_eq!(result.sprites_cleared, 0);
        assert_eq!(atlas.payload(12), &[0xAB; 12]);
        assert_eq!(atlas.payload(9).len(), 12);
        assert_eq!(catalog.item(100).unwrap().texture.sprite_ids().unwrap(), vec![5]);
    }

    #[test]
    fn test_items_only_keeps_payloads_when_tail_exists() {
        let mut catalog = catalog(&[&[9]], &[&[12]]);
        let mut atlas = atlas();
        let report = scan(&atlas, &NoProgress);
        let options = ApplyOptions {
            clean_empty: true,
            patch_tail: false,
        };

        let result = apply(&mut catalog, &mut atlas, &report, options, &NoProgress).unwrap();

        assert!(!result.tail_patched);
        assert!(result.clean_skipped);
        assert_eq!(atlas.payload(12).len(), 12);
    }

    #[test]
    fn test_rejects_report_from_same_shaped_atlas() {
        fn two_sprites(second: [u8; 4]) -> SpriteAtlas {
            let mut bytes = vec![];
            bytes.extend_from_slice(&7u32.to_le_bytes());
            bytes.extend_from_slice(&2u32.to_le_bytes());
            bytes.extend_from_slice(&16u32.to_le_bytes());
            bytes.extend_from_slice(&20u32.to_le_bytes());
            bytes.extend_from_slice(&[1, 2, 3, 4]);
            bytes.extend_from_slice(&second);
            SpriteAtlas::from_bytes(&bytes).unwrap()
        }
        let scanned = two_sprites([1, 2, 3, 4]);
        let report = scan(&scanned, &NoProgress);
        assert_eq!(report.remap.get(2), Some(1));

        let mut other = two_sprites([9, 9, 9, 9]);
        let mut catalog = catalog(&[&[2]], &[]);

        let err = apply(&mut catalog, &mut other, &report, ApplyOptions::default(), &NoProgress).unwrap_err();

        assert!(matches!(err, OptimizeError::AtlasMismatch { .. }));
        assert_eq!(other.payload(2), &[9, 9, 9, 9]);
        assert_eq!(catalog.item(100).unwrap().texture.sprite_ids().unwrap(), vec![2]);
    }
}

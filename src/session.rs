//! One load, edit and save session over a catalog and, optionally, its atlas.

use formats::FormatError;
use formats::dat::{Catalog, FlagValue, NumericValue, RecordSnapshot, ThingFlag};
use formats::spr::{SpriteAtlas, SpriteImage};
use optimizer::{ApplyOptions, ApplyReport, OptimizeError, Progress, ScanReport};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub use formats::dat::NumericField;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no sprite atlas is loaded")]
    NoAtlas,

    #[error("{field} takes {expected} value(s), got {got}")]
    Arity {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Builds the payload for `field` from literal values, range-checking each
/// one against the width it is stored with.
pub fn numeric_value(field: NumericField, values: &[i64]) -> Result<NumericValue> {
    if values.len() != field.arity() {
        return Err(SessionError::Arity {
            field: field.name(),
            expected: field.arity(),
            got: values.len(),
        });
    }
    let flag = field.flag().name();
    let unsigned = |v: i64| {
        u16::try_from(v).map_err(|_| FormatError::InvalidNumeric { field: flag, value: v })
    };
    let signed = |v: i64| {
        i16::try_from(v).map_err(|_| FormatError::InvalidNumeric { field: flag, value: v })
    };

    Ok(match field {
        NumericField::Ground => NumericValue::Ground(unsigned(values[0])?),
        NumericField::Elevation => NumericValue::Elevation(unsigned(values[0])?),
        NumericField::MinimapColor => NumericValue::MinimapColor(unsigned(values[0])?),
        NumericField::Offset => NumericValue::Offset {
            x: signed(values[0])?,
            y: signed(values[1])?,
        },
        NumericField::Light => NumericValue::Light {
            level: unsigned(values[0])?,
            color: unsigned(values[1])?,
        },
        NumericField::Writable => NumericValue::Writable(unsigned(values[0])?),
        NumericField::WritableOnce => NumericValue::WritableOnce(unsigned(values[0])?),
        NumericField::LensHelp => NumericValue::LensHelp(unsigned(values[0])?),
        NumericField::Cloth => NumericValue::Cloth(unsigned(values[0])?),
        NumericField::DefaultAction => NumericValue::DefaultAction(unsigned(values[0])?),
    })
}

/// Presence of one flag across a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    All,
    None,
    Mixed,
}

/// Payload of one numeric field across the records that carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericState {
    Absent,
    Uniform(FlagValue),
    Mixed,
}

/// Snapshot of the records matching a query.
#[derive(Debug, Clone)]
pub struct Selection {
    pub records: Vec<RecordSnapshot>,
    /// Requested ids with no record.
    pub missing: Vec<u16>,
}

impl Selection {
    pub fn ids(&self) -> Vec<u16> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn flag_state(&self, flag: ThingFlag) -> FlagState {
        let present = self.records.iter().filter(|r| r.props.contains(flag)).count();
        match present {
            0 => FlagState::None,
            n if n == self.records.len() => FlagState::All,
            _ => FlagState::Mixed,
        }
    }

    /// Common payload among the records that carry the field's flag.
    pub fn numeric_state(&self, field: NumericField) -> NumericState {
        let mut values = self.records.iter().filter_map(|r| r.props.get(field.flag()));
        let Some(first) = values.next() else {
            return NumericState::Absent;
        };
        if values.all(|v| v == first) {
            NumericState::Uniform(first.clone())
        } else {
            NumericState::Mixed
        }
    }
}

/// Acknowledges that deleting ids renumbers every record after them.
#[derive(Debug, Clone, Copy)]
pub struct ReindexConfirmation(());

impl ReindexConfirmation {
    pub fn acknowledge() -> Self {
        Self(())
    }
}

/// Exclusive owner of a catalog and its atlas between load and save.
pub struct Editor {
    catalog: Catalog,
    catalog_path: PathBuf,
    atlas: Option<SpriteAtlas>,
    atlas_path: Option<PathBuf>,
    catalog_dirty: bool,
    atlas_dirty: bool,
}

impl Editor {
    pub fn open(catalog_path: impl AsRef<Path>) -> Result<Self> {
        let catalog_path = catalog_path.as_ref().to_path_buf();
        let catalog = Catalog::load(&catalog_path)?;
        info!(path = ?catalog_path, "opened catalog");
        Ok(Self::from_catalog(catalog, catalog_path))
    }

    pub fn from_catalog(catalog: Catalog, catalog_path: PathBuf) -> Self {
        Self::with_parts(catalog, catalog_path, None, None)
    }

    /// Resumes a session over files loaded elsewhere, for instance after a
    /// background optimize handed them back.
    pub fn with_parts(
        catalog: Catalog,
        catalog_path: PathBuf,
        atlas: Option<SpriteAtlas>,
        atlas_path: Option<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            catalog_path,
            atlas,
            atlas_path,
            catalog_dirty: false,
            atlas_dirty: false,
        }
    }

    pub fn load_atlas(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.atlas = Some(SpriteAtlas::load(&path)?);
        info!(path = ?path, "opened atlas");
        self.atlas_path = Some(path);
        self.atlas_dirty = false;
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn atlas(&self) -> Option<&SpriteAtlas> {
        self.atlas.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.catalog_dirty || self.atlas_dirty
    }

    fn check_ids(&self, ids: &[u16]) -> Result<()> {
        let range = self.catalog.item_ids();
        if let Some(&id) = ids.iter().find(|id| !range.contains(*id)) {
            return Err(FormatError::InvalidId {
                id: id as u32,
                min: *range.start() as u32,
                max: *range.end() as u32,
            }
            .into());
        }
        Ok(())
    }

    pub fn query(&self, ids: &[u16]) -> Selection {
        let records = self.catalog.query(ids);
        let missing = ids
            .iter()
            .copied()
            .filter(|id| self.catalog.item(*id).is_none())
            .collect();
        Selection { records, missing }
    }

    pub fn apply_changes(
        &mut self,
        ids: &[u16],
        to_set: &[ThingFlag],
        to_unset: &[ThingFlag],
    ) -> Result<usize> {
        self.check_ids(ids)?;
        let changed = self.catalog.apply_changes(ids, to_set, to_unset);
        self.catalog_dirty |= changed > 0;
        Ok(changed)
    }

    pub fn apply_numeric(&mut self, ids: &[u16], field: NumericField, values: &[i64]) -> Result<usize> {
        self.check_ids(ids)?;
        let value = numeric_value(field, values)?;
        let changed = self.catalog.apply_numeric(ids, value)?;
        self.catalog_dirty |= changed > 0;
        Ok(changed)
    }

    pub fn insert_ids(&mut self, ids: &[u16]) -> Result<usize> {
        let inserted = self.catalog.insert_ids(ids)?;
        self.catalog_dirty |= inserted > 0;
        Ok(inserted)
    }

    pub fn delete_ids(&mut self, ids: &[u16], _confirmed: ReindexConfirmation) -> Result<usize> {
        self.check_ids(ids)?;
        let deleted = self.catalog.delete_ids(ids);
        self.catalog_dirty |= deleted > 0;
        Ok(deleted)
    }

    pub fn sprite_image(&self, id: u32) -> Option<SpriteImage> {
        self.atlas.as_ref()?.get_sprite(id)
    }

    /// Decoded sprites of one record, in texture order. Sprites that cannot
    /// be decoded are `None`.
    pub fn record_sprites(&self, id: u16) -> Vec<(u32, Option<SpriteImage>)> {
        let Some(record) = self.catalog.item(id) else {
            return Vec::new();
        };
        match record.texture.sprite_ids() {
            Ok(ids) => ids
                .into_iter()
                .map(|sprite| (sprite, self.sprite_image(sprite)))
                .collect(),
            Err(e) => {
                warn!(id, "texture block unreadable: {e}");
                Vec::new()
            }
        }
    }

    pub fn scan_for_duplicates(&self, progress: &dyn Progress) -> Result<ScanReport> {
        let atlas = self.atlas.as_ref().ok_or(SessionError::NoAtlas)?;
        Ok(optimizer::scan(atlas, progress))
    }

    pub fn apply_optimization(
        &mut self,
        report: &ScanReport,
        options: ApplyOptions,
        progress: &dyn Progress,
    ) -> Result<ApplyReport> {
        let atlas = self.atlas.as_mut().ok_or(SessionError::NoAtlas)?;
        let result = optimizer::apply(&mut self.catalog, atlas, report, options, progress)?;
        self.catalog_dirty |= result.things_updated > 0;
        self.atlas_dirty |= result.sprites_cleared > 0;
        Ok(result)
    }

    /// Writes the catalog to `path`, or back to where it was opened from.
    pub fn save_catalog(&mut self, path: Option<&Path>) -> Result<()> {
        let path = path.unwrap_or(&self.catalog_path).to_path_buf();
        write_replacing(&path, &self.catalog.to_bytes())?;
        info!(path = ?path, "saved catalog");
        self.catalog_dirty = false;
        Ok(())
    }

    pub fn save_atlas(&mut self, path: Option<&Path>) -> Result<()> {
        let atlas = self.atlas.as_ref().ok_or(SessionError::NoAtlas)?;
        let path = match (path, self.atlas_path.as_deref()) {
            (Some(path), _) | (None, Some(path)) => path.to_path_buf(),
            (None, None) => return Err(SessionError::NoAtlas),
        };
        write_replacing(&path, &atlas.to_bytes())?;
        info!(path = ?path, "saved atlas");
        self.atlas_dirty = false;
        Ok(())
    }
}

/// Writes next to `path` first and renames over it, so a failed write
/// leaves the old file in place.
fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)
}

use byteorder::{LE, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::ops::{Range, RangeInclusive};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{FormatError, ReadContext, Result};
use crate::texture::{self, IdWidth, TextureBlock};

pub const FIRST_ITEM_ID: u16 = 100;
pub const LAST_FLAG: u8 = 0xFF;
pub const MAX_MINIMAP_COLOR: u16 = 215;

const MARKET_HEADER_LEN: usize = 8;

/// Every property tag a thing record can carry, in file order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum ThingFlag {
    Ground = 0x00,
    GroundBorder = 0x01,
    OnBottom = 0x02,
    OnTop = 0x03,
    Container = 0x04,
    Stackable = 0x05,
    ForceUse = 0x06,
    MultiUse = 0x07,
    Writable = 0x08,
    WritableOnce = 0x09,
    FluidContainer = 0x0A,
    IsFluid = 0x0B,
    Unpassable = 0x0C,
    Unmoveable = 0x0D,
    BlockMissile = 0x0E,
    BlockPathfind = 0x0F,
    NoMoveAnimation = 0x10,
    Pickupable = 0x11,
    Hangable = 0x12,
    HookVertical = 0x13,
    HookHorizontal = 0x14,
    Rotatable = 0x15,
    HasLight = 0x16,
    DontHide = 0x17,
    Translucent = 0x18,
    HasOffset = 0x19,
    HasElevation = 0x1A,
    LyingObject = 0x1B,
    AnimateAlways = 0x1C,
    ShowOnMinimap = 0x1D,
    LensHelp = 0x1E,
    FullGround = 0x1F,
    IgnoreLook = 0x20,
    IsCloth = 0x21,
    MarketItem = 0x22,
    DefaultAction = 0x23,
    Wrappable = 0x24,
    Unwrappable = 0x25,
    TopEffect = 0x26,
    Usable = 0x27,
}

/// How many payload bytes follow a flag byte, and how to read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    None,
    U16,
    Light,
    Offset,
    Market,
}

impl ThingFlag {
    pub const ALL: [ThingFlag; 40] = [
        ThingFlag::Ground,
        ThingFlag::GroundBorder,
        ThingFlag::OnBottom,
        ThingFlag::OnTop,
        ThingFlag::Container,
        ThingFlag::Stackable,
        ThingFlag::ForceUse,
        ThingFlag::MultiUse,
        ThingFlag::Writable,
        ThingFlag::WritableOnce,
        ThingFlag::FluidContainer,
        ThingFlag::IsFluid,
        ThingFlag::Unpassable,
        ThingFlag::Unmoveable,
        ThingFlag::BlockMissile,
        ThingFlag::BlockPathfind,
        ThingFlag::NoMoveAnimation,
        ThingFlag::Pickupable,
        ThingFlag::Hangable,
        ThingFlag::HookVertical,
        ThingFlag::HookHorizontal,
        ThingFlag::Rotatable,
        ThingFlag::HasLight,
        ThingFlag::DontHide,
        ThingFlag::Translucent,
        ThingFlag::HasOffset,
        ThingFlag::HasElevation,
        ThingFlag::LyingObject,
        ThingFlag::AnimateAlways,
        ThingFlag::ShowOnMinimap,
        ThingFlag::LensHelp,
        ThingFlag::FullGround,
        ThingFlag::IgnoreLook,
        ThingFlag::IsCloth,
        ThingFlag::MarketItem,
        ThingFlag::DefaultAction,
        ThingFlag::Wrappable,
        ThingFlag::Unwrappable,
        ThingFlag::TopEffect,
        ThingFlag::Usable,
    ];

    pub fn shape(self) -> PayloadShape {
        match self {
            ThingFlag::Ground
            | ThingFlag::Writable
            | ThingFlag::WritableOnce
            | ThingFlag::HasElevation
            | ThingFlag::ShowOnMinimap
            | ThingFlag::LensHelp
            | ThingFlag::IsCloth
            | ThingFlag::DefaultAction => PayloadShape::U16,
            ThingFlag::HasLight => PayloadShape::Light,
            ThingFlag::HasOffset => PayloadShape::Offset,
            ThingFlag::MarketItem => PayloadShape::Market,
            _ => PayloadShape::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ThingFlag::Ground => "Ground",
            ThingFlag::GroundBorder => "GroundBorder",
            ThingFlag::OnBottom => "OnBottom",
            ThingFlag::OnTop => "OnTop",
            ThingFlag::Container => "Container",
            ThingFlag::Stackable => "Stackable",
            ThingFlag::ForceUse => "ForceUse",
            ThingFlag::MultiUse => "MultiUse",
            ThingFlag::Writable => "Writable",
            ThingFlag::WritableOnce => "WritableOnce",
            ThingFlag::FluidContainer => "FluidContainer",
            ThingFlag::IsFluid => "IsFluid",
            ThingFlag::Unpassable => "Unpassable",
            ThingFlag::Unmoveable => "Unmoveable",
            ThingFlag::BlockMissile => "BlockMissile",
            ThingFlag::BlockPathfind => "BlockPathfind",
            ThingFlag::NoMoveAnimation => "NoMoveAnimation",
            ThingFlag::Pickupable => "Pickupable",
            ThingFlag::Hangable => "Hangable",
            ThingFlag::HookVertical => "HookVertical",
            ThingFlag::HookHorizontal => "HookHorizontal",
            ThingFlag::Rotatable => "Rotatable",
            ThingFlag::HasLight => "HasLight",
            ThingFlag::DontHide => "DontHide",
            ThingFlag::Translucent => "Translucent",
            ThingFlag::HasOffset => "HasOffset",
            ThingFlag::HasElevation => "HasElevation",
            ThingFlag::LyingObject => "LyingObject",
            ThingFlag::AnimateAlways => "AnimateAlways",
            ThingFlag::ShowOnMinimap => "ShowOnMinimap",
            ThingFlag::LensHelp => "LensHelp",
            ThingFlag::FullGround => "FullGround",
            ThingFlag::IgnoreLook => "IgnoreLook",
            ThingFlag::IsCloth => "IsCloth",
            ThingFlag::MarketItem => "MarketItem",
            ThingFlag::DefaultAction => "DefaultAction",
            ThingFlag::Wrappable => "Wrappable",
            ThingFlag::Unwrappable => "Unwrappable",
            ThingFlag::TopEffect => "TopEffect",
            ThingFlag::Usable => "Usable",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.name().eq_ignore_ascii_case(name))
    }
}

/// Variable-length market payload. The name length is the last field of the
/// fixed header; the name is followed by two more 16-bit fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketData {
    pub category: u16,
    pub trade_as: u16,
    pub show_as: u16,
    pub name: Vec<u8>,
    pub restrict_vocation: u16,
    pub required_level: u16,
}

impl MarketData {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let offset = cursor.position();
        let mut header = [0u8; MARKET_HEADER_LEN];
        cursor.read_exact(&mut header).at("market header", offset)?;
        let field = |i: usize| u16::from_le_bytes([header[i], header[i + 1]]);
        let name_len = field(6) as usize;

        let mut name = vec![0u8; name_len];
        let offset = cursor.position();
        cursor.read_exact(&mut name).at("market name", offset)?;

        let offset = cursor.position();
        let restrict_vocation = cursor.read_u16::<LE>().at("market data", offset)?;
        let required_level = cursor.read_u16::<LE>().at("market data", offset + 2)?;

        Ok(Self {
            category: field(0),
            trade_as: field(2),
            show_as: field(4),
            name,
            restrict_vocation,
            required_level,
        })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.category.to_le_bytes());
        buf.extend_from_slice(&self.trade_as.to_le_bytes());
        buf.extend_from_slice(&self.show_as.to_le_bytes());
        buf.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.name);
        buf.extend_from_slice(&self.restrict_vocation.to_le_bytes());
        buf.extend_from_slice(&self.required_level.to_le_bytes());
    }
}

/// A flag's presence together with its payload, if its shape has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Present,
    Value(u16),
    Light { level: u16, color: u16 },
    Offset { x: i16, y: i16 },
    Market(MarketData),
}

impl FlagValue {
    pub fn zeroed(shape: PayloadShape) -> Self {
        match shape {
            PayloadShape::None => FlagValue::Present,
            PayloadShape::U16 => FlagValue::Value(0),
            PayloadShape::Light => FlagValue::Light { level: 0, color: 0 },
            PayloadShape::Offset => FlagValue::Offset { x: 0, y: 0 },
            PayloadShape::Market => FlagValue::Market(MarketData::default()),
        }
    }

    pub fn shape(&self) -> PayloadShape {
        match self {
            FlagValue::Present => PayloadShape::None,
            FlagValue::Value(_) => PayloadShape::U16,
            FlagValue::Light { .. } => PayloadShape::Light,
            FlagValue::Offset { .. } => PayloadShape::Offset,
            FlagValue::Market(_) => PayloadShape::Market,
        }
    }

    fn read(shape: PayloadShape, cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let offset = cursor.position();
        Ok(match shape {
            PayloadShape::None => FlagValue::Present,
            PayloadShape::U16 => FlagValue::Value(cursor.read_u16::<LE>().at("flag payload", offset)?),
            PayloadShape::Light => FlagValue::Light {
                level: cursor.read_u16::<LE>().at("light payload", offset)?,
                color: cursor.read_u16::<LE>().at("light payload", offset + 2)?,
            },
            PayloadShape::Offset => FlagValue::Offset {
                x: cursor.read_i16::<LE>().at("offset payload", offset)?,
                y: cursor.read_i16::<LE>().at("offset payload", offset + 2)?,
            },
            PayloadShape::Market => FlagValue::Market(MarketData::read(cursor)?),
        })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            FlagValue::Present => {}
            FlagValue::Value(v) => buf.extend_from_slice(&v.to_le_bytes()),
            FlagValue::Light { level, color } => {
                buf.extend_from_slice(&level.to_le_bytes());
                buf.extend_from_slice(&color.to_le_bytes());
            }
            FlagValue::Offset { x, y } => {
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
            }
            FlagValue::Market(market) => market.write_to(buf),
        }
    }
}

/// Flags of one record in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(Vec<(ThingFlag, FlagValue)>);

impl Properties {
    pub fn get(&self, flag: ThingFlag) -> Option<&FlagValue> {
        self.0.iter().find(|(f, _)| *f == flag).map(|(_, v)| v)
    }

    pub fn contains(&self, flag: ThingFlag) -> bool {
        self.get(flag).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThingFlag, &FlagValue)> {
        self.0.iter().map(|(f, v)| (*f, v))
    }

    /// Flags ordered as the file stores them.
    pub fn in_table_order(&self) -> impl Iterator<Item = (ThingFlag, &FlagValue)> {
        ThingFlag::ALL
            .into_iter()
            .filter_map(|flag| self.get(flag).map(|v| (flag, v)))
    }

    fn insert(&mut self, flag: ThingFlag, value: FlagValue) -> Option<FlagValue> {
        match self.0.iter_mut().find(|(f, _)| *f == flag) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.0.push((flag, value));
                None
            }
        }
    }

    fn remove(&mut self, flag: ThingFlag) -> Option<FlagValue> {
        let index = self.0.iter().position(|(f, _)| *f == flag)?;
        Some(self.0.remove(index).1)
    }
}

/// One catalog entry: its flags plus the untouched texture block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingRecord {
    pub props: Properties,
    pub texture: TextureBlock,
}

impl ThingRecord {
    pub fn empty() -> Self {
        Self {
            props: Properties::default(),
            texture: TextureBlock::empty(),
        }
    }

    pub fn has(&self, flag: ThingFlag) -> bool {
        self.props.contains(flag)
    }

    /// Marks `flag` present, zero-filling its payload. Returns whether the
    /// record changed.
    pub fn set_flag(&mut self, flag: ThingFlag) -> bool {
        if self.props.contains(flag) {
            return false;
        }
        self.props.insert(flag, FlagValue::zeroed(flag.shape()));
        true
    }

    pub fn unset_flag(&mut self, flag: ThingFlag) -> bool {
        self.props.remove(flag).is_some()
    }

    /// Sets `flag` present with an explicit payload.
    pub fn set_value(&mut self, flag: ThingFlag, value: FlagValue) -> Result<bool> {
        if value.shape() != flag.shape() {
            return Err(FormatError::PayloadMismatch {
                flag,
                expected: flag.shape(),
            });
        }
        if self.props.get(flag) == Some(&value) {
            return Ok(false);
        }
        self.props.insert(flag, value);
        Ok(true)
    }

    fn read(cursor: &mut Cursor<&[u8]>, thing_id: u16) -> Result<Self> {
        let props = read_properties(cursor, thing_id)?;
        let data: &[u8] = cursor.get_ref();
        let start = cursor.position() as usize;
        let texture = TextureBlock::read_from(&data[start..])
            .map_err(|source| FormatError::UnresolvableTextureBlock { thing_id, source })?;
        cursor.set_position((start + texture.len()) as u64);
        Ok(Self { props, texture })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        for (flag, value) in self.props.in_table_order() {
            buf.push(flag.into());
            value.write_to(buf);
        }
        buf.push(LAST_FLAG);
        buf.extend_from_slice(self.texture.as_bytes());
    }
}

fn read_properties(cursor: &mut Cursor<&[u8]>, thing_id: u16) -> Result<Properties> {
    let mut props = Properties::default();
    loop {
        let offset = cursor.position();
        let byte = cursor.read_u8().at("thing flags", offset)?;
        if byte == LAST_FLAG {
            break;
        }
        let flag = ThingFlag::try_from(byte).map_err(|_| FormatError::UnknownFlag {
            flag: byte,
            thing_id,
            offset,
        })?;
        let value = FlagValue::read(flag.shape(), cursor)?;
        if props.insert(flag, value).is_some() {
            debug!(thing_id, ?flag, "flag repeated, keeping the last payload");
        }
    }
    Ok(props)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub items: u16,
    pub outfits: u16,
    pub effects: u16,
    pub missiles: u16,
}

/// Fields editable as literal numbers, each owning one valued flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    Ground,
    Elevation,
    MinimapColor,
    Offset,
    Light,
    Writable,
    WritableOnce,
    LensHelp,
    Cloth,
    DefaultAction,
}

impl NumericField {
    pub const ALL: [NumericField; 10] = [
        NumericField::Ground,
        NumericField::Elevation,
        NumericField::MinimapColor,
        NumericField::Offset,
        NumericField::Light,
        NumericField::Writable,
        NumericField::WritableOnce,
        NumericField::LensHelp,
        NumericField::Cloth,
        NumericField::DefaultAction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NumericField::Ground => "ground",
            NumericField::Elevation => "elevation",
            NumericField::MinimapColor => "minimap",
            NumericField::Offset => "offset",
            NumericField::Light => "light",
            NumericField::Writable => "writable",
            NumericField::WritableOnce => "writable-once",
            NumericField::LensHelp => "lens-help",
            NumericField::Cloth => "cloth",
            NumericField::DefaultAction => "default-action",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn flag(self) -> ThingFlag {
        match self {
            NumericField::Ground => ThingFlag::Ground,
            NumericField::Elevation => ThingFlag::HasElevation,
            NumericField::MinimapColor => ThingFlag::ShowOnMinimap,
            NumericField::Offset => ThingFlag::HasOffset,
            NumericField::Light => ThingFlag::HasLight,
            NumericField::Writable => ThingFlag::Writable,
            NumericField::WritableOnce => ThingFlag::WritableOnce,
            NumericField::LensHelp => ThingFlag::LensHelp,
            NumericField::Cloth => ThingFlag::IsCloth,
            NumericField::DefaultAction => ThingFlag::DefaultAction,
        }
    }

    /// Number of literals the field's payload holds.
    pub fn arity(self) -> usize {
        match self.flag().shape() {
            PayloadShape::Light | PayloadShape::Offset => 2,
            _ => 1,
        }
    }
}

/// Single-value or paired numeric edits applied to a selection of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericValue {
    Ground(u16),
    Elevation(u16),
    MinimapColor(u16),
    Offset { x: i16, y: i16 },
    Light { level: u16, color: u16 },
    Writable(u16),
    WritableOnce(u16),
    LensHelp(u16),
    Cloth(u16),
    DefaultAction(u16),
}

impl NumericValue {
    pub fn field(&self) -> NumericField {
        match self {
            NumericValue::Ground(_) => NumericField::Ground,
            NumericValue::Elevation(_) => NumericField::Elevation,
            NumericValue::MinimapColor(_) => NumericField::MinimapColor,
            NumericValue::Offset { .. } => NumericField::Offset,
            NumericValue::Light { .. } => NumericField::Light,
            NumericValue::Writable(_) => NumericField::Writable,
            NumericValue::WritableOnce(_) => NumericField::WritableOnce,
            NumericValue::LensHelp(_) => NumericField::LensHelp,
            NumericValue::Cloth(_) => NumericField::Cloth,
            NumericValue::DefaultAction(_) => NumericField::DefaultAction,
        }
    }

    pub fn flag(&self) -> ThingFlag {
        self.field().flag()
    }

    pub fn to_flag_value(&self) -> FlagValue {
        match *self {
            NumericValue::Offset { x, y } => FlagValue::Offset { x, y },
            NumericValue::Light { level, color } => FlagValue::Light { level, color },
            NumericValue::Ground(v)
            | NumericValue::Elevation(v)
            | NumericValue::MinimapColor(v)
            | NumericValue::Writable(v)
            | NumericValue::WritableOnce(v)
            | NumericValue::LensHelp(v)
            | NumericValue::Cloth(v)
            | NumericValue::DefaultAction(v) => FlagValue::Value(v),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            NumericValue::MinimapColor(v) if v > MAX_MINIMAP_COLOR => {
                Err(FormatError::InvalidNumeric {
                    field: self.flag().name(),
                    value: v as i64,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Read-only copy of one record, as handed to editing surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub id: u16,
    pub props: Properties,
    pub sprite_ids: Vec<u32>,
}

/// The object catalog: item records are modelled, every other category is
/// carried verbatim in `tail`.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub signature: u32,
    counts: CategoryCounts,
    items: BTreeMap<u16, ThingRecord>,
    tail: Vec<u8>,
}

impl Catalog {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let signature = cursor.read_u32::<LE>().at("catalog header", 0)?;
        let counts = CategoryCounts {
            items: cursor.read_u16::<LE>().at("catalog header", 4)?,
            outfits: cursor.read_u16::<LE>().at("catalog header", 6)?,
            effects: cursor.read_u16::<LE>().at("catalog header", 8)?,
            missiles: cursor.read_u16::<LE>().at("catalog header", 10)?,
        };

        let mut items = BTreeMap::new();
        for id in item_range(counts.items) {
            items.insert(id, ThingRecord::read(&mut cursor, id)?);
        }

        let tail = bytes[cursor.position() as usize..].to_vec();

        info!(
            signature,
            items = items.len(),
            outfits = counts.outfits,
            effects = counts.effects,
            missiles = counts.missiles,
            tail_bytes = tail.len(),
            "catalog loaded"
        );

        Ok(Self {
            signature,
            counts,
            items,
            tail,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.items.len() * 32 + self.tail.len());
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.extend_from_slice(&self.counts.items.to_le_bytes());
        buf.extend_from_slice(&self.counts.outfits.to_le_bytes());
        buf.extend_from_slice(&self.counts.effects.to_le_bytes());
        buf.extend_from_slice(&self.counts.missiles.to_le_bytes());
        for record in self.items.values() {
            record.write_to(&mut buf);
        }
        buf.extend_from_slice(&self.tail);
        buf
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes();
        std::fs::write(path.as_ref(), &bytes)?;
        info!(path = ?path.as_ref(), bytes = bytes.len(), "catalog saved");
        Ok(())
    }

    pub fn counts(&self) -> CategoryCounts {
        self.counts
    }

    pub fn item_ids(&self) -> RangeInclusive<u16> {
        item_range(self.counts.items)
    }

    pub fn item(&self, id: u16) -> Option<&ThingRecord> {
        self.items.get(&id)
    }

    pub fn item_mut(&mut self, id: u16) -> Option<&mut ThingRecord> {
        self.items.get_mut(&id)
    }

    pub fn items(&self) -> impl Iterator<Item = (u16, &ThingRecord)> {
        self.items.iter().map(|(id, r)| (*id, r))
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = (u16, &mut ThingRecord)> {
        self.items.iter_mut().map(|(id, r)| (*id, r))
    }

    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// Mutable view of the opaque tail. Its length is fixed.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.tail
    }

    /// Number of records in the outfit, effect and missile categories.
    pub fn tail_thing_count(&self) -> usize {
        self.counts.outfits as usize + self.counts.effects as usize + self.counts.missiles as usize
    }

    /// Locates the texture block of every outfit, effect and missile inside
    /// the tail, reading them with the item record layout. Fails unless the
    /// walk ends exactly at the end of the tail.
    pub fn tail_texture_blocks(&self) -> Result<Vec<Range<usize>>> {
        let mut cursor = Cursor::new(self.tail.as_slice());
        let mut blocks = Vec::with_capacity(self.tail_thing_count());

        for count in [self.counts.outfits, self.counts.effects, self.counts.missiles] {
            for thing_id in 1..=count {
                read_properties(&mut cursor, thing_id)?;
                let start = cursor.position() as usize;
                let len = texture::block_len(&self.tail[start..], IdWidth::U32)
                    .map_err(|source| FormatError::UnresolvableTextureBlock { thing_id, source })?;
                blocks.push(start..start + len);
                cursor.set_position((start + len) as u64);
            }
        }

        let consumed = cursor.position() as usize;
        if consumed != self.tail.len() {
            return Err(FormatError::TrailingBytes {
                count: self.tail.len() - consumed,
            });
        }
        Ok(blocks)
    }

    pub fn query(&self, ids: &[u16]) -> Vec<RecordSnapshot> {
        ids.iter()
            .filter_map(|&id| {
                self.items.get(&id).map(|record| RecordSnapshot {
                    id,
                    props: record.props.clone(),
                    sprite_ids: record.texture.sprite_ids().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Sets and clears boolean flags across `ids`. Ids without a record are
    /// ignored. Returns the number of records that changed.
    pub fn apply_changes(&mut self, ids: &[u16], to_set: &[ThingFlag], to_unset: &[ThingFlag]) -> usize {
        let mut changed_records = 0;
        for id in ids {
            let Some(record) = self.items.get_mut(id) else {
                continue;
            };
            let mut changed = false;
            for &flag in to_set {
                changed |= record.set_flag(flag);
            }
            for &flag in to_unset {
                changed |= record.unset_flag(flag);
            }
            if changed {
                changed_records += 1;
            }
        }
        debug!(changed_records, ?to_set, ?to_unset, "applied flag changes");
        changed_records
    }

    /// Writes the same literal payload to every selected record, marking the
    /// owning flag present.
    pub fn apply_numeric(&mut self, ids: &[u16], value: NumericValue) -> Result<usize> {
        value.validate()?;
        let flag = value.flag();
        let mut changed_records = 0;
        for id in ids {
            if let Some(record) = self.items.get_mut(id) {
                if record.set_value(flag, value.to_flag_value())? {
                    changed_records += 1;
                }
            }
        }
        debug!(changed_records, ?value, "applied numeric change");
        Ok(changed_records)
    }

    /// Appends empty records. Ids that already exist are left alone; an id
    /// past the current end also creates the records between, keeping the
    /// id range dense.
    pub fn insert_ids(&mut self, ids: &[u16]) -> Result<usize> {
        if let Some(&id) = ids.iter().find(|&&id| id < FIRST_ITEM_ID) {
            return Err(FormatError::InvalidId {
                id: id as u32,
                min: FIRST_ITEM_ID as u32,
                max: u16::MAX as u32,
            });
        }

        let Some(&target) = ids.iter().max() else {
            return Ok(0);
        };
        let current_max = self.counts.items.max(FIRST_ITEM_ID - 1);
        if target <= current_max {
            return Ok(0);
        }

        for id in current_max + 1..=target {
            self.items.insert(id, ThingRecord::empty());
        }
        self.counts.items = target;

        let inserted = (target - current_max) as usize;
        info!(inserted, item_count = target, "inserted item ids");
        Ok(inserted)
    }

    /// Removes the given ids and renumbers every surviving record from
    /// `FIRST_ITEM_ID` upward, preserving order. Returns how many records
    /// were removed.
    pub fn delete_ids(&mut self, ids: &[u16]) -> usize {
        let doomed: BTreeSet<u16> = ids
            .iter()
            .copied()
            .filter(|id| self.items.contains_key(id))
            .collect();
        if doomed.is_empty() {
            debug!(requested = ids.len(), "no listed id exists, catalog left unchanged");
            return 0;
        }
        let before = self.items.len();

        let survivors = std::mem::take(&mut self.items)
            .into_iter()
            .filter(|(old_id, _)| !doomed.contains(old_id))
            .map(|(_, record)| record);
        self.items = (FIRST_ITEM_ID..=u16::MAX).zip(survivors).collect();
        self.counts.items = FIRST_ITEM_ID - 1 + self.items.len() as u16;

        let deleted = before - self.items.len();
        info!(deleted, item_count = self.counts.items, "deleted and reindexed item ids");
        deleted
    }
}

fn item_range(item_count: u16) -> RangeInclusive<u16> {
    FIRST_ITEM_ID..=item_count
}

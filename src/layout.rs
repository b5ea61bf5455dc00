//! Fixed table layout of an `Assets.dat` archive.
//!
//! The archive starts with four `(offset, size)` tables (images, sounds,
//! fonts, shaders) packed back-to-back from byte 0.  Nothing in the file
//! describes the tables: their positions and record counts are constants of
//! one game build, so they travel as an explicit [`ArchiveLayout`] value.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-disk size of one `(u32 offset, u32 size)` table record.
pub const RECORD_SIZE: u64 = 8;

/// Byte offset of the sound table in the shipped archive (0x14080).
pub const SHIPPED_SOUND_TABLE_OFFSET: u64 = 0x14080;

// ── AssetKind ────────────────────────────────────────────────────────────────

/// The four asset families, in table (and repack) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Sound,
    Font,
    Shader,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [
        AssetKind::Image,
        AssetKind::Sound,
        AssetKind::Font,
        AssetKind::Shader,
    ];

    /// Singular name, used as the file-name prefix (`image_00042.bin`).
    pub fn name(self) -> &'static str {
        match self {
            AssetKind::Image  => "image",
            AssetKind::Sound  => "sound",
            AssetKind::Font   => "font",
            AssetKind::Shader => "shader",
        }
    }

    /// Directory the kind is extracted into and repacked from.
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetKind::Image  => "images",
            AssetKind::Sound  => "sounds",
            AssetKind::Font   => "fonts",
            AssetKind::Shader => "shaders",
        }
    }

    /// Zero-padded width of the index in extracted file names.
    pub fn index_width(self) -> usize {
        match self {
            AssetKind::Image  => 5,
            AssetKind::Sound  => 3,
            AssetKind::Font   => 2,
            AssetKind::Shader => 2,
        }
    }

    /// Parse from a CLI string; accepts singular and plural forms.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        AssetKind::ALL
            .into_iter()
            .find(|k| s == k.name() || s == k.dir_name())
    }

    /// `image_00042.bin`, `sound_007.ogg`, ...
    pub fn file_name(self, index: u32, extension: &str) -> String {
        format!(
            "{}_{:0width$}.{}",
            self.name(),
            index,
            extension,
            width = self.index_width()
        )
    }

    /// Recover the index from a file name produced by [`AssetKind::file_name`].
    ///
    /// Any digit count is accepted (`image_7.bin` is index 7).  Exactly one
    /// alphanumeric extension must follow, so `sound_001.ogg.bak` and
    /// `font_02.ttf~` are not asset files.  Which extension is not checked.
    pub fn parse_file_name(self, file_name: &str) -> Option<u32> {
        let rest = file_name.strip_prefix(self.name())?.strip_prefix('_')?;
        let (digits, extension) = rest.split_once('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if extension.is_empty() || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── AssetId ──────────────────────────────────────────────────────────────────

/// Stable identity of one asset: its kind plus its index in that kind's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId {
    pub kind:  AssetKind,
    pub index: u32,
}

impl AssetId {
    pub fn new(kind: AssetKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{:0width$}",
            self.kind,
            self.index,
            width = self.kind.index_width()
        )
    }
}

// ── TableSpec / ArchiveLayout ────────────────────────────────────────────────

/// Position and record count of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub kind:   AssetKind,
    pub offset: u64,
    pub count:  u32,
}

impl TableSpec {
    pub fn byte_len(&self) -> u64 {
        self.count as u64 * RECORD_SIZE
    }

    pub fn end(&self) -> u64 {
        self.offset + self.byte_len()
    }
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Layout declares {0} tables, expected one per asset kind (4)")]
    TableCount(usize),
    #[error("Table {position} is {found}, expected {expected} (order is images, sounds, fonts, shaders)")]
    Order { position: usize, expected: AssetKind, found: AssetKind },
    #[error("{kind} table starts at {offset}, expected {expected}: tables are packed back-to-back from byte 0")]
    NotPacked { kind: AssetKind, offset: u64, expected: u64 },
}

/// The four tables of one archive revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLayout {
    pub tables: Vec<TableSpec>,
}

impl ArchiveLayout {
    /// Build a layout and check it.
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, LayoutError> {
        let layout = Self { tables };
        layout.check()?;
        Ok(layout)
    }

    /// Packed layout from per-kind record counts.
    pub fn from_counts(images: u32, sounds: u32, fonts: u32, shaders: u32) -> Self {
        let mut offset = 0u64;
        let tables = AssetKind::ALL
            .into_iter()
            .zip([images, sounds, fonts, shaders])
            .map(|(kind, count)| {
                let spec = TableSpec { kind, offset, count };
                offset = spec.end();
                spec
            })
            .collect();
        Self { tables }
    }

    /// Layout of the shipped game archive.
    ///
    /// The image table holds 10 256 records: the sound table begins at
    /// 0x14080 = 10 256 × 8.
    pub fn shipped() -> Self {
        let layout = Self::from_counts(10_256, 267, 19, 3);
        debug_assert_eq!(layout.tables[1].offset, SHIPPED_SOUND_TABLE_OFFSET);
        layout
    }

    pub fn check(&self) -> Result<(), LayoutError> {
        if self.tables.len() != AssetKind::ALL.len() {
            return Err(LayoutError::TableCount(self.tables.len()));
        }
        let mut expected_offset = 0u64;
        for (position, (spec, expected)) in self.tables.iter().zip(AssetKind::ALL).enumerate() {
            if spec.kind != expected {
                return Err(LayoutError::Order { position, expected, found: spec.kind });
            }
            if spec.offset != expected_offset {
                return Err(LayoutError::NotPacked {
                    kind:     spec.kind,
                    offset:   spec.offset,
                    expected: expected_offset,
                });
            }
            expected_offset = spec.end();
        }
        Ok(())
    }

    pub fn table(&self, kind: AssetKind) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.kind == kind)
    }

    pub fn count(&self, kind: AssetKind) -> u32 {
        self.table(kind).map_or(0, |t| t.count)
    }

    pub fn contains(&self, id: AssetId) -> bool {
        id.index < self.count(id.kind)
    }

    /// Total size of the table region; also the offset of the first payload.
    pub fn metadata_size(&self) -> u64 {
        self.tables.iter().map(TableSpec::byte_len).sum()
    }
}

impl Default for ArchiveLayout {
    fn default() -> Self {
        Self::shipped()
    }
}

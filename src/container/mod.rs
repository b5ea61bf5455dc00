//! Reading sub-assets out of an archive.
//!
//! [`extract`] is the bounded primitive.  [`ContainerReader`] wraps an open
//! archive with its tables and writes assets to disk as
//! `<dest>/<kind dir>/<kind>_<padded index>.<ext>`, the naming the repacker
//! reads back.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::batch::{BatchReport, Categorize};
use crate::layout::{ArchiveLayout, AssetId, AssetKind};
use crate::table::{TableError, TableRecord, TableSet};

/// Bytes read from the start of an asset for format sniffing.
pub const SNIFF_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Archive is {available} bytes, smaller than its {needed}-byte table region")]
    TruncatedInput { needed: u64, available: u64 },
    #[error("{} spans {offset}..{} but the archive is {source_len} bytes",
        asset_label(.asset), range_end(.offset, .size))]
    OutOfRange { asset: Option<AssetId>, offset: u64, size: u64, source_len: u64 },
    #[error("{0} is not in the archive's tables")]
    UnknownAsset(AssetId),
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Categorize for ContainerError {
    fn category(&self) -> &'static str {
        match self {
            ContainerError::TruncatedInput { .. } => "truncated_input",
            ContainerError::OutOfRange { .. }     => "out_of_range",
            ContainerError::UnknownAsset(_)       => "unknown_asset",
            ContainerError::Table(_)              => "table",
            ContainerError::Io(_)                 => "io",
        }
    }
}

fn asset_label(asset: &Option<AssetId>) -> String {
    asset.map_or_else(|| "Asset".to_string(), |a| a.to_string())
}

fn range_end(offset: &u64, size: &u64) -> u64 {
    offset.saturating_add(*size)
}

// ── Format sniffing ──────────────────────────────────────────────────────────

/// Detected payload format.  Advisory: it only picks the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    /// The archive's own compressed bitmap records.
    Bitmap,
    Png,
    Jpeg,
    Bmp,
    Dds,
    Ogg,
    Wav,
    TrueType,
    OpenType,
    Glsl,
    Binary,
}

impl AssetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AssetFormat::Bitmap   => "bin",
            AssetFormat::Png      => "png",
            AssetFormat::Jpeg     => "jpg",
            AssetFormat::Bmp      => "bmp",
            AssetFormat::Dds      => "dds",
            AssetFormat::Ogg      => "ogg",
            AssetFormat::Wav      => "wav",
            AssetFormat::TrueType => "ttf",
            AssetFormat::OpenType => "otf",
            AssetFormat::Glsl     => "glsl",
            AssetFormat::Binary   => "bin",
        }
    }

    /// Human-readable name (for listings only).
    pub fn describe(self) -> &'static str {
        match self {
            AssetFormat::Bitmap   => "zlib bitmap",
            AssetFormat::Png      => "PNG",
            AssetFormat::Jpeg     => "JPEG",
            AssetFormat::Bmp      => "BMP",
            AssetFormat::Dds      => "DDS",
            AssetFormat::Ogg      => "Ogg Vorbis",
            AssetFormat::Wav      => "RIFF WAVE",
            AssetFormat::TrueType => "TrueType",
            AssetFormat::OpenType => "OpenType",
            AssetFormat::Glsl     => "GLSL source",
            AssetFormat::Binary   => "binary",
        }
    }

    /// Identify `bytes` by magic number, falling back on what `kind` stores.
    pub fn sniff(kind: AssetKind, bytes: &[u8]) -> Self {
        if kind == AssetKind::Shader {
            return AssetFormat::Glsl;
        }
        match bytes {
            [b'O', b'g', b'g', b'S', ..] => AssetFormat::Ogg,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => AssetFormat::Wav,
            [0x00, 0x01, 0x00, 0x00, ..] | [b't', b'r', b'u', b'e', ..] => AssetFormat::TrueType,
            [b'O', b'T', b'T', b'O', ..] => AssetFormat::OpenType,
            [0x89, b'P', b'N', b'G', ..] => AssetFormat::Png,
            [0xFF, 0xD8, ..] => AssetFormat::Jpeg,
            [b'D', b'D', b'S', b' ', ..] => AssetFormat::Dds,
            [b'B', b'M', ..] => AssetFormat::Bmp,
            _ if kind == AssetKind::Image => AssetFormat::Bitmap,
            _ => AssetFormat::Binary,
        }
    }
}

// ── Bounded extraction ───────────────────────────────────────────────────────

/// Read exactly `size` bytes at `offset`, refusing ranges past the end.
pub fn extract<R: Read + Seek>(source: &mut R, offset: u64, size: u64) -> Result<Vec<u8>, ContainerError> {
    let source_len = source.seek(SeekFrom::End(0))?;
    match offset.checked_add(size) {
        Some(end) if end <= source_len => {}
        _ => return Err(ContainerError::OutOfRange { asset: None, offset, size, source_len }),
    }
    source.seek(SeekFrom::Start(offset))?;
    let mut data = vec![0u8; size as usize];
    source.read_exact(&mut data)?;
    Ok(data)
}

// ── ContainerReader ──────────────────────────────────────────────────────────

/// Result of writing one asset to disk.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedAsset {
    pub id:     AssetId,
    pub format: AssetFormat,
    pub size:   u64,
    pub path:   PathBuf,
}

pub struct ContainerReader<R: Read + Seek> {
    reader:     R,
    layout:     ArchiveLayout,
    pub tables: TableSet,
    len:        u64,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Read the tables.  Fails if the archive cannot even hold them.
    pub fn open(mut reader: R, layout: ArchiveLayout) -> Result<Self, ContainerError> {
        let len = reader.seek(SeekFrom::End(0))?;
        let needed = layout.metadata_size();
        if len < needed {
            return Err(ContainerError::TruncatedInput { needed, available: len });
        }
        let tables = TableSet::read(&mut reader, &layout)?;
        Ok(Self { reader, layout, tables, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    pub fn record(&self, id: AssetId) -> Result<TableRecord, ContainerError> {
        self.tables.record(id).ok_or(ContainerError::UnknownAsset(id))
    }

    fn check_range(&self, id: AssetId, record: TableRecord) -> Result<(), ContainerError> {
        if record.end() > self.len {
            return Err(ContainerError::OutOfRange {
                asset:      Some(id),
                offset:     record.offset as u64,
                size:       record.size as u64,
                source_len: self.len,
            });
        }
        Ok(())
    }

    pub fn read_asset(&mut self, id: AssetId) -> Result<Vec<u8>, ContainerError> {
        let record = self.record(id)?;
        self.check_range(id, record)?;
        extract(&mut self.reader, record.offset as u64, record.size as u64)
    }

    pub fn sniff(&mut self, id: AssetId) -> Result<AssetFormat, ContainerError> {
        let record = self.record(id)?;
        self.check_range(id, record)?;
        let len = (record.size as u64).min(SNIFF_LEN as u64);
        let head = extract(&mut self.reader, record.offset as u64, len)?;
        Ok(AssetFormat::sniff(id.kind, &head))
    }

    /// Records whose range runs past the end of the archive.
    pub fn out_of_range(&self) -> Vec<(AssetId, TableRecord)> {
        self.tables
            .entries()
            .filter(|(_, r)| r.end() > self.len)
            .collect()
    }

    /// Write one asset under `dest`, creating the kind directory.
    pub fn extract_to(&mut self, id: AssetId, dest: &Path) -> Result<ExtractedAsset, ContainerError> {
        let data   = self.read_asset(id)?;
        let format = AssetFormat::sniff(id.kind, &data);
        let dir    = dest.join(id.kind.dir_name());
        fs::create_dir_all(&dir)?;
        let path = dir.join(id.kind.file_name(id.index, format.extension()));
        fs::write(&path, &data)?;
        log::debug!("{id}: {} bytes, {} -> {}", data.len(), format.describe(), path.display());
        Ok(ExtractedAsset { id, format, size: data.len() as u64, path })
    }

    /// Extract every asset of `kind`.  Failures are reported per asset.
    pub fn extract_kind(&mut self, kind: AssetKind, dest: &Path) -> BatchReport<ExtractedAsset, ContainerError> {
        let count = self.layout.count(kind);
        let mut report = BatchReport::new();
        for index in 0..count {
            let id = AssetId::new(kind, index);
            report.push(id.to_string(), self.extract_to(id, dest));
            if (index + 1) % 1000 == 0 {
                log::info!("extracted {}/{} {}", index + 1, count, kind.dir_name());
            }
        }
        report
    }

    /// Extract all four kinds.
    pub fn extract_all(&mut self, dest: &Path) -> BatchReport<ExtractedAsset, ContainerError> {
        let mut report = BatchReport::new();
        for kind in AssetKind::ALL {
            report.entries.extend(self.extract_kind(kind, dest).entries);
        }
        report
    }
}

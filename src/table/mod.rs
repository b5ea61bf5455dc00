//! Asset tables: fixed arrays of little-endian `(u32 offset, u32 size)` records.
//!
//! Record order is asset identity.  Nothing here sorts, dedups or compacts a
//! table; a table read and written back is byte-identical.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use thiserror::Error;

use crate::layout::{ArchiveLayout, AssetId, AssetKind, TableSpec, RECORD_SIZE};

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Truncated table at offset {offset}: need {needed} bytes, only {available} available")]
    Truncated { offset: u64, needed: u64, available: u64 },
    #[error("Table region {offset}..{end} is not reserved in a sink of {sink_len} bytes")]
    RegionNotReserved { offset: u64, end: u64, sink_len: u64 },
    #[error("{kind} table holds {found} records, layout declares {expected}")]
    CountMismatch { kind: AssetKind, expected: u32, found: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── TableRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TableRecord {
    pub offset: u32,
    pub size:   u32,
}

impl TableRecord {
    pub fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// One past the last payload byte.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            offset: reader.read_u32::<LittleEndian>()?,
            size:   reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── Raw table I/O ────────────────────────────────────────────────────────────

/// Read `count` records starting at `table_offset`.
pub fn read_records<R: Read + Seek>(
    source:       &mut R,
    table_offset: u64,
    count:        u32,
) -> Result<Vec<TableRecord>, TableError> {
    let needed    = count as u64 * RECORD_SIZE;
    let source_len = source.seek(SeekFrom::End(0))?;
    let available = source_len.saturating_sub(table_offset);
    if available < needed {
        return Err(TableError::Truncated { offset: table_offset, needed, available });
    }

    source.seek(SeekFrom::Start(table_offset))?;
    let mut raw = vec![0u8; needed as usize];
    source.read_exact(&mut raw)?;
    raw.chunks_exact(RECORD_SIZE as usize)
        .map(|chunk| TableRecord::read(chunk).map_err(TableError::from))
        .collect()
}

/// Write `records` at `table_offset`.
///
/// The sink must already span the whole region: writing a table never grows
/// the output.
pub fn write_records<W: Write + Seek>(
    sink:         &mut W,
    table_offset: u64,
    records:      &[TableRecord],
) -> Result<(), TableError> {
    let end      = table_offset + records.len() as u64 * RECORD_SIZE;
    let sink_len = sink.seek(SeekFrom::End(0))?;
    if sink_len < end {
        return Err(TableError::RegionNotReserved { offset: table_offset, end, sink_len });
    }

    let mut raw = Vec::with_capacity((end - table_offset) as usize);
    for record in records {
        record.write(&mut raw)?;
    }
    sink.seek(SeekFrom::Start(table_offset))?;
    sink.write_all(&raw)?;
    Ok(())
}

// ── AssetTable ───────────────────────────────────────────────────────────────

/// One table together with the layout entry it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTable {
    pub spec:    TableSpec,
    pub records: Vec<TableRecord>,
}

impl AssetTable {
    pub fn read<R: Read + Seek>(source: &mut R, spec: TableSpec) -> Result<Self, TableError> {
        let records = read_records(source, spec.offset, spec.count)?;
        Ok(Self { spec, records })
    }

    pub fn write<W: Write + Seek>(&self, sink: &mut W) -> Result<(), TableError> {
        if self.records.len() != self.spec.count as usize {
            return Err(TableError::CountMismatch {
                kind:     self.spec.kind,
                expected: self.spec.count,
                found:    self.records.len(),
            });
        }
        write_records(sink, self.spec.offset, &self.records)
    }

    pub fn kind(&self) -> AssetKind {
        self.spec.kind
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<TableRecord> {
        self.records.get(index as usize).copied()
    }

    /// `(AssetId, record)` pairs in index order.
    pub fn entries(&self) -> impl Iterator<Item = (AssetId, TableRecord)> + '_ {
        let kind = self.spec.kind;
        self.records
            .iter()
            .enumerate()
            .map(move |(i, r)| (AssetId::new(kind, i as u32), *r))
    }

    pub fn stats(&self) -> TableStats {
        TableStats::from_records(&self.records)
    }
}

// ── TableSet ─────────────────────────────────────────────────────────────────

/// All four tables of an archive, in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSet {
    tables: Vec<AssetTable>,
}

impl TableSet {
    pub fn read<R: Read + Seek>(source: &mut R, layout: &ArchiveLayout) -> Result<Self, TableError> {
        let tables = layout
            .tables
            .iter()
            .map(|spec| AssetTable::read(source, *spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    pub fn from_tables(tables: Vec<AssetTable>) -> Self {
        Self { tables }
    }

    pub fn write<W: Write + Seek>(&self, sink: &mut W) -> Result<(), TableError> {
        for table in &self.tables {
            table.write(sink)?;
        }
        Ok(())
    }

    pub fn table(&self, kind: AssetKind) -> Option<&AssetTable> {
        self.tables.iter().find(|t| t.kind() == kind)
    }

    pub fn table_mut(&mut self, kind: AssetKind) -> Option<&mut AssetTable> {
        self.tables.iter_mut().find(|t| t.kind() == kind)
    }

    pub fn record(&self, id: AssetId) -> Option<TableRecord> {
        self.table(id.kind)?.get(id.index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetTable> {
        self.tables.iter()
    }

    /// Every record of every table, in repack order.
    pub fn entries(&self) -> impl Iterator<Item = (AssetId, TableRecord)> + '_ {
        self.tables.iter().flat_map(AssetTable::entries)
    }
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// Size distribution of one table, for `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TableStats {
    pub count:    usize,
    pub smallest: u32,
    pub largest:  u32,
    pub total:    u64,
}

impl TableStats {
    pub fn from_records(records: &[TableRecord]) -> Self {
        Self {
            count:    records.len(),
            smallest: records.iter().map(|r| r.size).min().unwrap_or(0),
            largest:  records.iter().map(|r| r.size).max().unwrap_or(0),
            total:    records.iter().map(|r| r.size as u64).sum(),
        }
    }

    /// Integer mean size (0 for an empty table).
    pub fn mean(&self) -> u64 {
        if self.count == 0 { 0 } else { self.total / self.count as u64 }
    }
}

//! Rebuilding an archive with substituted assets.
//!
//! # Output layout
//! The table region (`metadata_size` bytes) is reserved at offset 0.  Payloads
//! follow back-to-back from `metadata_size`, table by table in layout order
//! and record by record in index order.  Each record is either a substitute
//! (new size) or the original bytes copied verbatim (same size).  The four
//! tables are then written over the reserved region.  Record counts never
//! change.
//!
//! # Phases
//! 1. **prepare**: load every substitute and validate image substitutes
//!    (through [`run_batch`], parallel with the `parallel` feature);
//! 2. **plan**: assign every offset and check every original range and the
//!    32-bit offset limit;
//! 3. **write**: one sequential pass over the sink.
//!
//! Any error in phases 1 and 2 is returned before the sink is touched.  An
//! I/O error during phase 3 leaves the sink partially written; the CLI writes
//! to a `.partial` file and renames it only on success.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::batch::{run_batch, Categorize};
use crate::bitmap::BitmapConfig;
use crate::config::Config;
use crate::container::{ContainerError, ContainerReader};
use crate::layout::{ArchiveLayout, AssetId, AssetKind};
use crate::table::{AssetTable, TableError, TableRecord, TableSet};
use crate::validate::{validate, ValidationOutcome};

/// Zero bytes written per call while reserving the table region.
const ZERO_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum RepackError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("{0}")]
    Container(#[from] ContainerError),
    #[error("{id} spans {offset}..{} but the original archive is {source_len} bytes", range_end(.offset, .size))]
    OutOfRange { id: AssetId, offset: u64, size: u64, source_len: u64 },
    #[error("Substitute for {id} is outside its table ({count} records)")]
    SubstituteOutOfRange { id: AssetId, count: u32 },
    #[error("Two substitutes for {id}: {} and {}", .first.display(), .second.display())]
    DuplicateSubstitute { id: AssetId, first: PathBuf, second: PathBuf },
    #[error("Substitute for {id} failed validation: {outcome}")]
    InvalidSubstitute { id: AssetId, outcome: ValidationOutcome },
    #[error("Cannot read substitute for {id} from {}: {source}", .path.display())]
    ReadSubstitute { id: AssetId, path: PathBuf, source: io::Error },
    #[error("Substitute for {id} is {len} bytes; table sizes are 32-bit")]
    SubstituteTooLarge { id: AssetId, len: u64 },
    #[error("Payload would start at byte {offset}, past the 32-bit offset limit")]
    ArchiveTooLarge { offset: u64 },
    #[error("Payloads are not contiguous at {id}: expected offset {expected}, found {found}")]
    NotContiguous { id: AssetId, expected: u64, found: u64 },
    #[error("Repacked archive is {len} bytes but its payloads end at {end}")]
    TrailingBytes { end: u64, len: u64 },
    #[error("Output already holds {len} bytes; repack needs an empty sink")]
    SinkNotEmpty { len: u64 },
    #[error("{id} in the repacked archive does not match its expected bytes")]
    Mismatch { id: AssetId },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Categorize for RepackError {
    fn category(&self) -> &'static str {
        match self {
            RepackError::Table(_)                     => "table",
            RepackError::Container(e)                 => e.category(),
            RepackError::OutOfRange { .. }            => "out_of_range",
            RepackError::SubstituteOutOfRange { .. }  => "substitute_out_of_range",
            RepackError::DuplicateSubstitute { .. }   => "duplicate_substitute",
            RepackError::InvalidSubstitute { .. }     => "invalid_substitute",
            RepackError::ReadSubstitute { .. }        => "io",
            RepackError::SubstituteTooLarge { .. }    => "substitute_too_large",
            RepackError::ArchiveTooLarge { .. }       => "archive_too_large",
            RepackError::NotContiguous { .. }         => "not_contiguous",
            RepackError::TrailingBytes { .. }         => "not_contiguous",
            RepackError::SinkNotEmpty { .. }          => "sink_not_empty",
            RepackError::Mismatch { .. }              => "mismatch",
            RepackError::Io(_)                        => "io",
        }
    }
}

fn range_end(offset: &u64, size: &u64) -> u64 {
    offset.saturating_add(*size)
}

// ── Substitutes ──────────────────────────────────────────────────────────────

/// Replacement payload for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitute {
    Bytes(Vec<u8>),
    /// Read during the prepare phase.
    File(PathBuf),
}

impl Substitute {
    fn load(&self, id: AssetId) -> Result<Vec<u8>, RepackError> {
        match self {
            Substitute::Bytes(bytes) => Ok(bytes.clone()),
            Substitute::File(path) => fs::read(path).map_err(|source| RepackError::ReadSubstitute {
                id,
                path: path.clone(),
                source,
            }),
        }
    }
}

/// Substitutes keyed by asset, iterated in repack order.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionSet {
    entries: BTreeMap<AssetId, Substitute>,
}

impl SubstitutionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the substitute previously registered for `id`, if any.
    pub fn insert(&mut self, id: AssetId, substitute: Substitute) -> Option<Substitute> {
        self.entries.insert(id, substitute)
    }

    pub fn insert_bytes(&mut self, id: AssetId, bytes: Vec<u8>) -> Option<Substitute> {
        self.insert(id, Substitute::Bytes(bytes))
    }

    pub fn get(&self, id: AssetId) -> Option<&Substitute> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetId, &Substitute)> {
        self.entries.iter().map(|(id, s)| (*id, s))
    }

    /// Collect substitutes from an extraction-style tree.
    ///
    /// Looks in `<dir>/images`, `<dir>/sounds`, `<dir>/fonts` and
    /// `<dir>/shaders` for `<kind>_<index>.<ext>`.  Missing kind directories
    /// are fine.  Image substitutes must be encoded `.bin` records; other
    /// image files are skipped with a warning.
    pub fn from_dir(dir: &Path, layout: &ArchiveLayout) -> Result<Self, RepackError> {
        let mut set = Self::new();
        let mut origins: BTreeMap<AssetId, PathBuf> = BTreeMap::new();

        for kind in AssetKind::ALL {
            let kind_dir = dir.join(kind.dir_name());
            if !kind_dir.is_dir() {
                continue;
            }
            let mut paths = fs::read_dir(&kind_dir)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<io::Result<Vec<_>>>()?;
            paths.sort();

            for path in paths {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(index) = kind.parse_file_name(name).filter(|_| path.is_file()) else {
                    log::debug!("skipping {}: not a {} file", path.display(), kind);
                    continue;
                };
                if kind == AssetKind::Image && !has_extension(&path, "bin") {
                    log::warn!("skipping {}: image substitutes must be encoded .bin records", path.display());
                    continue;
                }

                let id = AssetId::new(kind, index);
                let count = layout.count(kind);
                if index >= count {
                    return Err(RepackError::SubstituteOutOfRange { id, count });
                }
                if let Some(first) = origins.get(&id) {
                    return Err(RepackError::DuplicateSubstitute { id, first: first.clone(), second: path });
                }
                origins.insert(id, path.clone());
                set.insert(id, Substitute::File(path));
            }
        }
        Ok(set)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub substituted: usize,
    pub copied:      usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepackSummary {
    pub metadata_size: u64,
    pub final_size:    u64,
    pub kinds:         BTreeMap<AssetKind, KindCounts>,
    #[serde(skip)]
    pub tables:        TableSet,
}

impl RepackSummary {
    pub fn substituted(&self) -> usize {
        self.kinds.values().map(|c| c.substituted).sum()
    }

    pub fn copied(&self) -> usize {
        self.kinds.values().map(|c| c.copied).sum()
    }
}

// ── Offset assignment ────────────────────────────────────────────────────────

/// Lay out payloads of `sizes` back-to-back from `start`.
///
/// Returns the new records and the cursor after the last payload.  Fails if
/// any payload would start past `u32::MAX`.
pub fn assign_offsets(start: u64, sizes: &[u32]) -> Result<(Vec<TableRecord>, u64), RepackError> {
    let mut cursor  = start;
    let mut records = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let offset = u32::try_from(cursor).map_err(|_| RepackError::ArchiveTooLarge { offset: cursor })?;
        records.push(TableRecord::new(offset, size));
        cursor += size as u64;
    }
    Ok((records, cursor))
}

/// Check that payloads tile `metadata_size..end` exactly, and return `end`.
///
/// Records are visited sorted by `(offset, size)`; empty records are
/// allowed anywhere inside the tiled range.
pub fn check_contiguity(tables: &TableSet, metadata_size: u64) -> Result<u64, RepackError> {
    let mut entries: Vec<(AssetId, TableRecord)> = tables.entries().collect();
    entries.sort_by_key(|(id, r)| (r.offset, r.size, *id));

    let mut cursor = metadata_size;
    for (id, record) in entries {
        if record.size == 0 && (metadata_size..=cursor).contains(&(record.offset as u64)) {
            continue;
        }
        if record.offset as u64 != cursor {
            return Err(RepackError::NotContiguous { id, expected: cursor, found: record.offset as u64 });
        }
        cursor = record.end();
    }
    Ok(cursor)
}

// ── Repacker ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepackOptions {
    /// Run image substitutes through the validator before planning.
    pub validate_images: bool,
}

impl Default for RepackOptions {
    fn default() -> Self {
        Self { validate_images: true }
    }
}

/// Where one output payload comes from.
#[derive(Debug, Clone, Copy)]
enum Source {
    Original,
    Substitute(usize),
}

struct Plan {
    tables:  TableSet,
    sources: Vec<(AssetId, Source)>,
    kinds:   BTreeMap<AssetKind, KindCounts>,
    end:     u64,
}

pub struct Repacker {
    layout:  ArchiveLayout,
    bitmap:  BitmapConfig,
    options: RepackOptions,
}

impl Repacker {
    pub fn new(layout: ArchiveLayout, bitmap: BitmapConfig) -> Self {
        Self { layout, bitmap, options: RepackOptions::default() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.layout.clone(), config.bitmap.clone())
    }

    pub fn with_options(mut self, options: RepackOptions) -> Self {
        self.options = options;
        self
    }

    /// Rebuild `original` into `out`, replacing the assets in `substitutes`.
    ///
    /// `out` must be empty: the archive is written from byte 0 and nothing
    /// truncates what lies past its end.
    pub fn repack<R, W>(
        &self,
        original:    R,
        substitutes: &SubstitutionSet,
        out:         &mut W,
    ) -> Result<RepackSummary, RepackError>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        let existing = out.seek(SeekFrom::End(0))?;
        if existing != 0 {
            return Err(RepackError::SinkNotEmpty { len: existing });
        }
        let mut archive = ContainerReader::open(original, self.layout.clone())?;

        let loaded = self.prepare(substitutes)?;
        log::info!("prepared {} substitutes", loaded.len());

        let plan = self.plan(&archive, &loaded)?;
        log::info!(
            "planned {} payloads, {} -> {} bytes",
            plan.sources.len(),
            archive.len(),
            plan.end
        );

        self.write(&mut archive, &loaded, &plan, out)?;

        Ok(RepackSummary {
            metadata_size: self.layout.metadata_size(),
            final_size:    plan.end,
            kinds:         plan.kinds,
            tables:        plan.tables,
        })
    }

    /// Load and check every substitute.  The first failure in repack order
    /// is returned.
    fn prepare(&self, substitutes: &SubstitutionSet) -> Result<Vec<(AssetId, Vec<u8>)>, RepackError> {
        let items = substitutes
            .iter()
            .map(|(id, sub)| (id.to_string(), (id, sub)))
            .collect();

        let report = run_batch(items, |(id, sub): (AssetId, &Substitute)| {
            let count = self.layout.count(id.kind);
            if id.index >= count {
                return Err(RepackError::SubstituteOutOfRange { id, count });
            }
            let bytes = sub.load(id)?;
            if u32::try_from(bytes.len()).is_err() {
                return Err(RepackError::SubstituteTooLarge { id, len: bytes.len() as u64 });
            }
            if self.options.validate_images && id.kind == AssetKind::Image {
                let outcome = validate(&bytes, &self.bitmap).outcome;
                if !outcome.is_valid() {
                    return Err(RepackError::InvalidSubstitute { id, outcome });
                }
            }
            log::debug!("{id}: substitute of {} bytes", bytes.len());
            Ok((id, bytes))
        });

        report.entries.into_iter().map(|e| e.result).collect()
    }

    fn plan<R: Read + Seek>(
        &self,
        archive: &ContainerReader<R>,
        loaded:  &[(AssetId, Vec<u8>)],
    ) -> Result<Plan, RepackError> {
        let by_id: BTreeMap<AssetId, usize> = loaded
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i))
            .collect();

        let mut cursor  = self.layout.metadata_size();
        let mut tables  = Vec::with_capacity(self.layout.tables.len());
        let mut sources = Vec::new();
        let mut kinds: BTreeMap<AssetKind, KindCounts> = BTreeMap::new();

        for table in archive.tables.iter() {
            let counts = kinds.entry(table.kind()).or_default();
            let mut sizes = Vec::with_capacity(table.len());

            for (id, record) in table.entries() {
                let source = match by_id.get(&id) {
                    Some(&i) => {
                        counts.substituted += 1;
                        sizes.push(loaded[i].1.len() as u32);
                        Source::Substitute(i)
                    }
                    None => {
                        if record.end() > archive.len() {
                            return Err(RepackError::OutOfRange {
                                id,
                                offset:     record.offset as u64,
                                size:       record.size as u64,
                                source_len: archive.len(),
                            });
                        }
                        counts.copied += 1;
                        sizes.push(record.size);
                        Source::Original
                    }
                };
                sources.push((id, source));
            }

            let (records, end) = assign_offsets(cursor, &sizes)?;
            cursor = end;
            tables.push(AssetTable { spec: table.spec, records });
        }

        Ok(Plan { tables: TableSet::from_tables(tables), sources, kinds, end: cursor })
    }

    fn write<R, W>(
        &self,
        archive: &mut ContainerReader<R>,
        loaded:  &[(AssetId, Vec<u8>)],
        plan:    &Plan,
        out:     &mut W,
    ) -> Result<(), RepackError>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        out.seek(SeekFrom::Start(0))?;
        let mut remaining = self.layout.metadata_size();
        let zeros = [0u8; ZERO_CHUNK];
        while remaining > 0 {
            let n = remaining.min(ZERO_CHUNK as u64) as usize;
            out.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }

        let total = plan.sources.len();
        for (written, (id, source)) in plan.sources.iter().enumerate() {
            match *source {
                Source::Substitute(i) => out.write_all(&loaded[i].1)?,
                Source::Original    => out.write_all(&archive.read_asset(*id)?)?,
            }
            if (written + 1) % 1000 == 0 {
                log::info!("wrote {}/{} payloads", written + 1, total);
            }
        }

        let position = out.stream_position()?;
        if position != plan.end {
            return Err(RepackError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("wrote {position} bytes, planned {}", plan.end),
            )));
        }

        plan.tables.write(out)?;
        out.flush()?;
        Ok(())
    }

    /// Re-read a repacked archive and check it against its inputs: payloads
    /// contiguous from the table region, every copied asset byte-identical to
    /// the original and every substituted asset equal to its substitute.
    ///
    /// Returns the payload end offset.
    pub fn verify<R1, R2>(
        &self,
        original:    R1,
        repacked:    R2,
        substitutes: &SubstitutionSet,
    ) -> Result<u64, RepackError>
    where
        R1: Read + Seek,
        R2: Read + Seek,
    {
        let mut original = ContainerReader::open(original, self.layout.clone())?;
        let mut repacked = ContainerReader::open(repacked, self.layout.clone())?;

        let end = check_contiguity(&repacked.tables, self.layout.metadata_size())?;
        if end != repacked.len() {
            return Err(RepackError::TrailingBytes { end, len: repacked.len() });
        }

        let ids: Vec<AssetId> = repacked.tables.entries().map(|(id, _)| id).collect();
        for id in ids {
            let expected = match substitutes.get(id) {
                Some(sub) => sub.load(id)?,
                None => original.read_asset(id)?,
            };
            if repacked.read_asset(id)? != expected {
                return Err(RepackError::Mismatch { id });
            }
        }
        Ok(end)
    }
}

//! Bulk health scans.
//!
//! A scan never fails because of a bad asset: structural problems are
//! [`ValidationOutcome`]s, and assets that could not even be read (I/O error,
//! table record past the end of the archive) are kept as [`ScanError`]
//! entries.  Only failing to list the input directory aborts a scan.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::{validate, ValidationOutcome, ValidationReport};
use crate::batch::{run_batch, BatchReport, Categorize};
use crate::bitmap::BitmapConfig;
use crate::container::{ContainerError, ContainerReader};
use crate::layout::{AssetId, AssetKind};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{0}")]
    Container(#[from] ContainerError),
}

impl Categorize for ScanError {
    fn category(&self) -> &'static str {
        match self {
            ScanError::Io { .. }     => "io",
            ScanError::Container(e)  => e.category(),
        }
    }
}

/// Result of a bulk scan: one entry per asset, in input order.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub results: BatchReport<ValidationReport, ScanError>,
}

impl ScanReport {
    /// Count per category, covering both outcomes and read failures.
    pub fn category_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = self.results.failure_counts();
        for (_, report) in self.results.successes() {
            *counts.entry(report.outcome.category()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, outcome: ValidationOutcome) -> usize {
        self.results
            .successes()
            .filter(|(_, r)| r.outcome == outcome)
            .count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Entries that read fine but did not validate.
    pub fn invalid(&self) -> impl Iterator<Item = (&str, &ValidationReport)> {
        self.results.successes().filter(|(_, r)| !r.outcome.is_valid())
    }

    pub fn summary(&self) -> String {
        let valid = self.count(ValidationOutcome::Valid);
        format!(
            "{} scanned: {} valid, {} invalid, {} unreadable",
            self.total(),
            valid,
            self.results.succeeded() - valid,
            self.results.failed(),
        )
    }

    /// Serializable view for `--json`.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let entries = self
            .results
            .entries
            .iter()
            .map(|e| match &e.result {
                Ok(report) => JsonEntry {
                    name:     &e.name,
                    category: report.outcome.category(),
                    report:   Some(report),
                    error:    None,
                },
                Err(err) => JsonEntry {
                    name:     &e.name,
                    category: err.category(),
                    report:   None,
                    error:    Some(err.to_string()),
                },
            })
            .collect();
        serde_json::to_vec_pretty(&JsonReport {
            total:  self.total(),
            counts: self.category_counts(),
            entries,
        })
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    total:   usize,
    counts:  BTreeMap<&'static str, usize>,
    entries: Vec<JsonEntry<'a>>,
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    name:     &'a str,
    category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    report:   Option<&'a ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error:    Option<String>,
}

// ── Scanners ─────────────────────────────────────────────────────────────────

pub fn validate_file(path: &Path, config: &BitmapConfig) -> Result<ValidationReport, ScanError> {
    let bytes = fs::read(path).map_err(|source| ScanError::Io { path: path.to_owned(), source })?;
    Ok(validate(&bytes, config))
}

/// `*.bin` files directly inside `dir`, sorted by name.
pub fn list_bitmaps(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e.eq_ignore_ascii_case("bin")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Validate every `*.bin` file in `dir`.
pub fn scan_dir(dir: &Path, config: &BitmapConfig) -> io::Result<ScanReport> {
    let items = list_bitmaps(dir)?
        .into_iter()
        .map(|path| (display_name(&path), path))
        .collect();
    let results = run_batch(items, |path: PathBuf| validate_file(&path, config));
    Ok(ScanReport { results })
}

/// Validate every record of the image table without extracting to disk.
pub fn scan_archive<R: Read + Seek>(
    archive: &mut ContainerReader<R>,
    config:  &BitmapConfig,
) -> ScanReport {
    let count = archive.layout().count(AssetKind::Image);
    let mut results = BatchReport::new();
    for index in 0..count {
        let id = AssetId::new(AssetKind::Image, index);
        let result = archive
            .read_asset(id)
            .map(|bytes| validate(&bytes, config))
            .map_err(ScanError::from);
        results.push(id.to_string(), result);
    }
    ScanReport { results }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

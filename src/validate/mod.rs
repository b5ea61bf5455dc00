//! Structural validation of bitmap records without inflating them.
//!
//! [`validate`] is a pure function over raw bytes.  The encoder runs it on
//! every record before returning it; [`scanner`] runs it in bulk over a
//! directory of extracted assets or over an archive's image table.

pub mod scanner;

use std::fmt;

use serde::Serialize;

use crate::bitmap::{find_marker, BitmapConfig, BitmapHeader, HEADER_SIZE};

/// Verdict for one bitmap record.  Checks run in declaration order and the
/// first failure wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    /// Shorter than the 50-byte header.
    TooSmall,
    ZeroDimension,
    /// Width or height above [`BitmapConfig::max_dimension`].
    OversizedDimension,
    /// The three width copies, or the three height copies, disagree.
    DimensionCopyMismatch,
    NoCompressionMarker,
    /// Declared decompressed size is not `width * height * 4`.
    SizeMismatch,
}

impl ValidationOutcome {
    pub const ALL: [ValidationOutcome; 7] = [
        ValidationOutcome::Valid,
        ValidationOutcome::TooSmall,
        ValidationOutcome::ZeroDimension,
        ValidationOutcome::OversizedDimension,
        ValidationOutcome::DimensionCopyMismatch,
        ValidationOutcome::NoCompressionMarker,
        ValidationOutcome::SizeMismatch,
    ];

    pub fn category(self) -> &'static str {
        match self {
            ValidationOutcome::Valid                 => "valid",
            ValidationOutcome::TooSmall              => "too_small",
            ValidationOutcome::ZeroDimension         => "zero_dimension",
            ValidationOutcome::OversizedDimension    => "oversized_dimension",
            ValidationOutcome::DimensionCopyMismatch => "dimension_copy_mismatch",
            ValidationOutcome::NoCompressionMarker   => "no_compression_marker",
            ValidationOutcome::SizeMismatch          => "size_mismatch",
        }
    }

    pub fn is_valid(self) -> bool {
        self == ValidationOutcome::Valid
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

/// Everything [`validate`] learned about a record.  Header fields are `None`
/// when the record is too small to carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub len:           usize,
    pub width:         Option<u16>,
    pub height:        Option<u16>,
    pub declared_size: Option<u16>,
    pub marker_offset: Option<usize>,
    pub outcome:       ValidationOutcome,
}

pub fn validate(bytes: &[u8], config: &BitmapConfig) -> ValidationReport {
    let marker_offset = find_marker(bytes, config.marker_window);
    let Some(header) = BitmapHeader::from_bytes(bytes) else {
        return ValidationReport {
            len:           bytes.len(),
            width:         None,
            height:        None,
            declared_size: None,
            marker_offset,
            outcome:       ValidationOutcome::TooSmall,
        };
    };
    debug_assert!(bytes.len() >= HEADER_SIZE);

    ValidationReport {
        len:           bytes.len(),
        width:         Some(header.width()),
        height:        Some(header.height()),
        declared_size: Some(header.decompressed_size()),
        marker_offset,
        outcome:       classify(&header, marker_offset, config),
    }
}

fn classify(header: &BitmapHeader, marker: Option<usize>, config: &BitmapConfig) -> ValidationOutcome {
    let (width, height) = header.dimensions();
    if width == 0 || height == 0 {
        ValidationOutcome::ZeroDimension
    } else if width > config.max_dimension || height > config.max_dimension {
        ValidationOutcome::OversizedDimension
    } else if !header.dimensions_consistent() {
        ValidationOutcome::DimensionCopyMismatch
    } else if marker.is_none() {
        ValidationOutcome::NoCompressionMarker
    } else if header.decompressed_size() as usize != header.expected_pixel_bytes() {
        ValidationOutcome::SizeMismatch
    } else {
        ValidationOutcome::Valid
    }
}

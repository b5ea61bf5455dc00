//! Downscaling bitmaps to cut their pixel count (and keep them under the
//! 16-bit size field).
//!
//! Skipped images are not written to the output directory; repacking that
//! directory only substitutes the images that actually shrank.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{run_batch, BatchReport, Categorize};
use crate::bitmap::{decode, encode_image, BitmapConfig, BitmapError, BYTES_PER_PIXEL, MAX_DECOMPRESSED_SIZE};
use crate::layout::AssetKind;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("IO error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{0}")]
    Bitmap(#[from] BitmapError),
}

impl Categorize for OptimizeError {
    fn category(&self) -> &'static str {
        match self {
            OptimizeError::Io { .. }  => "io",
            OptimizeError::Bitmap(e)  => e.category(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizeOptions {
    /// Factor applied to both axes.
    pub scale:         f32,
    /// Images with either side at or below this are left alone, and no
    /// resized side goes below it.
    pub min_dimension: u16,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self { scale: 0.5, min_dimension: 16 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooSmall,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeOutcome {
    Resized { from: (u16, u16), to: (u16, u16), bytes: Vec<u8> },
    Skipped { size: (u16, u16), reason: SkipReason },
}

// ── Dimension math ───────────────────────────────────────────────────────────

fn fits(width: u32, height: u32) -> bool {
    width as usize * height as usize * BYTES_PER_PIXEL <= MAX_DECOMPRESSED_SIZE
}

/// Largest aspect-preserving dimensions whose RGBA buffer fits the 16-bit
/// size field.  Dimensions that already fit come back unchanged.
pub fn fit_dimensions(width: u16, height: u16) -> (u16, u16) {
    let (w, h) = (width as u32, height as u32);
    if fits(w, h) {
        return (width, height);
    }
    let max_pixels = (MAX_DECOMPRESSED_SIZE / BYTES_PER_PIXEL) as f64;
    let factor = (max_pixels / (w as f64 * h as f64)).sqrt();
    let mut nw = ((w as f64 * factor).floor() as u32).max(1);
    let mut nh = ((h as f64 * factor).floor() as u32).max(1);
    while !fits(nw, nh) {
        if nw >= nh { nw -= 1 } else { nh -= 1 }
    }
    (nw as u16, nh as u16)
}

/// `floor(side * scale)`, clamped to `[min_dimension, u16::MAX]` and never
/// below 1.
pub fn scaled_dimensions(width: u16, height: u16, scale: f32, min_dimension: u16) -> (u16, u16) {
    let axis = |side: u16| -> u16 {
        let scaled = (side as f32 * scale).floor();
        let scaled = if scaled.is_finite() { scaled.clamp(1.0, u16::MAX as f32) as u16 } else { side };
        scaled.max(min_dimension).max(1)
    };
    (axis(width), axis(height))
}

pub fn resize_rgba(image: &RgbaImage, width: u16, height: u16) -> RgbaImage {
    imageops::resize(image, width as u32, height as u32, FilterType::Lanczos3)
}

// ── Single bitmap ────────────────────────────────────────────────────────────

/// Decode, shrink and re-encode one bitmap record, keeping its header as the
/// template.
pub fn downscale_bitmap(
    bytes:   &[u8],
    options: &OptimizeOptions,
    config:  &BitmapConfig,
) -> Result<OptimizeOutcome, BitmapError> {
    let decoded = decode(bytes, config)?;
    let from = (decoded.width, decoded.height);

    if from.0 <= options.min_dimension || from.1 <= options.min_dimension {
        return Ok(OptimizeOutcome::Skipped { size: from, reason: SkipReason::TooSmall });
    }
    let (tw, th) = scaled_dimensions(from.0, from.1, options.scale, options.min_dimension);
    let to = fit_dimensions(tw, th);
    if to == from {
        return Ok(OptimizeOutcome::Skipped { size: from, reason: SkipReason::NoChange });
    }

    let header = decoded.header;
    let image = decoded.into_image().ok_or(BitmapError::BufferLength {
        width:    from.0,
        height:   from.1,
        expected: from.0 as usize * from.1 as usize * BYTES_PER_PIXEL,
        actual:   0,
    })?;
    let resized = resize_rgba(&image, to.0, to.1);
    let bytes = encode_image(&resized, Some(&header), config)?;
    Ok(OptimizeOutcome::Resized { from, to, bytes })
}

// ── Directory batch ──────────────────────────────────────────────────────────

/// One processed file of [`optimize_dir`].
#[derive(Debug, Clone, Serialize)]
pub struct OptimizedFile {
    pub from:    (u16, u16),
    pub to:      (u16, u16),
    /// `None` when the image was resized and written.
    pub skipped: Option<SkipReason>,
    pub output:  Option<PathBuf>,
}

impl OptimizedFile {
    pub fn pixels_before(&self) -> u64 {
        self.from.0 as u64 * self.from.1 as u64
    }

    pub fn pixels_after(&self) -> u64 {
        self.to.0 as u64 * self.to.1 as u64
    }
}

/// Downscale every `image_*.bin` in `input` into `output` (same names).
pub fn optimize_dir(
    input:   &Path,
    output:  &Path,
    options: &OptimizeOptions,
    config:  &BitmapConfig,
) -> io::Result<BatchReport<OptimizedFile, OptimizeError>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(input)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_image = AssetKind::Image.parse_file_name(name).is_some()
            && path.extension().map_or(false, |e| e == "bin");
        if is_image && path.is_file() {
            files.push((name.to_string(), path));
        }
    }
    files.sort();
    fs::create_dir_all(output)?;
    log::info!("optimizing {} images from {}", files.len(), input.display());

    Ok(run_batch(files, |path: PathBuf| optimize_file(&path, output, options, config)))
}

fn optimize_file(
    path:    &Path,
    output:  &Path,
    options: &OptimizeOptions,
    config:  &BitmapConfig,
) -> Result<OptimizedFile, OptimizeError> {
    let io_err = |source| OptimizeError::Io { path: path.to_owned(), source };
    let bytes = fs::read(path).map_err(io_err)?;

    match downscale_bitmap(&bytes, options, config)? {
        OptimizeOutcome::Skipped { size, reason } => {
            log::debug!("{}: {}x{} skipped ({reason:?})", path.display(), size.0, size.1);
            Ok(OptimizedFile { from: size, to: size, skipped: Some(reason), output: None })
        }
        OptimizeOutcome::Resized { from, to, bytes } => {
            let dest = output.join(path.file_name().unwrap_or_default());
            fs::write(&dest, &bytes).map_err(|source| OptimizeError::Io { path: dest.clone(), source })?;
            log::debug!("{}: {}x{} -> {}x{}", path.display(), from.0, from.1, to.0, to.1);
            Ok(OptimizedFile { from, to, skipped: None, output: Some(dest) })
        }
    }
}

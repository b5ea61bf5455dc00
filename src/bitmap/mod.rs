//! Codec for the custom bitmap sub-format: a 50-byte header followed by a
//! zlib stream that inflates to row-major RGBA.
//!
//! # Size limit
//! The header stores the inflated payload size in a `u16`.  An encoded image
//! therefore carries at most 65 535 bytes of pixels (16 383 RGBA pixels,
//! about 127×127).  [`encode`] rejects anything larger with
//! [`BitmapError::SizeLimitExceeded`]; it never truncates.  Downscale first
//! (see [`crate::optimize`]).
//!
//! # Marker search
//! The header is nominally 50 bytes, but the decoder does not trust that: it
//! scans forward from byte 0 for a zlib header within
//! [`BitmapConfig::marker_window`] bytes and inflates from the first
//! candidate that yields a valid stream.  A zlib header can occur by chance
//! inside the fixed header, so this is a heuristic, not a guarantee.

pub mod header;

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::Categorize;
use crate::validate::{validate, ValidationOutcome};

pub use header::{BitmapHeader, HeaderBuilder, DEFAULT_FLAGS, HEADER_SIZE, OPAQUE_REGION};

/// Largest inflated payload the `u16` size field can describe.
pub const MAX_DECOMPRESSED_SIZE: usize = u16::MAX as usize;
pub const BYTES_PER_PIXEL: usize = 4;

/// Every valid zlib header with a 32 KiB window and deflate method
/// (`CMF = 0x78`): fastest, fast, default and best compression.
pub const ZLIB_MARKERS: [[u8; 2]; 4] = [
    [0x78, 0x01],
    [0x78, 0x5E],
    [0x78, 0x9C],
    [0x78, 0xDA],
];

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitmapConfig {
    /// Number of leading bytes searched for the zlib marker.
    pub marker_window:      usize,
    /// zlib levels tried by the encoder; the smallest stream wins.
    pub compression_levels: Vec<u32>,
    /// Largest width or height accepted as plausible.
    pub max_dimension:      u16,
    /// Flags for headers built without a template.
    pub default_flags:      u16,
}

impl Default for BitmapConfig {
    fn default() -> Self {
        Self {
            marker_window:      100,
            compression_levels: vec![6, 9],
            max_dimension:      4096,
            default_flags:      DEFAULT_FLAGS,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("Bitmap is {len} bytes, shorter than the {HEADER_SIZE}-byte header")]
    TooShort { len: usize },
    #[error("No compression-stream marker within the first {window} bytes")]
    MarkerNotFound { window: usize },
    #[error("Pixel stream at byte {offset} failed to inflate: {source}")]
    Decompression { offset: usize, source: io::Error },
    #[error("Pixel buffer is {len} bytes; the 16-bit size field caps it at {MAX_DECOMPRESSED_SIZE}")]
    SizeLimitExceeded { len: usize },
    /// `actual` stops counting at `expected + 1`.
    #[error("Inflated {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    SizeMismatch { width: u16, height: u16, expected: usize, actual: usize },
    #[error("Pixel buffer is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    BufferLength { width: u16, height: u16, expected: usize, actual: usize },
    #[error("Image is {width}x{height}, larger than the format's 65535x65535 maximum")]
    DimensionsOverflow { width: u32, height: u32 },
    #[error("Encoded bitmap failed validation: {0}")]
    Invalid(ValidationOutcome),
    #[error("Compression error: {0}")]
    Compression(io::Error),
}

impl Categorize for BitmapError {
    fn category(&self) -> &'static str {
        match self {
            BitmapError::TooShort { .. }           => "too_small",
            BitmapError::MarkerNotFound { .. }     => "no_compression_marker",
            BitmapError::Decompression { .. }      => "decompression_failed",
            BitmapError::SizeLimitExceeded { .. }  => "size_limit_exceeded",
            BitmapError::SizeMismatch { .. }       => "size_mismatch",
            BitmapError::BufferLength { .. }       => "buffer_length",
            BitmapError::DimensionsOverflow { .. } => "oversized_dimension",
            BitmapError::Invalid(outcome)          => outcome.category(),
            BitmapError::Compression(_)            => "compression_failed",
        }
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// What to do when the inflated payload is not `width * height * 4` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizePolicy {
    /// Fail with [`BitmapError::SizeMismatch`].
    #[default]
    Strict,
    /// Recover what can be recovered and mark the result suspect: RGB
    /// payloads are widened to RGBA, anything else is padded with `0xFF` or
    /// truncated.
    Lenient,
}

#[derive(Debug, Clone)]
pub struct DecodedBitmap {
    pub width:         u16,
    pub height:        u16,
    /// Row-major RGBA, exactly `width * height * 4` bytes.
    pub pixels:        Vec<u8>,
    pub header:        BitmapHeader,
    /// Byte offset of the zlib stream inside the encoded record.
    pub marker_offset: usize,
    /// Set when a lenient decode had to repair the payload length.
    pub suspect:       bool,
}

impl DecodedBitmap {
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width as u32, self.height as u32, self.pixels.clone())
    }

    pub fn into_image(self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width as u32, self.height as u32, self.pixels)
    }
}

/// Offsets in `bytes[..window]` where a zlib header starts, in order.
pub fn marker_candidates(bytes: &[u8], window: usize) -> impl Iterator<Item = usize> + '_ {
    let limit = window.min(bytes.len());
    (0..limit).filter(move |&i| {
        bytes
            .get(i..i + 2)
            .map_or(false, |pair| ZLIB_MARKERS.iter().any(|m| m == pair))
    })
}

/// First zlib header in `bytes[..window]`.
pub fn find_marker(bytes: &[u8], window: usize) -> Option<usize> {
    marker_candidates(bytes, window).next()
}

/// Inflate at most `limit` bytes.  Anything past `limit` is left unread, so
/// a stream that claims more than the header allows costs `limit` bytes.
fn inflate(stream: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(limit.min(MAX_DECOMPRESSED_SIZE + 1));
    ZlibDecoder::new(stream).take(limit as u64).read_to_end(&mut out)?;
    Ok(out)
}

/// Strict decode.
pub fn decode(bytes: &[u8], config: &BitmapConfig) -> Result<DecodedBitmap, BitmapError> {
    decode_with(bytes, config, SizePolicy::Strict)
}

pub fn decode_with(
    bytes:  &[u8],
    config: &BitmapConfig,
    policy: SizePolicy,
) -> Result<DecodedBitmap, BitmapError> {
    let header = BitmapHeader::from_bytes(bytes)
        .ok_or(BitmapError::TooShort { len: bytes.len() })?;

    // One byte past the expected size is enough to tell "too long" apart;
    // lenient decoding truncates to `expected` anyway.
    let limit = header.expected_pixel_bytes() + 1;
    let mut first_failure: Option<(usize, io::Error)> = None;
    for offset in marker_candidates(bytes, config.marker_window) {
        match inflate(&bytes[offset..], limit) {
            Ok(pixels) => return finish_decode(header, offset, pixels, policy),
            Err(e) => {
                log::trace!("zlib candidate at byte {offset} rejected: {e}");
                first_failure.get_or_insert((offset, e));
            }
        }
    }

    Err(match first_failure {
        Some((offset, source)) => BitmapError::Decompression { offset, source },
        None => BitmapError::MarkerNotFound { window: config.marker_window },
    })
}

fn finish_decode(
    header:        BitmapHeader,
    marker_offset: usize,
    pixels:        Vec<u8>,
    policy:        SizePolicy,
) -> Result<DecodedBitmap, BitmapError> {
    let (width, height) = header.dimensions();
    let expected = header.expected_pixel_bytes();

    let (pixels, suspect) = if pixels.len() == expected {
        (pixels, false)
    } else {
        match policy {
            SizePolicy::Strict => {
                return Err(BitmapError::SizeMismatch {
                    width,
                    height,
                    expected,
                    actual: pixels.len(),
                })
            }
            SizePolicy::Lenient => (repair_payload(pixels, width, height), true),
        }
    };

    Ok(DecodedBitmap { width, height, pixels, header, marker_offset, suspect })
}

fn repair_payload(mut pixels: Vec<u8>, width: u16, height: u16) -> Vec<u8> {
    let count = width as usize * height as usize;
    if pixels.len() == count * 3 {
        return pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 0xFF])
            .collect();
    }
    pixels.resize(count * BYTES_PER_PIXEL, 0xFF);
    pixels
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Compress at each level and keep the smallest stream.
fn compress_smallest(pixels: &[u8], levels: &[u32]) -> Result<Vec<u8>, BitmapError> {
    let levels: &[u32] = if levels.is_empty() { &[6] } else { levels };
    let mut best: Option<Vec<u8>> = None;
    for &level in levels {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
        encoder.write_all(pixels).map_err(BitmapError::Compression)?;
        let stream = encoder.finish().map_err(BitmapError::Compression)?;
        if best.as_ref().map_or(true, |b| stream.len() < b.len()) {
            best = Some(stream);
        }
    }
    best.ok_or_else(|| BitmapError::Compression(io::Error::new(io::ErrorKind::Other, "no compression level")))
}

fn scale_axis(value: f32, old: u16, new: u16) -> f32 {
    if old == 0 {
        value
    } else {
        value * (new as f32 / old as f32)
    }
}

/// Header for an encode of `width`×`height` carrying `size` pixel bytes.
///
/// With a template, every dimension copy and the size field are rewritten.
/// If the dimensions changed, hotspot x is rescaled and bytes 20–45 are
/// zeroed; otherwise the hotspot is rescaled by `new / old` per axis (an
/// identity) and the opaque region is kept.  Any dimension change counts,
/// including a PNG edited to a new size, not only an explicit resize.
pub fn build_header(
    template: Option<&BitmapHeader>,
    width:    u16,
    height:   u16,
    size:     u16,
    config:   &BitmapConfig,
) -> BitmapHeader {
    let Some(template) = template else {
        return HeaderBuilder::new()
            .dimensions(width, height)
            .hotspot(width as f32 / 2.0, height as f32 / 2.0)
            .flags(config.default_flags)
            .decompressed_size(size)
            .build();
    };

    let (old_w, old_h) = template.dimensions();
    let (hot_x, hot_y) = template.hotspot();
    let new_x = scale_axis(hot_x, old_w, width);
    let builder = HeaderBuilder::from_template(template)
        .dimensions(width, height)
        .decompressed_size(size);

    if (old_w, old_h) != (width, height) {
        builder.hotspot_x(new_x).zero_opaque_region().build()
    } else {
        builder.hotspot(new_x, scale_axis(hot_y, old_h, height)).build()
    }
}

/// Encode RGBA pixels, optionally keeping the header fields of `template`.
///
/// Returns `header ++ zlib stream`.  The result is validated before it is
/// returned.
pub fn encode(
    pixels:   &[u8],
    width:    u16,
    height:   u16,
    template: Option<&BitmapHeader>,
    config:   &BitmapConfig,
) -> Result<Vec<u8>, BitmapError> {
    if pixels.len() > MAX_DECOMPRESSED_SIZE {
        return Err(BitmapError::SizeLimitExceeded { len: pixels.len() });
    }
    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        return Err(BitmapError::BufferLength { width, height, expected, actual: pixels.len() });
    }

    let stream = compress_smallest(pixels, &config.compression_levels)?;
    let header = build_header(template, width, height, pixels.len() as u16, config);

    let mut out = Vec::with_capacity(HEADER_SIZE + stream.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&stream);

    let report = validate(&out, config);
    if !report.outcome.is_valid() {
        return Err(BitmapError::Invalid(report.outcome));
    }
    Ok(out)
}

/// Encode a decoded PNG (or any RGBA image).
pub fn encode_image(
    image:    &RgbaImage,
    template: Option<&BitmapHeader>,
    config:   &BitmapConfig,
) -> Result<Vec<u8>, BitmapError> {
    let (width, height) = image.dimensions();
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(BitmapError::DimensionsOverflow { width, height });
    };
    encode(image.as_raw(), w, h, template, config)
}

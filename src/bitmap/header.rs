//! The fixed 50-byte bitmap header.
//!
//! | Bytes          | Field                                  |
//! |----------------|----------------------------------------|
//! | 0, 4, 12       | width (u16, three copies)              |
//! | 2, 6, 14       | height (u16, three copies)             |
//! | 8–11           | unknown, preserved                     |
//! | 16–19          | hotspot x (f32)                        |
//! | 20–23          | hotspot y (f32)                        |
//! | 24–25          | flags (u16)                            |
//! | 26–45          | unknown metadata                       |
//! | 46–47          | decompressed payload size (u16)        |
//! | 48–49          | reserved                               |
//!
//! Bytes 20–45 are treated as one opaque region.  Left stale after a resize
//! they make the game render the image corrupted; zeroing them fixes that.
//! That rule is empirical: what the region encodes is not known.

use std::fmt;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

pub const HEADER_SIZE: usize = 50;

pub const WIDTH_OFFSETS:  [usize; 3] = [0, 4, 12];
pub const HEIGHT_OFFSETS: [usize; 3] = [2, 6, 14];
pub const HOTSPOT_X_OFFSET: usize = 16;
pub const HOTSPOT_Y_OFFSET: usize = 20;
pub const FLAGS_OFFSET:     usize = 24;
pub const DECOMPRESSED_SIZE_OFFSET: usize = 46;
pub const RESERVED_OFFSET:  usize = 48;

/// Region zeroed whenever an image changes dimensions.
pub const OPAQUE_REGION: Range<usize> = 20..46;

/// Flags written into headers built without a template.
pub const DEFAULT_FLAGS: u16 = 2;

// ── BitmapHeader ─────────────────────────────────────────────────────────────

/// An immutable copy of a bitmap header.  Build modified headers with
/// [`HeaderBuilder`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BitmapHeader([u8; HEADER_SIZE]);

impl BitmapHeader {
    /// Take the first [`HEADER_SIZE`] bytes; `None` if `bytes` is shorter.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.0
    }

    fn u16_at(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.0[offset..offset + 2])
    }

    fn f32_at(&self, offset: usize) -> f32 {
        LittleEndian::read_f32(&self.0[offset..offset + 4])
    }

    /// Width from the first copy.
    pub fn width(&self) -> u16 {
        self.u16_at(WIDTH_OFFSETS[0])
    }

    /// Height from the first copy.
    pub fn height(&self) -> u16 {
        self.u16_at(HEIGHT_OFFSETS[0])
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.width(), self.height())
    }

    pub fn width_copies(&self) -> [u16; 3] {
        WIDTH_OFFSETS.map(|o| self.u16_at(o))
    }

    pub fn height_copies(&self) -> [u16; 3] {
        HEIGHT_OFFSETS.map(|o| self.u16_at(o))
    }

    /// All three width copies agree, and all three height copies agree.
    pub fn dimensions_consistent(&self) -> bool {
        let [w0, w1, w2] = self.width_copies();
        let [h0, h1, h2] = self.height_copies();
        w0 == w1 && w1 == w2 && h0 == h1 && h1 == h2
    }

    pub fn hotspot(&self) -> (f32, f32) {
        (self.f32_at(HOTSPOT_X_OFFSET), self.f32_at(HOTSPOT_Y_OFFSET))
    }

    pub fn flags(&self) -> u16 {
        self.u16_at(FLAGS_OFFSET)
    }

    pub fn opaque_region(&self) -> &[u8] {
        &self.0[OPAQUE_REGION]
    }

    pub fn decompressed_size(&self) -> u16 {
        self.u16_at(DECOMPRESSED_SIZE_OFFSET)
    }

    pub fn reserved(&self) -> [u8; 2] {
        [self.0[RESERVED_OFFSET], self.0[RESERVED_OFFSET + 1]]
    }

    /// RGBA byte count implied by the dimensions.
    pub fn expected_pixel_bytes(&self) -> usize {
        self.width() as usize * self.height() as usize * 4
    }
}

impl fmt::Debug for BitmapHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapHeader")
            .field("width", &self.width_copies())
            .field("height", &self.height_copies())
            .field("hotspot", &self.hotspot())
            .field("flags", &format_args!("{:#06x}", self.flags()))
            .field("opaque", &hex::encode(self.opaque_region()))
            .field("decompressed_size", &self.decompressed_size())
            .finish()
    }
}

// ── HeaderBuilder ────────────────────────────────────────────────────────────

/// Applies named field writes to a copy of a template header.
///
/// The template itself is never touched, so one header can seed any number
/// of encodes.
#[derive(Clone)]
pub struct HeaderBuilder {
    bytes: [u8; HEADER_SIZE],
}

impl HeaderBuilder {
    /// Start from an all-zero header.
    pub fn new() -> Self {
        Self { bytes: [0u8; HEADER_SIZE] }
    }

    pub fn from_template(template: &BitmapHeader) -> Self {
        Self { bytes: template.0 }
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.bytes[offset..offset + 2], value);
    }

    fn put_f32(&mut self, offset: usize, value: f32) {
        LittleEndian::write_f32(&mut self.bytes[offset..offset + 4], value);
    }

    /// Writes every width and height copy.
    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        for offset in WIDTH_OFFSETS {
            self.put_u16(offset, width);
        }
        for offset in HEIGHT_OFFSETS {
            self.put_u16(offset, height);
        }
        self
    }

    pub fn hotspot(self, x: f32, y: f32) -> Self {
        let mut b = self.hotspot_x(x);
        b.put_f32(HOTSPOT_Y_OFFSET, y);
        b
    }

    pub fn hotspot_x(mut self, x: f32) -> Self {
        self.put_f32(HOTSPOT_X_OFFSET, x);
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.put_u16(FLAGS_OFFSET, flags);
        self
    }

    pub fn decompressed_size(mut self, size: u16) -> Self {
        self.put_u16(DECOMPRESSED_SIZE_OFFSET, size);
        self
    }

    /// Zero bytes 20–45 (hotspot y, flags and the unknown metadata).
    pub fn zero_opaque_region(mut self) -> Self {
        self.bytes[OPAQUE_REGION].fill(0);
        self
    }

    pub fn build(self) -> BitmapHeader {
        BitmapHeader(self.bytes)
    }
}

impl Default for HeaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

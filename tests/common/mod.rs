#![allow(dead_code)]

use std::io::Cursor;

use byteorder::{LittleEndian, WriteBytesExt};
use chowpack::bitmap::{encode, BitmapConfig};
use chowpack::{ArchiveLayout, AssetKind};

/// Three images, two sounds, one font, one shader.
pub fn small_layout() -> ArchiveLayout {
    ArchiveLayout::from_counts(3, 2, 1, 1)
}

/// Deterministic RGBA test pattern.
pub fn gradient(width: u16, height: u16) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height as u32 {
        for x in 0..width as u32 {
            pixels.extend_from_slice(&[(x * 7) as u8, (y * 13) as u8, (x ^ y) as u8, 0xFF]);
        }
    }
    pixels
}

/// A valid bitmap record with a fresh header.
pub fn bitmap(width: u16, height: u16) -> Vec<u8> {
    encode(&gradient(width, height), width, height, None, &BitmapConfig::default()).unwrap()
}

/// Payloads per kind in layout order, sized to match `layout`.
pub fn sample_payloads(layout: &ArchiveLayout) -> Vec<Vec<Vec<u8>>> {
    AssetKind::ALL
        .into_iter()
        .map(|kind| {
            (0..layout.count(kind))
                .map(|i| match kind {
                    AssetKind::Image  => bitmap(4 + i as u16, 3 + i as u16),
                    AssetKind::Sound  => [b"OggS".as_slice(), vec![i as u8; 20 + i as usize].as_slice()].concat(),
                    AssetKind::Font   => [[0x00, 0x01, 0x00, 0x00].as_slice(), [0xAB; 12].as_slice()].concat(),
                    AssetKind::Shader => format!("void main() {{ /* {i} */ }}").into_bytes(),
                })
                .collect()
        })
        .collect()
}

/// Tables packed from byte 0, payloads back-to-back after them.
pub fn build_archive(layout: &ArchiveLayout, payloads: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut tables = Vec::new();
    let mut body = Vec::new();
    let mut cursor = layout.metadata_size() as u32;
    for per_kind in payloads {
        for payload in per_kind {
            tables.write_u32::<LittleEndian>(cursor).unwrap();
            tables.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            body.extend_from_slice(payload);
            cursor += payload.len() as u32;
        }
    }
    assert_eq!(tables.len() as u64, layout.metadata_size());
    tables.extend_from_slice(&body);
    tables
}

pub fn sample_archive() -> (ArchiveLayout, Vec<Vec<Vec<u8>>>, Vec<u8>) {
    let layout = small_layout();
    let payloads = sample_payloads(&layout);
    let archive = build_archive(&layout, &payloads);
    (layout, payloads, archive)
}

pub fn cursor(bytes: &[u8]) -> Cursor<Vec<u8>> {
    Cursor::new(bytes.to_vec())
}

mod common;

use std::fs;

use chowpack::bitmap::{BitmapConfig, HeaderBuilder};
use chowpack::container::ContainerReader;
use chowpack::validate::scanner::{scan_archive, scan_dir, validate_file};
use chowpack::validate::{validate, ValidationOutcome};
use tempfile::tempdir;

use common::{bitmap, build_archive, cursor, sample_payloads, small_layout};

fn record(width: u16, height: u16, declared: u16, tail: &[u8]) -> Vec<u8> {
    let header = HeaderBuilder::new()
        .dimensions(width, height)
        .decompressed_size(declared)
        .build();
    [header.as_bytes().as_slice(), tail].concat()
}

fn outcome(bytes: &[u8]) -> ValidationOutcome {
    validate(bytes, &BitmapConfig::default()).outcome
}

#[test]
fn test_valid() {
    let report = validate(&bitmap(8, 8), &BitmapConfig::default());
    assert_eq!(report.outcome, ValidationOutcome::Valid);
    assert_eq!(report.width, Some(8));
    assert_eq!(report.declared_size, Some(256));
    assert_eq!(report.marker_offset, Some(50));
}

#[test]
fn test_too_small() {
    let report = validate(&[0u8; 49], &BitmapConfig::default());
    assert_eq!(report.outcome, ValidationOutcome::TooSmall);
    assert_eq!(report.width, None);
    assert_eq!(report.len, 49);
}

#[test]
fn test_each_category() {
    assert_eq!(outcome(&record(0, 4, 0, &[0x78, 0x9C])), ValidationOutcome::ZeroDimension);
    assert_eq!(outcome(&record(5000, 1, 20000, &[0x78, 0x9C])), ValidationOutcome::OversizedDimension);
    assert_eq!(outcome(&record(4, 4, 64, &[0u8; 20])), ValidationOutcome::NoCompressionMarker);
    assert_eq!(outcome(&record(4, 4, 60, &[0x78, 0xDA])), ValidationOutcome::SizeMismatch);

    let mut copies = bitmap(4, 4);
    copies[12] = 5;
    assert_eq!(outcome(&copies), ValidationOutcome::DimensionCopyMismatch);
}

#[test]
fn test_dimension_bound_is_inclusive() {
    assert_eq!(outcome(&record(4096, 1, 16384, &[0x78, 0x01])), ValidationOutcome::Valid);
    assert_eq!(outcome(&record(4097, 1, 16388, &[0x78, 0x01])), ValidationOutcome::OversizedDimension);
}

#[test]
fn test_first_failure_wins() {
    // Zero width, no marker and a wrong size: zero_dimension is checked first.
    assert_eq!(outcome(&record(0, 3, 99, &[])), ValidationOutcome::ZeroDimension);
    // No marker and a wrong size.
    assert_eq!(outcome(&record(2, 2, 99, &[0u8; 4])), ValidationOutcome::NoCompressionMarker);
}

#[test]
fn test_categories_are_distinct() {
    let mut names: Vec<_> = ValidationOutcome::ALL.iter().map(|o| o.category()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), ValidationOutcome::ALL.len());
    assert_eq!(ValidationOutcome::SizeMismatch.to_string(), "size_mismatch");
}

#[test]
fn test_scan_dir() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("image_00000.bin"), bitmap(6, 6)).unwrap();
    fs::write(dir.path().join("image_00001.bin"), [0u8; 10]).unwrap();
    fs::write(dir.path().join("image_00002.bin"), record(4, 4, 64, &[0u8; 8])).unwrap();
    fs::write(dir.path().join("notes.txt"), "not a bitmap").unwrap();
    fs::create_dir(dir.path().join("nested.bin")).unwrap();

    let report = scan_dir(dir.path(), &BitmapConfig::default()).unwrap();
    assert_eq!(report.total(), 3);
    assert_eq!(report.count(ValidationOutcome::Valid), 1);

    let counts = report.category_counts();
    assert_eq!(counts.get("valid"), Some(&1));
    assert_eq!(counts.get("too_small"), Some(&1));
    assert_eq!(counts.get("no_compression_marker"), Some(&1));

    let invalid: Vec<&str> = report.invalid().map(|(name, _)| name).collect();
    assert_eq!(invalid, vec!["image_00001.bin", "image_00002.bin"]);
    assert_eq!(report.summary(), "3 scanned: 1 valid, 2 invalid, 0 unreadable");
}

#[test]
fn test_scan_dir_missing() {
    let dir = tempdir().unwrap();
    assert!(scan_dir(&dir.path().join("absent"), &BitmapConfig::default()).is_err());
    assert!(validate_file(&dir.path().join("absent.bin"), &BitmapConfig::default()).is_err());
}

#[test]
fn test_scan_archive() {
    let layout = small_layout();
    let mut payloads = sample_payloads(&layout);
    payloads[0][1] = b"junk".to_vec();
    let mut archive = build_archive(&layout, &payloads);
    // Stretch image #2 past the end of the archive.
    archive[2 * 8 + 4..2 * 8 + 8].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());

    let mut reader = ContainerReader::open(cursor(&archive), layout).unwrap();
    let report = scan_archive(&mut reader, &BitmapConfig::default());

    assert_eq!(report.total(), 3);
    let counts = report.category_counts();
    assert_eq!(counts.get("valid"), Some(&1));
    assert_eq!(counts.get("too_small"), Some(&1));
    assert_eq!(counts.get("out_of_range"), Some(&1));
    assert_eq!(report.summary(), "3 scanned: 1 valid, 1 invalid, 1 unreadable");

    let json: serde_json::Value = serde_json::from_slice(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["total"], 3);
    assert_eq!(json["counts"]["too_small"], 1);
    assert_eq!(json["entries"][1]["category"], "too_small");
    assert_eq!(json["entries"][2]["category"], "out_of_range");
    assert!(json["entries"][2]["error"].is_string());
}

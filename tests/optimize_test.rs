mod common;

use std::fs;

use chowpack::bitmap::{decode, BitmapConfig, BitmapHeader};
use chowpack::optimize::{
    downscale_bitmap, fit_dimensions, optimize_dir, scaled_dimensions, OptimizeOptions, OptimizeOutcome, SkipReason,
};
use tempfile::tempdir;

use common::bitmap;

#[test]
fn test_fit_dimensions() {
    assert_eq!(fit_dimensions(100, 100), (100, 100));
    assert_eq!(fit_dimensions(127, 129), (127, 129));
    assert_eq!(fit_dimensions(200, 200), (127, 127));
    assert_eq!(fit_dimensions(256, 64), (255, 63));
    assert_eq!(fit_dimensions(20_000, 1), (16_383, 1));
    for (w, h) in [(300u16, 17u16), (4096, 4096), (129, 128)] {
        let (fw, fh) = fit_dimensions(w, h);
        assert!(fw as usize * fh as usize * 4 <= 65_535, "{w}x{h} -> {fw}x{fh}");
        assert!(fw <= w && fh <= h);
    }
}

#[test]
fn test_scaled_dimensions() {
    assert_eq!(scaled_dimensions(64, 64, 0.5, 16), (32, 32));
    assert_eq!(scaled_dimensions(40, 20, 0.5, 16), (20, 16));
    assert_eq!(scaled_dimensions(17, 100, 0.1, 16), (16, 16));
    assert_eq!(scaled_dimensions(3, 3, 0.1, 0), (1, 1));
}

#[test]
fn test_downscale_bitmap() {
    let config = BitmapConfig::default();
    let options = OptimizeOptions::default();

    match downscale_bitmap(&bitmap(64, 64), &options, &config).unwrap() {
        OptimizeOutcome::Resized { from, to, bytes } => {
            assert_eq!(from, (64, 64));
            assert_eq!(to, (32, 32));
            let header = BitmapHeader::from_bytes(&bytes).unwrap();
            assert_eq!(header.width_copies(), [32; 3]);
            assert_eq!(header.decompressed_size(), 4096);
            assert!(header.opaque_region().iter().all(|&b| b == 0));
            assert_eq!(decode(&bytes, &config).unwrap().pixels.len(), 4096);
        }
        other => panic!("expected a resize, got {other:?}"),
    }
}

#[test]
fn test_downscale_skips() {
    let config = BitmapConfig::default();
    let options = OptimizeOptions::default();

    let small = downscale_bitmap(&bitmap(16, 40), &options, &config).unwrap();
    assert_eq!(small, OptimizeOutcome::Skipped { size: (16, 40), reason: SkipReason::TooSmall });

    let same = OptimizeOptions { scale: 1.0, min_dimension: 16 };
    let unchanged = downscale_bitmap(&bitmap(20, 20), &same, &config).unwrap();
    assert_eq!(unchanged, OptimizeOutcome::Skipped { size: (20, 20), reason: SkipReason::NoChange });

    assert!(downscale_bitmap(&[0u8; 12], &options, &config).is_err());
}

#[test]
fn test_optimize_dir() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("image_00000.bin"), bitmap(64, 48)).unwrap();
    fs::write(input.path().join("image_00001.bin"), bitmap(8, 8)).unwrap();
    fs::write(input.path().join("image_00002.bin"), [0u8; 20]).unwrap();
    fs::write(input.path().join("sound_000.bin"), b"OggS").unwrap();

    let out_dir = output.path().join("optimized");
    let report = optimize_dir(input.path(), &out_dir, &OptimizeOptions::default(), &BitmapConfig::default()).unwrap();
    assert_eq!(report.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failure_counts().get("too_small"), Some(&1));

    let resized: Vec<_> = report.successes().filter(|(_, f)| f.skipped.is_none()).collect();
    assert_eq!(resized.len(), 1);
    assert_eq!(resized[0].1.to, (32, 24));
    assert_eq!(resized[0].1.pixels_before(), 64 * 48);

    assert!(out_dir.join("image_00000.bin").exists());
    assert!(!out_dir.join("image_00001.bin").exists());
}

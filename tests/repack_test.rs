mod common;

use std::fs;
use std::io::Cursor;

use chowpack::bitmap::BitmapConfig;
use chowpack::container::ContainerReader;
use chowpack::repack::{
    assign_offsets, check_contiguity, RepackError, RepackOptions, Repacker, Substitute, SubstitutionSet,
};
use chowpack::table::{AssetTable, TableRecord, TableSet};
use chowpack::{ArchiveLayout, AssetId, AssetKind, TableSpec};
use tempfile::tempdir;

use common::{bitmap, cursor, sample_archive};

fn repack(
    layout:      &ArchiveLayout,
    archive:     &[u8],
    substitutes: &SubstitutionSet,
) -> Result<(Vec<u8>, chowpack::RepackSummary), RepackError> {
    let repacker = Repacker::new(layout.clone(), BitmapConfig::default());
    let mut out = Cursor::new(Vec::new());
    let summary = repacker.repack(cursor(archive), substitutes, &mut out)?;
    Ok((out.into_inner(), summary))
}

#[test]
fn test_assign_offsets() {
    let (records, end) = assign_offsets(100, &[50, 40, 20]).unwrap();
    assert_eq!(records, vec![
        TableRecord::new(100, 50),
        TableRecord::new(150, 40),
        TableRecord::new(190, 20),
    ]);
    assert_eq!(end, 210);

    let (records, end) = assign_offsets(7, &[]).unwrap();
    assert!(records.is_empty());
    assert_eq!(end, 7);
}

#[test]
fn test_assign_offsets_u32_limit() {
    let (records, end) = assign_offsets(u32::MAX as u64 - 10, &[10, 0]).unwrap();
    assert_eq!(records[1].offset, u32::MAX);
    assert_eq!(end, u32::MAX as u64);

    let err = assign_offsets(u32::MAX as u64 - 10, &[11, 1]).unwrap_err();
    assert!(matches!(err, RepackError::ArchiveTooLarge { offset } if offset == u32::MAX as u64 + 1));
}

#[test]
fn test_identity_repack() {
    let (layout, _, archive) = sample_archive();
    let (out, summary) = repack(&layout, &archive, &SubstitutionSet::new()).unwrap();
    assert_eq!(out, archive);
    assert_eq!(summary.final_size, archive.len() as u64);
    assert_eq!(summary.metadata_size, layout.metadata_size());
    assert_eq!(summary.substituted(), 0);
    assert_eq!(summary.copied(), 7);
}

#[test]
fn test_identity_repack_compacts_gaps() {
    let (layout, payloads, mut archive) = sample_archive();
    // Move the shader payload 5 bytes further out, leaving a gap.
    let shader_table = layout.table(AssetKind::Shader).unwrap().offset as usize;
    let old = u32::from_le_bytes(archive[shader_table..shader_table + 4].try_into().unwrap());
    archive[shader_table..shader_table + 4].copy_from_slice(&(old + 5).to_le_bytes());
    archive.splice(old as usize..old as usize, [0xEE; 5]);
    assert!(check_contiguity(&ContainerReader::open(cursor(&archive), layout.clone()).unwrap().tables, layout.metadata_size()).is_err());

    let (out, summary) = repack(&layout, &archive, &SubstitutionSet::new()).unwrap();
    assert_eq!(summary.final_size, archive.len() as u64 - 5);
    let mut reader = ContainerReader::open(cursor(&out), layout.clone()).unwrap();
    assert_eq!(reader.read_asset(AssetId::new(AssetKind::Shader, 0)).unwrap(), payloads[3][0]);
    assert_eq!(check_contiguity(&reader.tables, layout.metadata_size()).unwrap(), out.len() as u64);
}

#[test]
fn test_substitution() {
    let (layout, payloads, archive) = sample_archive();
    let replacement = bitmap(20, 11);
    let mut subs = SubstitutionSet::new();
    subs.insert_bytes(AssetId::new(AssetKind::Image, 1), replacement.clone());
    subs.insert_bytes(AssetId::new(AssetKind::Sound, 0), b"OggS new sound".to_vec());

    let (out, summary) = repack(&layout, &archive, &subs).unwrap();
    assert_eq!(summary.kinds[&AssetKind::Image].substituted, 1);
    assert_eq!(summary.kinds[&AssetKind::Image].copied, 2);
    assert_eq!(summary.kinds[&AssetKind::Sound].substituted, 1);
    assert_eq!(summary.kinds[&AssetKind::Shader].copied, 1);

    let mut reader = ContainerReader::open(cursor(&out), layout.clone()).unwrap();
    assert_eq!(reader.tables, summary.tables);
    for (id, _) in reader.tables.clone().entries() {
        let expected = match (id.kind, id.index) {
            (AssetKind::Image, 1) => replacement.clone(),
            (AssetKind::Sound, 0) => b"OggS new sound".to_vec(),
            (kind, index) => payloads[kind as usize][index as usize].clone(),
        };
        assert_eq!(reader.read_asset(id).unwrap(), expected, "{id}");
    }

    let end = check_contiguity(&reader.tables, layout.metadata_size()).unwrap();
    assert_eq!(end, out.len() as u64);
    for table in reader.tables.iter() {
        assert_eq!(table.len(), layout.count(table.kind()) as usize);
    }

    let repacker = Repacker::new(layout, BitmapConfig::default());
    assert_eq!(repacker.verify(cursor(&archive), cursor(&out), &subs).unwrap(), end);
}

#[test]
fn test_verify_detects_mismatch() {
    let (layout, _, archive) = sample_archive();
    let (mut out, _) = repack(&layout, &archive, &SubstitutionSet::new()).unwrap();
    let last = out.len() - 1;
    out[last] ^= 0xFF;
    let repacker = Repacker::new(layout, BitmapConfig::default());
    let err = repacker.verify(cursor(&archive), cursor(&out), &SubstitutionSet::new()).unwrap_err();
    assert!(matches!(err, RepackError::Mismatch { id } if id == AssetId::new(AssetKind::Shader, 0)));
}

#[test]
fn test_invalid_image_aborts_before_writing() {
    let (layout, _, archive) = sample_archive();
    let mut subs = SubstitutionSet::new();
    subs.insert_bytes(AssetId::new(AssetKind::Image, 0), vec![1, 2, 3]);

    let repacker = Repacker::new(layout.clone(), BitmapConfig::default());
    let mut out = Cursor::new(Vec::new());
    let err = repacker.repack(cursor(&archive), &subs, &mut out).unwrap_err();
    assert!(matches!(err, RepackError::InvalidSubstitute { .. }));
    assert!(out.get_ref().is_empty());

    let lenient = repacker.with_options(RepackOptions { validate_images: false });
    lenient.repack(cursor(&archive), &subs, &mut out).unwrap();
}

#[test]
fn test_substitute_out_of_range() {
    let (layout, _, archive) = sample_archive();
    let mut subs = SubstitutionSet::new();
    subs.insert_bytes(AssetId::new(AssetKind::Font, 1), vec![0; 4]);
    let err = repack(&layout, &archive, &subs).unwrap_err();
    assert!(matches!(err, RepackError::SubstituteOutOfRange { count: 1, .. }));
}

#[test]
fn test_original_out_of_range_aborts() {
    let (layout, _, mut archive) = sample_archive();
    archive[4..8].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
    let err = repack(&layout, &archive, &SubstitutionSet::new()).unwrap_err();
    assert!(matches!(err, RepackError::OutOfRange { id, .. } if id == AssetId::new(AssetKind::Image, 0)));

    // Substituting the broken record repairs the archive.
    let mut subs = SubstitutionSet::new();
    subs.insert_bytes(AssetId::new(AssetKind::Image, 0), bitmap(2, 2));
    repack(&layout, &archive, &subs).unwrap();
}

#[test]
fn test_truncated_original() {
    let (layout, _, archive) = sample_archive();
    let err = repack(&layout, &archive[..10], &SubstitutionSet::new()).unwrap_err();
    assert!(matches!(err, RepackError::Container(_)));
}

#[test]
fn test_from_dir() {
    let layout = ArchiveLayout::from_counts(3, 2, 1, 1);
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("images")).unwrap();
    fs::create_dir_all(dir.path().join("sounds")).unwrap();
    fs::write(dir.path().join("images/image_00002.bin"), bitmap(3, 3)).unwrap();
    fs::write(dir.path().join("images/image_00001.png"), b"png").unwrap();
    fs::write(dir.path().join("images/readme.txt"), b"notes").unwrap();
    fs::write(dir.path().join("sounds/sound_001.ogg"), b"OggS").unwrap();

    let subs = SubstitutionSet::from_dir(dir.path(), &layout).unwrap();
    assert_eq!(subs.len(), 2);
    assert!(subs.contains(AssetId::new(AssetKind::Image, 2)));
    assert!(!subs.contains(AssetId::new(AssetKind::Image, 1)));
    assert!(matches!(
        subs.get(AssetId::new(AssetKind::Sound, 1)),
        Some(Substitute::File(path)) if path.ends_with("sound_001.ogg")
    ));
}

#[test]
fn test_from_dir_errors() {
    let layout = ArchiveLayout::from_counts(3, 2, 1, 1);

    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("fonts")).unwrap();
    fs::write(dir.path().join("fonts/font_05.ttf"), b"x").unwrap();
    let err = SubstitutionSet::from_dir(dir.path(), &layout).unwrap_err();
    assert!(matches!(err, RepackError::SubstituteOutOfRange { count: 1, .. }));

    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("sounds")).unwrap();
    fs::write(dir.path().join("sounds/sound_001.ogg"), b"a").unwrap();
    fs::write(dir.path().join("sounds/sound_1.wav"), b"b").unwrap();
    let err = SubstitutionSet::from_dir(dir.path(), &layout).unwrap_err();
    assert!(matches!(err, RepackError::DuplicateSubstitute { .. }));
}

#[test]
fn test_from_dir_ignores_backup_files() {
    let layout = ArchiveLayout::from_counts(3, 2, 1, 1);
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("sounds")).unwrap();
    fs::create_dir_all(dir.path().join("fonts")).unwrap();
    fs::write(dir.path().join("sounds/sound_001.ogg"), b"OggS").unwrap();
    fs::write(dir.path().join("sounds/sound_001.ogg.bak"), b"old").unwrap();
    fs::write(dir.path().join("fonts/font_00.ttf~"), b"old").unwrap();

    let subs = SubstitutionSet::from_dir(dir.path(), &layout).unwrap();
    assert_eq!(subs.len(), 1);
    assert!(matches!(
        subs.get(AssetId::new(AssetKind::Sound, 1)),
        Some(Substitute::File(path)) if path.ends_with("sound_001.ogg")
    ));
    assert!(!subs.contains(AssetId::new(AssetKind::Font, 0)));
}

#[test]
fn test_repack_rejects_non_empty_sink() {
    let (layout, _, archive) = sample_archive();
    let repacker = Repacker::new(layout, BitmapConfig::default());
    let mut out = Cursor::new(vec![0xAA; archive.len() + 100]);

    let err = repacker.repack(cursor(&archive), &SubstitutionSet::new(), &mut out).unwrap_err();
    assert!(matches!(err, RepackError::SinkNotEmpty { len } if len == archive.len() as u64 + 100));
    assert_eq!(out.get_ref(), &vec![0xAA; archive.len() + 100]);
}

#[test]
fn test_repack_from_files() {
    let (layout, _, archive) = sample_archive();
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("shaders")).unwrap();
    fs::write(dir.path().join("shaders/shader_00.glsl"), b"void main() {}").unwrap();

    let subs = SubstitutionSet::from_dir(dir.path(), &layout).unwrap();
    let (out, _) = repack(&layout, &archive, &subs).unwrap();
    let mut reader = ContainerReader::open(cursor(&out), layout).unwrap();
    assert_eq!(reader.read_asset(AssetId::new(AssetKind::Shader, 0)).unwrap(), b"void main() {}");
}

#[test]
fn test_check_contiguity() {
    let spec = |kind, offset, count| TableSpec { kind, offset, count };
    let tables = |records: Vec<TableRecord>| {
        TableSet::from_tables(vec![AssetTable { spec: spec(AssetKind::Image, 0, records.len() as u32), records }])
    };

    // Out of index order but tiles 16..40.
    let ok = tables(vec![TableRecord::new(30, 10), TableRecord::new(16, 14), TableRecord::new(30, 0)]);
    assert_eq!(check_contiguity(&ok, 16).unwrap(), 40);

    let gap = tables(vec![TableRecord::new(16, 4), TableRecord::new(21, 4)]);
    assert!(matches!(check_contiguity(&gap, 16), Err(RepackError::NotContiguous { expected: 20, found: 21, .. })));

    let overlap = tables(vec![TableRecord::new(16, 8), TableRecord::new(20, 4)]);
    assert!(matches!(check_contiguity(&overlap, 16), Err(RepackError::NotContiguous { expected: 24, found: 20, .. })));

    let into_tables = tables(vec![TableRecord::new(8, 8)]);
    assert!(check_contiguity(&into_tables, 16).is_err());
}

mod common;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use common::{context_with, pseudo_random};
use spanzip::{CompressionLevel, MemoryContext, ZipEngine};

fn pack_and_unpack(
    files: &[(&str, Vec<u8>)],
    level: CompressionLevel,
    max_archive_size: u64,
) -> MemoryContext {
    let engine = ZipEngine::new().with_compression_level(level);
    let names: Vec<&str> = files.iter().map(|(name, _)| *name).collect();
    let mut context = context_with(files);
    engine.pack(&mut context, &names, max_archive_size).unwrap();
    engine.unpack(&mut context, None).unwrap();
    context
}

fn assert_extracted(context: &MemoryContext, files: &[(&str, Vec<u8>)]) {
    assert_eq!(context.extracted().len(), files.len());
    for (name, data) in files {
        assert_eq!(&context.extracted()[*name].data, data, "{name}");
    }
}

#[test]
fn test_deflate_round_trip() {
    let files = [
        ("readme.txt", b"Hello, world!\n".repeat(500)),
        ("data/random.bin", pseudo_random(70_000, 1)),
        ("empty", Vec::new()),
    ];
    let context = pack_and_unpack(&files, CompressionLevel::Normal, 0);
    assert_eq!(context.volume_count(), 1);
    assert_extracted(&context, &files);
}

#[test]
fn test_store_round_trip_across_volumes() {
    let files = [
        ("a.bin", pseudo_random(5_000, 2)),
        ("b.bin", pseudo_random(12_345, 3)),
        ("c.bin", pseudo_random(10, 4)),
    ];
    let context = pack_and_unpack(&files, CompressionLevel::None, 4_096);
    assert!(context.volume_count() >= 5);
    assert_extracted(&context, &files);
}

#[test]
fn test_empty_archive() {
    let engine = ZipEngine::new();
    let mut context = MemoryContext::default();
    let summary = engine.pack(&mut context, &[] as &[&str], 0).unwrap();
    assert_eq!(summary.files, 0);
    assert_eq!(context.volume(0).map(|v| v.len()), Some(22));

    assert!(engine.list(&mut context).unwrap().is_empty());
    let summary = engine.unpack(&mut context, None).unwrap();
    assert_eq!(summary.extracted, 0);
}

#[test]
fn test_unicode_names_survive() {
    let files = [
        ("résumé.txt", b"cv".to_vec()),
        ("日本語/ファイル.txt", b"nihongo".to_vec()),
    ];
    let context = pack_and_unpack(&files, CompressionLevel::Normal, 0);
    assert_extracted(&context, &files);
}

#[test]
fn test_attributes_and_times_are_restored() {
    let when = chrono::NaiveDate::from_ymd_opt(2021, 6, 15)
        .and_then(|d| d.and_hms_opt(13, 45, 30))
        .unwrap();
    let mut context = MemoryContext::default();
    context.add_file_with("ro.txt", "read only", spanzip::zip::ATTR_READONLY, when);

    let engine = ZipEngine::new();
    engine.pack(&mut context, &["ro.txt"], 0).unwrap();
    engine.unpack(&mut context, None).unwrap();

    let file = &context.extracted()["ro.txt"];
    assert_eq!(file.attributes, spanzip::zip::ATTR_READONLY);
    assert_eq!(file.last_write, Some(when));
}

#[test]
fn test_missing_sources_are_skipped() {
    let engine = ZipEngine::new();
    let mut context = context_with(&[("present", b"here".to_vec())]);
    let summary = engine
        .pack(&mut context, &["absent", "present", "also-absent"], 0)
        .unwrap();
    assert_eq!(summary.files, 1);

    let names: Vec<String> = engine
        .list(&mut context)
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, ["present"]);
}

fn file_set() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..6_000), 1..6)
}

fn level() -> impl Strategy<Value = CompressionLevel> {
    prop_oneof![
        Just(CompressionLevel::None),
        Just(CompressionLevel::Min),
        Just(CompressionLevel::Max),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever goes in comes back out, for any level and volume cap
    #[test]
    fn round_trip_any_content(
        contents in file_set(),
        level in level(),
        max_archive_size in prop_oneof![Just(0u64), 600u64..8_000],
    ) {
        let names: Vec<String> = (0..contents.len()).map(|i| format!("dir/file{i}.bin")).collect();
        let files: Vec<(&str, Vec<u8>)> = names
            .iter()
            .map(String::as_str)
            .zip(contents.iter().cloned())
            .collect();

        let context = pack_and_unpack(&files, level, max_archive_size);
        prop_assert_eq!(context.extracted().len(), files.len());
        for (name, data) in &files {
            prop_assert_eq!(&context.extracted()[*name].data, data);
        }
        if max_archive_size > 0 {
            for volume in context.volumes() {
                prop_assert!(volume.len() as u64 <= max_archive_size);
            }
        }
    }
}

mod common;

use std::io::Cursor;

use pretty_assertions::assert_eq;

use common::{SparseContext, context_with};
use spanzip::context::OPTION_FORCE_ZIP64;
use spanzip::zip::eocd::{find_end_of_central_directory, read_zip64_locator};
use spanzip::zip::{U16_SENTINEL, U32_SENTINEL};
use spanzip::{CompressionLevel, MemoryContext, ZipEngine};

const FOUR_GIB: u64 = 1 << 32;

#[test]
fn test_forced_zip64_round_trip() {
    let mut context = context_with(&[("a.txt", b"alpha".to_vec()), ("b.txt", b"beta".to_vec())]);
    context.set_option(OPTION_FORCE_ZIP64, true);

    let engine = ZipEngine::new();
    let summary = engine.pack(&mut context, &["a.txt", "b.txt"], 0).unwrap();
    assert!(summary.zip64);

    // Classic record is all sentinels, the locator points at the ZIP64 record
    let mut volume = Cursor::new(context.volume(0).unwrap());
    let (eocd, offset) = find_end_of_central_directory(&mut volume).unwrap().unwrap();
    assert_eq!(eocd.total_entries, U16_SENTINEL as u64);
    assert_eq!(eocd.dir_offset, U32_SENTINEL as u64);
    let locator = read_zip64_locator(&mut volume, offset).unwrap().unwrap();
    assert_eq!(locator.disk_with_eocd64, 0);
    assert_eq!(locator.total_disks, 1);

    let directory = engine.read_central_directory(&mut context).unwrap();
    assert!(directory.eocd.zip64);
    assert_eq!(directory.eocd.total_entries, 2);
    assert!(directory.entries.iter().all(|h| h.zip64));

    engine.unpack(&mut context, None).unwrap();
    assert_eq!(context.extracted()["a.txt"].data, b"alpha");
    assert_eq!(context.extracted()["b.txt"].data, b"beta");
}

#[test]
fn test_small_archive_stays_classic() {
    let mut context = context_with(&[("a.txt", b"alpha".to_vec())]);
    let summary = ZipEngine::new().pack(&mut context, &["a.txt"], 0).unwrap();
    assert!(!summary.zip64);

    let mut volume = Cursor::new(context.volume(0).unwrap());
    let (eocd, offset) = find_end_of_central_directory(&mut volume).unwrap().unwrap();
    assert_eq!(eocd.total_entries, 1);
    assert!(read_zip64_locator(&mut volume, offset).unwrap().is_none());
}

#[test]
fn test_entry_count_overflow_promotes_archive() {
    let count = U16_SENTINEL as usize + 1;
    let names: Vec<String> = (0..count).map(|i| format!("{i:05}")).collect();
    let mut context = MemoryContext::default();
    for name in &names {
        context.add_file(name.as_str(), Vec::new());
    }

    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let summary = engine.pack(&mut context, names.as_slice(), 0).unwrap();
    assert!(summary.zip64);
    assert_eq!(summary.files, count as u64);

    let directory = engine.read_central_directory(&mut context).unwrap();
    assert_eq!(directory.eocd.total_entries, count as u64);
    assert_eq!(directory.entries.len(), count);
    assert_eq!(directory.entries[count - 1].name, names[count - 1]);
}

fn pack_zeros(length: u64) -> (SparseContext, spanzip::PackSummary) {
    let mut context = SparseContext::default();
    context.add_zeros("zeros", length);
    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let summary = engine.pack(&mut context, &["zeros"], 0).unwrap();
    (context, summary)
}

#[test]
#[cfg_attr(debug_assertions, ignore = "streams 4 GiB, run in release")]
fn test_largest_classic_entry() {
    let (mut context, summary) = pack_zeros(FOUR_GIB - 1);
    // The entry fits, but the directory starts beyond 4 GiB
    assert!(summary.zip64);

    let engine = ZipEngine::new();
    let directory = engine.read_central_directory(&mut context).unwrap();
    assert!(!directory.entries[0].zip64);
    assert_eq!(directory.entries[0].uncompressed_size, FOUR_GIB - 1);
}

#[test]
#[cfg_attr(debug_assertions, ignore = "streams 4 GiB, run in release")]
fn test_smallest_zip64_entry() {
    let (mut context, summary) = pack_zeros(FOUR_GIB);
    assert!(summary.zip64);

    let engine = ZipEngine::new();
    let directory = engine.read_central_directory(&mut context).unwrap();
    assert!(directory.entries[0].zip64);
    assert_eq!(directory.entries[0].uncompressed_size, FOUR_GIB);
}

#[test]
#[cfg_attr(debug_assertions, ignore = "streams 4 GiB twice, run in release")]
fn test_large_entry_between_small_ones() {
    let mut context = SparseContext::default();
    context.add_file("first", b"0123456789".to_vec());
    context.add_zeros("huge", FOUR_GIB);
    context.add_file("last", vec![b'x'; 100]);

    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let summary = engine
        .pack(&mut context, &["first", "huge", "last"], 0)
        .unwrap();
    assert!(summary.zip64);
    assert_eq!(summary.volumes, 1);

    let directory = engine.read_central_directory(&mut context).unwrap();
    let [first, huge, last] = directory.entries.as_slice() else {
        panic!("expected three entries");
    };
    assert!(!first.zip64);
    assert!(huge.zip64);
    // Small, but its local header lies beyond 4 GiB
    assert!(last.zip64);
    assert!(last.local_header_offset > FOUR_GIB);
    assert_eq!(last.uncompressed_size, 100);

    engine.unpack(&mut context, None).unwrap();
    let crc_of = |data: &[u8]| crc32fast::hash(data);
    assert_eq!(context.extracted["first"].crc32, crc_of(b"0123456789"));
    assert_eq!(context.extracted["huge"].length, FOUR_GIB);
    assert_eq!(context.extracted["huge"].crc32, huge.crc32);
    assert_eq!(context.extracted["last"].crc32, crc_of(&[b'x'; 100]));
}

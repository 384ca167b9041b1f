mod common;

use std::io::{Cursor, Seek, SeekFrom};

use pretty_assertions::assert_eq;

use common::{context_with, pseudo_random};
use spanzip::zip::{FileHeader, HeaderRead};
use spanzip::{CompressionLevel, ZipEngine, ZipError};

const CAP: u64 = 1_000;

fn spanned() -> (spanzip::MemoryContext, Vec<(&'static str, Vec<u8>)>) {
    let files = vec![
        ("small.txt", b"fits on the first volume".to_vec()),
        ("large.bin", pseudo_random(3_500, 7)),
        ("tail.txt", b"after the large one".to_vec()),
    ];
    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let mut context = context_with(&files);
    engine
        .pack(&mut context, &["small.txt", "large.bin", "tail.txt"], CAP)
        .unwrap();
    (context, files)
}

#[test]
fn test_volumes_respect_cap_and_names_increase() {
    let (context, _) = spanned();
    assert!(context.volume_count() >= 4);
    for volume in context.volumes() {
        assert!(volume.len() as u64 <= CAP);
    }

    // New volumes are named strictly in order; any other request is a
    // back-patch of an earlier volume
    let mut highest = None;
    let mut patched = Vec::new();
    for &volume in context.name_requests() {
        match highest {
            Some(h) if volume <= h => patched.push(volume),
            Some(h) => {
                assert_eq!(volume, h + 1);
                highest = Some(volume);
            }
            None => {
                assert_eq!(volume, 0);
                highest = Some(volume);
            }
        }
    }
    assert_eq!(highest, Some(context.volume_count() as u32 - 1));
    assert_eq!(patched, [0]);
}

#[test]
fn test_header_patched_on_earlier_volume() {
    let (mut context, files) = spanned();
    let directory = ZipEngine::new().read_central_directory(&mut context).unwrap();
    let large = directory
        .entries
        .iter()
        .find(|h| h.name == "large.bin")
        .unwrap();
    assert_eq!(large.disk_start, 0);
    assert_eq!(large.uncompressed_size, files[1].1.len() as u64);

    // The local header on volume 0 carries the final sizes and CRC
    let mut volume = Cursor::new(context.volume(0).unwrap());
    volume
        .seek(SeekFrom::Start(large.local_header_offset))
        .unwrap();
    let HeaderRead::Found(local) = FileHeader::read(&mut volume, false).unwrap() else {
        panic!("local header missing");
    };
    assert_eq!(local.crc32, large.crc32);
    assert_eq!(local.compressed_size, large.compressed_size);
    assert_eq!(local.uncompressed_size, large.uncompressed_size);
    assert_ne!(local.crc32, 0);
}

#[test]
fn test_spanned_archive_extracts() {
    let (mut context, files) = spanned();
    let engine = ZipEngine::new();
    engine.unpack(&mut context, None).unwrap();
    for (name, data) in &files {
        assert_eq!(&context.extracted()[*name].data, data);
    }
    assert_eq!(context.open_volumes(), (0, 0));
}

#[test]
fn test_deflated_entry_spans_volumes() {
    let data = pseudo_random(20_000, 11);
    let engine = ZipEngine::new();
    let mut context = context_with(&[("noise.bin", data.clone())]);
    let summary = engine.pack(&mut context, &["noise.bin"], 4_096).unwrap();
    assert!(summary.volumes >= 5);

    engine.unpack(&mut context, None).unwrap();
    assert_eq!(context.extracted()["noise.bin"].data, data);
}

#[test]
fn test_volume_name_refused() {
    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let mut context = context_with(&[("big.bin", pseudo_random(5_000, 5))]);
    context.limit_volumes(2);

    let err = engine.pack(&mut context, &["big.bin"], CAP).unwrap_err();
    assert!(matches!(err, ZipError::VolumeUnavailable(_)), "{err}");
    // Both named volumes were closed, the full one before the name was refused
    assert_eq!(context.open_volumes(), (0, 0));
    assert_eq!(context.name_requests(), [0, 1, 2]);
}

#[test]
fn test_missing_last_volume() {
    let (context, _) = spanned();
    let volumes = context.volumes();
    let last = volumes.len() - 1;
    let mut broken = spanzip::MemoryContext::from_volumes(volumes[..last].to_vec());
    // Without the last volume there is no end of central directory
    let err = ZipEngine::new().list(&mut broken).unwrap_err();
    assert!(matches!(err, ZipError::Format(_)), "{err}");
}

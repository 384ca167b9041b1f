mod common;

use std::io::Cursor;

use common::{context_with, pseudo_random};
use spanzip::zip::{FileHeader, LFH_SIZE};
use spanzip::{CompressionLevel, MemoryContext, ZipEngine, ZipError};

fn stored_archive(name: &str, data: &[u8]) -> (MemoryContext, FileHeader) {
    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let mut context = context_with(&[(name, data.to_vec())]);
    engine.pack(&mut context, &[name], 0).unwrap();
    let directory = engine.read_central_directory(&mut context).unwrap();
    let header = directory.entries[0].clone();
    (context, header)
}

#[test]
fn test_flipped_data_byte_fails_crc() {
    let data = pseudo_random(1_000, 9);
    let (mut context, header) = stored_archive("payload.bin", &data);

    let mut volume = context.volume(0).unwrap();
    let data_start = header.local_header_offset as usize + LFH_SIZE + header.name.len();
    volume[data_start + 500] ^= 0x01;
    context.replace_volume(0, volume);

    let err = ZipEngine::new().unpack(&mut context, None).unwrap_err();
    match err {
        ZipError::ChecksumMismatch {
            name,
            expected,
            actual,
        } => {
            assert_eq!(name, "payload.bin");
            assert_eq!(expected, header.crc32);
            assert_ne!(actual, expected);
        }
        other => panic!("expected checksum mismatch, got {other}"),
    }
}

#[test]
fn test_renamed_local_header_rejected() {
    let (mut context, header) = stored_archive("right.txt", b"contents");

    let mut volume = context.volume(0).unwrap();
    let name_start = header.local_header_offset as usize + LFH_SIZE;
    volume[name_start..name_start + 5].copy_from_slice(b"wrong");
    context.replace_volume(0, volume);

    let err = ZipEngine::new().unpack(&mut context, None).unwrap_err();
    match err {
        ZipError::Format(msg) => assert!(msg.contains("right.txt"), "{msg}"),
        other => panic!("expected format error, got {other}"),
    }
    assert!(context.extracted().is_empty());
}

#[test]
fn test_backslash_local_name_accepted() {
    let (mut context, header) = stored_archive("dir/file.txt", b"contents");

    let mut volume = context.volume(0).unwrap();
    let slash = header.local_header_offset as usize + LFH_SIZE + 3;
    assert_eq!(volume[slash], b'/');
    volume[slash] = b'\\';
    context.replace_volume(0, volume);

    ZipEngine::new().unpack(&mut context, None).unwrap();
    assert_eq!(context.extracted()["dir/file.txt"].data, b"contents");
}

#[test]
fn test_unsupported_method_skipped() {
    let engine = ZipEngine::new().with_compression_level(CompressionLevel::None);
    let mut context = context_with(&[
        ("keep.txt", b"kept".to_vec()),
        ("lzma.bin", b"packed".to_vec()),
    ]);
    engine.pack(&mut context, &["keep.txt", "lzma.bin"], 0).unwrap();
    let directory = engine.read_central_directory(&mut context).unwrap();

    // Relabel the second entry as LZMA (method 14) in its central header
    let mut volume = context.volume(0).unwrap();
    let central = directory.eocd.dir_offset as usize + directory.entries[0].size(true);
    volume[central + 10..central + 12].copy_from_slice(&14u16.to_le_bytes());
    context.replace_volume(0, volume);

    let summary = engine.unpack(&mut context, None).unwrap();
    assert_eq!((summary.extracted, summary.skipped), (1, 1));
    assert_eq!(context.extracted()["keep.txt"].data, b"kept");
    assert!(!context.extracted().contains_key("lzma.bin"));
}

#[test]
fn test_truncated_deflate_stream() {
    let data = pseudo_random(10_000, 3);
    let engine = ZipEngine::new();
    let mut context = context_with(&[("noise.bin", data)]);
    engine.pack(&mut context, &["noise.bin"], 0).unwrap();
    let mut header = engine.read_central_directory(&mut context).unwrap().entries[0].clone();

    // Claim less compressed data than there is, so the decoder runs dry
    let mut volume = context.volume(0).unwrap();
    let directory = engine.read_central_directory(&mut context).unwrap();
    header.compressed_size /= 2;
    let mut patched = Vec::new();
    header.write(&mut patched, true).unwrap();
    let offset = directory.eocd.dir_offset as usize;
    volume[offset..offset + patched.len()].copy_from_slice(&patched);
    context.replace_volume(0, volume);

    let err = engine.unpack(&mut context, None).unwrap_err();
    assert!(
        matches!(err, ZipError::Format(_) | ZipError::Io(_)),
        "unexpected error: {err}"
    );
}

#[test]
fn test_not_an_archive() {
    let mut context = MemoryContext::from_volumes(vec![b"just some text, no zip here".to_vec()]);
    let err = ZipEngine::new().list(&mut context).unwrap_err();
    assert!(matches!(err, ZipError::Format(_)), "{err}");
    assert!(!ZipEngine::is_archive(&mut Cursor::new(context.volume(0).unwrap())).unwrap());
}

#[test]
fn test_no_volumes_at_all() {
    let mut context = MemoryContext::default();
    let err = ZipEngine::new().unpack(&mut context, None).unwrap_err();
    assert!(matches!(err, ZipError::Format(_)), "{err}");
}

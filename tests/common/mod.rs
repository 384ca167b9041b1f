//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use chrono::NaiveDateTime;
use spanzip::MemoryContext;
use spanzip::context::{
    PackStreamContext, SourceFile, UnpackStreamContext, VolumeRead, VolumeWrite,
};
use spanzip::io::CrcStream;
use spanzip::zip::{ATTR_ARCHIVE, DosDateTime};

/// Deterministic, poorly compressible test data.
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Memory context preloaded with `files`.
pub fn context_with(files: &[(&str, Vec<u8>)]) -> MemoryContext {
    let mut context = MemoryContext::default();
    for (name, data) in files {
        context.add_file(*name, data.clone());
    }
    context
}

/// Byte volume that only stores non-zero writes, so multi-GiB archives of
/// zeros fit in memory.
#[derive(Debug, Default)]
struct SparseData {
    len: u64,
    chunks: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct SparseVolume {
    data: Rc<RefCell<SparseData>>,
    position: u64,
}

impl SparseVolume {
    pub fn len(&self) -> u64 {
        self.data.borrow().len
    }
}

impl Read for SparseVolume {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = self.position.min(data.len);
        let n = (buf.len() as u64).min(data.len - start) as usize;
        let end = start + n as u64;
        buf[..n].fill(0);
        for (&offset, chunk) in data.chunks.range(..end) {
            let chunk_end = offset + chunk.len() as u64;
            if chunk_end <= start {
                continue;
            }
            let from = offset.max(start);
            let to = chunk_end.min(end);
            buf[(from - start) as usize..(to - start) as usize]
                .copy_from_slice(&chunk[(from - offset) as usize..(to - offset) as usize]);
        }
        self.position = end;
        Ok(n)
    }
}

impl Write for SparseVolume {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.borrow_mut();
        if buf.iter().any(|&b| b != 0) {
            data.chunks.insert(self.position, buf.to_vec());
        }
        self.position += buf.len() as u64;
        data.len = data.len.max(self.position);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SparseVolume {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::End(delta) => self.len().saturating_add_signed(delta),
            SeekFrom::Current(delta) => self.position.saturating_add_signed(delta),
        };
        Ok(self.position)
    }
}

/// Extracted entry as seen by [`SparseContext`]: length and CRC only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    pub length: u64,
    pub crc32: u32,
}

/// Context for archives too large to hold in memory: sources are given
/// explicitly or as runs of zeros, volumes are sparse, and extracted
/// entries are reduced to a [`Digest`].
#[derive(Default)]
pub struct SparseContext {
    sources: HashMap<String, (u64, Option<Vec<u8>>)>,
    pub volumes: Vec<SparseVolume>,
    pending: HashMap<String, Rc<RefCell<CrcStream<io::Sink>>>>,
    pub extracted: BTreeMap<String, Digest>,
}

impl SparseContext {
    pub fn add_file(&mut self, name: &str, data: Vec<u8>) {
        self.sources
            .insert(name.to_string(), (data.len() as u64, Some(data)));
    }

    pub fn add_zeros(&mut self, name: &str, length: u64) {
        self.sources.insert(name.to_string(), (length, None));
    }
}

struct SharedDigest(Rc<RefCell<CrcStream<io::Sink>>>);

impl Write for SharedDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PackStreamContext for SparseContext {
    fn archive_name(&mut self, volume: u32) -> Option<String> {
        Some(format!("sparse.{volume}"))
    }

    fn open_archive_write(
        &mut self,
        volume: u32,
        _name: &str,
        truncate: bool,
    ) -> io::Result<Option<Box<dyn VolumeWrite>>> {
        let index = volume as usize;
        if self.volumes.len() <= index {
            self.volumes.resize_with(index + 1, SparseVolume::default);
        }
        if truncate {
            self.volumes[index] = SparseVolume::default();
        }
        let mut volume = self.volumes[index].clone();
        volume.position = 0;
        Ok(Some(Box::new(volume)))
    }

    fn close_archive_write(
        &mut self,
        _volume: u32,
        _name: &str,
        _stream: Box<dyn VolumeWrite>,
    ) -> io::Result<()> {
        Ok(())
    }

    fn open_file_read(&mut self, path: &str) -> io::Result<Option<SourceFile>> {
        let Some((length, data)) = self.sources.get(path) else {
            return Ok(None);
        };
        let stream: Box<dyn Read> = match data {
            Some(data) => Box::new(io::Cursor::new(data.clone())),
            None => Box::new(io::repeat(0).take(*length)),
        };
        Ok(Some(SourceFile {
            stream,
            length: *length,
            attributes: ATTR_ARCHIVE,
            last_write: DosDateTime::EPOCH.to_datetime().unwrap_or_default(),
        }))
    }

    fn close_file_read(&mut self, _path: &str, _stream: Box<dyn Read>) -> io::Result<()> {
        Ok(())
    }
}

impl UnpackStreamContext for SparseContext {
    fn open_archive_read(&mut self, volume: u32) -> io::Result<Option<Box<dyn VolumeRead>>> {
        Ok(self.volumes.get(volume as usize).map(|v| {
            let mut v = v.clone();
            v.position = 0;
            Box::new(v) as Box<dyn VolumeRead>
        }))
    }

    fn close_archive_read(&mut self, _volume: u32, _stream: Box<dyn VolumeRead>) -> io::Result<()> {
        Ok(())
    }

    fn open_file_write(
        &mut self,
        path: &str,
        _length: u64,
        _last_write: Option<NaiveDateTime>,
    ) -> io::Result<Option<Box<dyn Write>>> {
        let digest = Rc::new(RefCell::new(CrcStream::new(io::sink())));
        self.pending.insert(path.to_string(), Rc::clone(&digest));
        Ok(Some(Box::new(SharedDigest(digest))))
    }

    fn close_file_write(
        &mut self,
        path: &str,
        _stream: Box<dyn Write>,
        _attributes: u32,
        _last_write: Option<NaiveDateTime>,
    ) -> io::Result<()> {
        if let Some(digest) = self.pending.remove(path) {
            let digest = digest.borrow();
            self.extracted.insert(
                path.to_string(),
                Digest {
                    length: digest.count(),
                    crc32: digest.crc(),
                },
            );
        }
        Ok(())
    }
}

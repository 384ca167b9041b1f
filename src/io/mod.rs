//! Stream plumbing shared by the packer and unpacker.
//!
//! - [`ReadAt`] sources ([`LocalFileReader`], [`HttpRangeReader`]) give
//!   random access to one archive volume; [`ReadAtCursor`] turns them into
//!   `Read + Seek` streams the engine can consume.
//! - [`ConcatStream`] stitches a sequence of volumes into one logical stream.
//! - [`CrcStream`] accumulates a CRC-32 over everything passing through it.

mod concat;
mod crc;
mod http;
mod local;

pub use concat::{ConcatStream, VolumeRollover};
pub use crc::CrcStream;
pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use std::io::{self, Read, Seek, SeekFrom};

/// Trait for random access reading from a data source
pub trait ReadAt {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Sequential `Read + Seek` view over a [`ReadAt`] source.
pub struct ReadAtCursor<R: ReadAt> {
    inner: R,
    position: u64,
}

impl<R: ReadAt> ReadAtCursor<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ReadAt> Read for ReadAtCursor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.inner.size();
        if buf.is_empty() || self.position >= size {
            return Ok(0);
        }
        let available = (size - self.position).min(buf.len() as u64) as usize;
        let n = self.inner.read_at(self.position, &mut buf[..available])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: ReadAt> Seek for ReadAtCursor<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.inner.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

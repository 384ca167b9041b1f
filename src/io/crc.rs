use crc32fast::Hasher;
use std::io::{self, Read, Write};

/// Pass-through stream that accumulates a CRC-32 over every byte read from
/// or written to the wrapped stream.
pub struct CrcStream<S> {
    inner: S,
    hasher: Hasher,
    count: u64,
}

impl<S> CrcStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            count: 0,
        }
    }

    /// CRC-32 of all bytes that have passed through so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of bytes that have passed through so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.count += data.len() as u64;
    }
}

impl<S: Read> Read for CrcStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.update(&buf[..n]);
        Ok(n)
    }
}

impl<S: Write> Write for CrcStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

//! A logical byte stream spread over a sequence of physical volumes.
//!
//! The compression codecs only ever see one continuous stream; whenever the
//! current volume runs dry (read) or fills up (write), [`ConcatStream`] hands
//! it to its [`VolumeRollover`] and continues on the volume it gets back.

use std::io::{self, Read, Seek, Write};

/// Supplies the next volume of a [`ConcatStream`].
pub trait VolumeRollover<V> {
    /// Return the volume that continues the logical stream.
    ///
    /// `exhausted` is the volume that just ran out, or `None` when the
    /// stream had no volume yet. The implementation owns it from here on and
    /// is expected to close it.
    fn next_volume(&mut self, exhausted: Option<V>) -> io::Result<V>;
}

/// Rollovers that produce nothing but empty volumes in a row.
const MAX_EMPTY_ROLLOVERS: u32 = 2;

/// Logical stream over a changing sequence of volumes.
///
/// - Reads are clamped to `length - position`, where both are logical.
/// - Writes roll over when the *physical* position of the current volume
///   reaches `length`, so for writing `length` acts as a per-volume cap.
///
/// Not seekable.
pub struct ConcatStream<V, R> {
    source: Option<V>,
    rollover: R,
    length: u64,
    position: u64,
    /// Physical position in the current volume, queried once per volume
    volume_position: Option<u64>,
    detached: bool,
}

impl<V, R: VolumeRollover<V>> ConcatStream<V, R> {
    pub fn new(source: Option<V>, rollover: R) -> Self {
        Self {
            source,
            rollover,
            length: u64::MAX,
            position: 0,
            volume_position: None,
            detached: false,
        }
    }

    /// Set the cap used to decide when the stream ends (read) or when to roll
    /// to the next volume (write). Physical volumes are never resized.
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    /// Number of bytes read or written through this stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn rollover_mut(&mut self) -> &mut R {
        &mut self.rollover
    }

    /// Take the current volume out; from then on every read or write that
    /// would need a volume fails instead of asking for the next one.
    pub fn detach(&mut self) -> Option<V> {
        self.detached = true;
        self.volume_position = None;
        self.source.take()
    }

    /// Give back the current volume and the rollover.
    pub fn into_parts(self) -> (Option<V>, R) {
        (self.source, self.rollover)
    }

    fn advance(&mut self, empty_rollovers: &mut u32) -> io::Result<()> {
        if self.detached {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream was detached from its volumes",
            ));
        }
        if *empty_rollovers >= MAX_EMPTY_ROLLOVERS {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no volume could continue the stream",
            ));
        }
        *empty_rollovers += 1;
        let exhausted = self.source.take();
        self.volume_position = None;
        self.source = Some(self.rollover.next_volume(exhausted)?);
        Ok(())
    }
}

impl<V: Read, R: VolumeRollover<V>> Read for ConcatStream<V, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        let count = (buf.len() as u64).min(remaining) as usize;

        let mut filled = 0;
        let mut empty_rollovers = 0;
        while filled < count {
            let n = match self.source.as_mut() {
                Some(source) => source.read(&mut buf[filled..count])?,
                None => 0,
            };
            if n == 0 {
                self.advance(&mut empty_rollovers)?;
                continue;
            }
            empty_rollovers = 0;
            filled += n;
            self.position += n as u64;
        }
        Ok(filled)
    }
}

impl<V: Write + Seek, R: VolumeRollover<V>> ConcatStream<V, R> {
    /// Bytes the current volume can still take before the cap.
    fn room(&mut self) -> io::Result<u64> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        if self.length == u64::MAX {
            return Ok(u64::MAX);
        }
        let position = match self.volume_position {
            Some(position) => position,
            None => *self.volume_position.insert(source.stream_position()?),
        };
        Ok(self.length.saturating_sub(position))
    }
}

impl<V: Write + Seek, R: VolumeRollover<V>> Write for ConcatStream<V, R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        let mut empty_rollovers = 0;
        while written < buf.len() {
            let room = self.room()?;
            if room == 0 {
                self.advance(&mut empty_rollovers)?;
                continue;
            }
            empty_rollovers = 0;

            let chunk = ((buf.len() - written) as u64).min(room) as usize;
            let n = match self.source.as_mut() {
                Some(source) => source.write(&buf[written..written + chunk])?,
                None => 0,
            };
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "volume accepted no bytes",
                ));
            }
            written += n;
            self.position += n as u64;
            if let Some(position) = self.volume_position.as_mut() {
                *position += n as u64;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.source.as_mut() {
            Some(source) => source.flush(),
            None => Ok(()),
        }
    }
}

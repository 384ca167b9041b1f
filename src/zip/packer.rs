//! Writing archives, optionally split into size-capped volumes.
//!
//! Each entry gets a provisional local header, then its data is compressed
//! through a [`ConcatStream`] that rolls to the next volume when the current
//! one reaches the size cap. Once the final sizes and CRC are known, the local
//! header is patched in place, reopening its volume if the data moved on.

use flate2::write::DeflateEncoder;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, info, warn};

use super::eocd::{EndOfCentralDirectory, Zip64Locator};
use super::header::{FileHeader, requires_zip64};
use super::progress::Progress;
use super::structures::*;
use crate::context::{OPTION_FORCE_ZIP64, PackStreamContext, SourceFile, VolumeWrite};
use crate::error::{Result, ZipError};
use crate::io::{ConcatStream, CrcStream, VolumeRollover};

/// Copy buffer size for entry data.
const CHUNK_SIZE: usize = 4096;

/// Outcome of a pack operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackSummary {
    /// Entries written to the central directory
    pub files: u64,
    /// Number of volumes the archive occupies
    pub volumes: u32,
    /// Uncompressed bytes of all entries
    pub total_bytes: u64,
    /// Whether the archive carries ZIP64 end records
    pub zip64: bool,
}

/// Per-call packing settings.
pub(crate) struct PackOptions<'o> {
    pub level: CompressionLevel,
    pub comment: &'o str,
    /// Volume size cap in bytes, 0 for a single unlimited volume
    pub max_archive_size: u64,
}

/// State of one pack operation.
pub(crate) struct PackSession<'a, C: PackStreamContext + ?Sized> {
    context: &'a mut C,
    progress: Progress<'a>,
    level: CompressionLevel,
    comment: &'a str,
    max_archive_size: u64,
    force_zip64: bool,
    volume: u32,
    volume_name: String,
    stream: Option<Box<dyn VolumeWrite>>,
    headers: Vec<FileHeader>,
}

/// Rolls the session over to its next volume while entry data is written.
struct PackRollover<'s, 'a, C: PackStreamContext + ?Sized>(&'s mut PackSession<'a, C>);

impl<C: PackStreamContext + ?Sized> VolumeRollover<Box<dyn VolumeWrite>>
    for PackRollover<'_, '_, C>
{
    fn next_volume(
        &mut self,
        exhausted: Option<Box<dyn VolumeWrite>>,
    ) -> io::Result<Box<dyn VolumeWrite>> {
        self.0.next_volume(exhausted).map_err(ZipError::into_io)
    }
}

/// Compressor for one entry.
enum EntryWriter<W: Write> {
    Store(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> EntryWriter<W> {
    fn new(inner: W, level: CompressionLevel) -> Self {
        match level.method() {
            CompressionMethod::Deflate => Self::Deflate(DeflateEncoder::new(inner, level.to_flate2())),
            _ => Self::Store(inner),
        }
    }

    fn get_mut(&mut self) -> &mut W {
        match self {
            Self::Store(inner) => inner,
            Self::Deflate(encoder) => encoder.get_mut(),
        }
    }

    /// Write out everything still buffered.
    fn try_finish(&mut self) -> io::Result<()> {
        match self {
            Self::Store(inner) => inner.flush(),
            Self::Deflate(encoder) => encoder.try_finish(),
        }
    }

    /// The inner writer; call after [`EntryWriter::try_finish`].
    fn into_inner(self) -> io::Result<W> {
        match self {
            Self::Store(inner) => Ok(inner),
            Self::Deflate(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for EntryWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Store(inner) => inner.write(buf),
            Self::Deflate(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Store(inner) => inner.flush(),
            Self::Deflate(encoder) => encoder.flush(),
        }
    }
}

/// Copy exactly `length` bytes from `source` and finish the compressor.
fn copy_entry<R, C>(
    source: &mut R,
    writer: &mut EntryWriter<ConcatStream<Box<dyn VolumeWrite>, PackRollover<'_, '_, C>>>,
    length: u64,
) -> io::Result<()>
where
    R: Read,
    C: PackStreamContext + ?Sized,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = length;
    while remaining > 0 {
        let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
        source.read_exact(&mut buf[..chunk])?;
        writer.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
        writer.get_mut().rollover_mut().0.progress.advance(chunk as u64);
    }
    writer.try_finish()
}

impl<'a, C: PackStreamContext + ?Sized> PackSession<'a, C> {
    pub(crate) fn new(
        context: &'a mut C,
        progress: Progress<'a>,
        options: PackOptions<'a>,
    ) -> Self {
        let force_zip64 = context.option(OPTION_FORCE_ZIP64).unwrap_or(false);
        Self {
            context,
            progress,
            level: options.level,
            comment: options.comment,
            max_archive_size: options.max_archive_size,
            force_zip64,
            volume: 0,
            volume_name: String::new(),
            stream: None,
            headers: Vec::new(),
        }
    }

    /// Pack `files` and finish the archive.
    pub(crate) fn run<S: AsRef<str>>(mut self, files: &[S]) -> Result<PackSummary> {
        let (total_files, total_bytes) = self.count_sources(files)?;
        self.progress.set_totals(total_files, total_bytes);

        let name = self
            .context
            .archive_name(0)
            .ok_or_else(|| ZipError::VolumeUnavailable("no name for archive volume 0".into()))?;
        let stream = self
            .context
            .open_archive_write(0, &name, true)?
            .ok_or_else(|| ZipError::VolumeUnavailable(name.clone()))?;
        info!("Creating archive {name}");
        self.volume_name = name;
        self.stream = Some(stream);
        self.progress.start_archive(0);

        let zip64 = match self.write_entries(files, total_files) {
            Ok(zip64) => zip64,
            Err(e) => {
                self.abandon_volume();
                return Err(e);
            }
        };

        let stream = self.take_stream()?;
        self.context
            .close_archive_write(self.volume, &self.volume_name, stream)?;
        self.progress.finish_archive();
        info!(
            "Wrote {} entries to {} volume(s)",
            self.headers.len(),
            self.volume + 1
        );

        Ok(PackSummary {
            files: self.headers.len() as u64,
            volumes: self.volume + 1,
            total_bytes: self.headers.iter().map(|h| h.uncompressed_size).sum(),
            zip64,
        })
    }

    fn write_entries<S: AsRef<str>>(&mut self, files: &[S], total_files: usize) -> Result<bool> {
        let mut number = 0;
        for file in files {
            if self.add_file(file.as_ref(), number)? {
                number += 1;
            }
        }
        self.write_central_directory(total_files)
    }

    /// Close whatever volume is still open after a failure.
    fn abandon_volume(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = self
                .context
                .close_archive_write(self.volume, &self.volume_name, stream)
            {
                warn!("Closing volume {} after failure: {e}", self.volume);
            }
        }
    }

    /// First pass: count the sources the context will supply.
    fn count_sources<S: AsRef<str>>(&mut self, files: &[S]) -> Result<(usize, u64)> {
        let mut count = 0;
        let mut bytes = 0;
        for file in files {
            let path = file.as_ref();
            if let Some(source) = self.context.open_file_read(path)? {
                count += 1;
                bytes += source.length;
                self.context.close_file_read(path, source.stream)?;
            }
        }
        Ok((count, bytes))
    }

    fn current_stream(&mut self) -> Result<&mut Box<dyn VolumeWrite>> {
        self.stream
            .as_mut()
            .ok_or_else(|| ZipError::VolumeUnavailable(format!("volume {} is not open", self.volume)))
    }

    fn take_stream(&mut self) -> Result<Box<dyn VolumeWrite>> {
        self.stream
            .take()
            .ok_or_else(|| ZipError::VolumeUnavailable(format!("volume {} is not open", self.volume)))
    }

    /// Close the current volume and open the next one.
    fn next_volume(&mut self, exhausted: Option<Box<dyn VolumeWrite>>) -> Result<Box<dyn VolumeWrite>> {
        if let Some(stream) = exhausted {
            self.context
                .close_archive_write(self.volume, &self.volume_name, stream)?;
        }
        self.progress.finish_archive();

        let next = self.volume + 1;
        let name = self
            .context
            .archive_name(next)
            .ok_or_else(|| ZipError::VolumeUnavailable(format!("no name for archive volume {next}")))?;

        debug!("Rolling over to volume {next}: {name}");
        let stream = self
            .context
            .open_archive_write(next, &name, true)?
            .ok_or_else(|| ZipError::VolumeUnavailable(name.clone()))?;
        self.volume = next;
        self.volume_name = name;
        self.progress.start_archive(next);
        Ok(stream)
    }

    /// Start a new volume unless `required` more bytes fit into the current
    /// one. An empty volume always takes the write.
    fn ensure_space(&mut self, required: u64) -> Result<()> {
        if self.max_archive_size == 0 {
            return Ok(());
        }
        let position = self.current_stream()?.stream_position()?;
        if position > 0 && self.max_archive_size.saturating_sub(position) < required {
            let exhausted = self.take_stream()?;
            self.stream = Some(self.next_volume(Some(exhausted))?);
        }
        Ok(())
    }

    /// Add one source; returns false if the context declined to open it.
    fn add_file(&mut self, path: &str, number: usize) -> Result<bool> {
        let Some(SourceFile {
            stream,
            length,
            attributes,
            last_write,
        }) = self.context.open_file_read(path)?
        else {
            debug!("Skipping {path}: source not available");
            return Ok(false);
        };

        let zip64 = self.force_zip64 || requires_zip64(length);
        let mut header = FileHeader::new(
            path,
            self.level.method(),
            DosDateTime::from_datetime(&last_write),
            attributes,
            length,
            zip64,
        );
        self.progress.start_file(path, number, length);

        // Provisional local header, never split across volumes
        self.ensure_space(header.size(false) as u64)?;
        let header_volume = self.volume;
        let header_offset = {
            let stream = self.current_stream()?;
            let offset = stream.stream_position()?;
            header.write(stream.as_mut(), false)?;
            offset
        };

        let mut source = CrcStream::new(stream);
        let compressed = self.compress(&mut source, length);
        let crc = source.crc();
        self.context.close_file_read(path, source.into_inner())?;
        let compressed = compressed?;

        header.update(compressed, length, crc, header_offset, header_volume);
        self.patch_local_header(&header)?;
        debug!(
            "Added {path}: {length} -> {compressed} bytes, crc {crc:08X}, volume {header_volume}"
        );

        self.progress.finish_file();
        self.headers.push(header);
        Ok(true)
    }

    /// Compress exactly `length` bytes of `source` into the archive and
    /// return the number of bytes written.
    fn compress<R: Read>(&mut self, source: &mut R, length: u64) -> Result<u64> {
        let level = self.level;
        let max_archive_size = self.max_archive_size;
        let volume = self.stream.take();

        let mut concat = ConcatStream::new(volume, PackRollover(self));
        if max_archive_size > 0 {
            concat.set_length(max_archive_size);
        }
        let mut writer = EntryWriter::new(concat, level);

        if let Err(e) = copy_entry(source, &mut writer, length) {
            // Keep the volume for closing; the dropped encoder must not reach it
            let volume = writer.get_mut().detach();
            drop(writer);
            self.stream = volume;
            return Err(e.into());
        }

        let concat = writer.into_inner()?;
        let compressed = concat.position();
        let volume = concat.into_parts().0;
        self.stream = volume;
        Ok(compressed)
    }

    /// Rewrite the local header of `header` with its final values.
    fn patch_local_header(&mut self, header: &FileHeader) -> Result<()> {
        let offset = header.local_header_offset;
        let volume = header.disk_start;

        if volume == self.volume {
            let stream = self.current_stream()?;
            let end = stream.stream_position()?;
            stream.seek(SeekFrom::Start(offset))?;
            header.write(stream.as_mut(), false)?;
            stream.seek(SeekFrom::Start(end))?;
            return Ok(());
        }

        debug!("Patching header of {} on volume {volume}", header.name);
        let name = self
            .context
            .archive_name(volume)
            .ok_or_else(|| ZipError::VolumeUnavailable(format!("no name for archive volume {volume}")))?;
        let mut stream = self
            .context
            .open_archive_write(volume, &name, false)?
            .ok_or_else(|| ZipError::VolumeUnavailable(name.clone()))?;
        let patched = stream
            .seek(SeekFrom::Start(offset))
            .and_then(|_| header.write(stream.as_mut(), false));
        self.context.close_archive_write(volume, &name, stream)?;
        Ok(patched?)
    }

    /// Write the central directory and end records; returns whether the
    /// archive needed ZIP64 records.
    fn write_central_directory(&mut self, total_files: usize) -> Result<bool> {
        let headers = std::mem::take(&mut self.headers);

        let mut start: Option<(u32, u64)> = None;
        let mut dir_size = 0u64;
        let mut entries_on_disk = 0u64;
        for header in &headers {
            let size = header.size(true) as u64;
            let before = self.volume;
            self.ensure_space(size)?;
            if self.volume != before {
                entries_on_disk = 0;
            }
            let volume = self.volume;
            let stream = self.current_stream()?;
            if start.is_none() {
                start = Some((volume, stream.stream_position()?));
            }
            header.write(stream.as_mut(), true)?;
            dir_size += size;
            entries_on_disk += 1;
        }

        let mut eocd = EndOfCentralDirectory {
            disk_number: self.volume,
            dir_start_disk: 0,
            entries_on_disk,
            total_entries: headers.len() as u64,
            dir_size,
            dir_offset: 0,
            comment: self.comment.to_string(),
            zip64: false,
        };
        let (dir_start_disk, dir_offset) = match start {
            Some(start) => start,
            None => {
                let volume = self.volume;
                (volume, self.current_stream()?.stream_position()?)
            }
        };
        eocd.dir_start_disk = dir_start_disk;
        eocd.dir_offset = dir_offset;

        let mut zip64 = self.force_zip64
            || total_files > U16_SENTINEL as usize
            || headers.iter().any(FileHeader::central_zip64)
            || eocd.requires_zip64();

        // The end records stay together on one volume
        let mut trailer = eocd.size() as u64;
        if zip64 {
            trailer += (EOCD64_SIZE + EOCD64_LOCATOR_SIZE) as u64;
        }
        let before = self.volume;
        self.ensure_space(trailer)?;
        if self.volume != before {
            eocd.disk_number = self.volume;
            eocd.entries_on_disk = 0;
            zip64 |= eocd.requires_zip64();
        }

        let volume = self.volume;
        let stream = self.current_stream()?;
        if zip64 {
            let eocd64_offset = stream.stream_position()?;
            eocd.write_zip64(stream.as_mut())?;
            Zip64Locator {
                disk_with_eocd64: volume,
                eocd64_offset,
                total_disks: volume + 1,
            }
            .write(stream.as_mut())?;
            eocd.zip64 = true;
        }
        eocd.write(stream.as_mut())?;

        self.headers = headers;
        Ok(zip64)
    }
}

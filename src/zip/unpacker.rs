//! Reading archives, possibly split across several volumes.
//!
//! The volume holding the end of central directory record is found by
//! opening volumes in order. The central directory is then read through a
//! [`ConcatStream`] starting at its recorded volume and offset, and every
//! selected entry is decompressed the same way, so entries and directories
//! may freely cross volume boundaries.

use flate2::read::DeflateDecoder;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, info};

use super::eocd::{
    EndOfCentralDirectory, Zip64EndOfCentralDirectory, find_end_of_central_directory,
    read_zip64_locator,
};
use super::header::{FileHeader, HeaderRead, paths_equal};
use super::progress::Progress;
use super::structures::CompressionMethod;
use crate::context::{UnpackStreamContext, VolumeRead};
use crate::error::{Result, ZipError};
use crate::io::{ConcatStream, CrcStream, VolumeRollover};

/// Copy buffer size for entry data.
const CHUNK_SIZE: usize = 4096;

/// Parsed central directory of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralDirectory {
    /// Central headers in directory order, directories included
    pub entries: Vec<FileHeader>,
    pub eocd: EndOfCentralDirectory,
}

/// Outcome of an unpack operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpackSummary {
    /// Entries written through the context
    pub extracted: u64,
    /// Selected entries that were not written (declined by the context or
    /// using an unsupported compression method)
    pub skipped: u64,
    /// Uncompressed bytes written
    pub bytes: u64,
}

/// State of one unpack operation.
pub(crate) struct UnpackSession<'a, C: UnpackStreamContext + ?Sized> {
    context: &'a mut C,
    progress: Progress<'a>,
    volume: u32,
    stream: Option<Box<dyn VolumeRead>>,
}

/// Moves the session on to the following volume when a read runs dry.
struct UnpackRollover<'s, 'a, C: UnpackStreamContext + ?Sized>(&'s mut UnpackSession<'a, C>);

impl<C: UnpackStreamContext + ?Sized> VolumeRollover<Box<dyn VolumeRead>>
    for UnpackRollover<'_, '_, C>
{
    fn next_volume(
        &mut self,
        exhausted: Option<Box<dyn VolumeRead>>,
    ) -> io::Result<Box<dyn VolumeRead>> {
        self.0.next_volume(exhausted).map_err(ZipError::into_io)
    }
}

/// Decompressor for one entry.
enum EntryReader<R: Read> {
    Store(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> EntryReader<R> {
    fn get_mut(&mut self) -> &mut R {
        match self {
            Self::Store(inner) => inner,
            Self::Deflate(decoder) => decoder.get_mut(),
        }
    }

    fn into_inner(self) -> R {
        match self {
            Self::Store(inner) => inner,
            Self::Deflate(decoder) => decoder.into_inner(),
        }
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Store(inner) => inner.read(buf),
            Self::Deflate(decoder) => decoder.read(buf),
        }
    }
}

impl<'a, C: UnpackStreamContext + ?Sized> UnpackSession<'a, C> {
    pub(crate) fn new(context: &'a mut C, progress: Progress<'a>) -> Self {
        Self {
            context,
            progress,
            volume: 0,
            stream: None,
        }
    }

    /// Read the central directory and release all volumes.
    pub(crate) fn read_directory(mut self) -> Result<CentralDirectory> {
        let result = self.load_directory();
        self.close_volume()?;
        result
    }

    /// Extract the entries accepted by `filter` (all when `None`).
    pub(crate) fn run(mut self, filter: Option<&dyn Fn(&str) -> bool>) -> Result<UnpackSummary> {
        let result = self.extract_all(filter);
        let closed = self.close_volume();
        let summary = result?;
        closed?;

        self.progress.finish_archive();
        info!("Extracted {} entries, skipped {}", summary.extracted, summary.skipped);
        Ok(summary)
    }

    fn extract_all(&mut self, filter: Option<&dyn Fn(&str) -> bool>) -> Result<UnpackSummary> {
        let directory = self.load_directory()?;

        let selected: Vec<&FileHeader> = directory
            .entries
            .iter()
            .filter(|header| !header.is_directory())
            .filter(|header| filter.is_none_or(|accept| accept(&header.name)))
            .collect();
        let total_bytes = selected.iter().map(|h| h.uncompressed_size).sum();
        self.progress.set_totals(selected.len(), total_bytes);
        self.progress.start_archive(self.volume);

        let mut summary = UnpackSummary::default();
        for (number, header) in selected.iter().enumerate() {
            if self.extract_entry(header, number)? {
                summary.extracted += 1;
                summary.bytes += header.uncompressed_size;
            } else {
                summary.skipped += 1;
            }
        }
        Ok(summary)
    }

    fn close_volume(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.context.close_archive_read(self.volume, stream)?;
        }
        Ok(())
    }

    /// Make `volume` the current volume.
    fn switch_volume(&mut self, volume: u32) -> Result<()> {
        if self.stream.is_some() && self.volume == volume {
            return Ok(());
        }
        self.close_volume()?;

        let stream = self.open_volume(volume)?;
        self.volume = volume;
        self.stream = Some(stream);
        Ok(())
    }

    /// Open `volume`. A missing volume other than 0 falls back to volume 0,
    /// which serves archives that were never split.
    fn open_volume(&mut self, volume: u32) -> Result<Box<dyn VolumeRead>> {
        match self.context.open_archive_read(volume)? {
            Some(stream) => Ok(stream),
            None if volume > 0 => {
                debug!("Volume {volume} not available, falling back to volume 0");
                self.context
                    .open_archive_read(0)?
                    .ok_or_else(|| ZipError::VolumeUnavailable(format!("archive volume {volume}")))
            }
            None => Err(ZipError::VolumeUnavailable("archive volume 0".into())),
        }
    }

    /// Close the exhausted volume and open the one after it.
    fn next_volume(&mut self, exhausted: Option<Box<dyn VolumeRead>>) -> Result<Box<dyn VolumeRead>> {
        if let Some(stream) = exhausted {
            self.context.close_archive_read(self.volume, stream)?;
        }
        self.progress.finish_archive();

        let next = self.volume + 1;
        debug!("Continuing on volume {next}");
        let stream = self.open_volume(next)?;
        self.volume = next;
        self.progress.start_archive(next);
        Ok(stream)
    }

    /// Find the volume with the end records; it is left open as the current
    /// volume.
    fn find_end_records(&mut self) -> Result<EndOfCentralDirectory> {
        let mut volume = 0;
        loop {
            let Some(mut stream) = self.context.open_archive_read(volume)? else {
                return Err(ZipError::format(
                    "end of central directory record not found",
                ));
            };

            if let Some((mut eocd, offset)) = find_end_of_central_directory(stream.as_mut())? {
                if let Some(locator) = read_zip64_locator(stream.as_mut(), offset)? {
                    let record = if locator.disk_with_eocd64 == volume {
                        Zip64EndOfCentralDirectory::read_at(stream.as_mut(), locator.eocd64_offset)?
                    } else {
                        self.read_remote_zip64(locator.disk_with_eocd64, locator.eocd64_offset)?
                    };
                    eocd.apply_zip64(&record);
                } else if eocd.has_sentinels() {
                    debug!("Volume {volume}: ZIP64 sentinels without locator, using classic values");
                }

                if eocd.disk_number == volume {
                    debug!(
                        "Central directory: {} entries, volume {} offset {}",
                        eocd.total_entries, eocd.dir_start_disk, eocd.dir_offset
                    );
                    self.volume = volume;
                    self.stream = Some(stream);
                    return Ok(eocd);
                }
            }

            self.context.close_archive_read(volume, stream)?;
            volume += 1;
        }
    }

    fn read_remote_zip64(&mut self, volume: u32, offset: u64) -> Result<Zip64EndOfCentralDirectory> {
        let mut stream = self
            .context
            .open_archive_read(volume)?
            .ok_or_else(|| ZipError::VolumeUnavailable(format!("archive volume {volume}")))?;
        let record = Zip64EndOfCentralDirectory::read_at(stream.as_mut(), offset);
        self.context.close_archive_read(volume, stream)?;
        record
    }

    fn load_directory(&mut self) -> Result<CentralDirectory> {
        let eocd = self.find_end_records()?;

        let mut entries = Vec::with_capacity(eocd.total_entries.min(u16::MAX as u64) as usize);
        if eocd.dir_size == 0 || eocd.total_entries == 0 {
            return Ok(CentralDirectory { entries, eocd });
        }

        self.switch_volume(eocd.dir_start_disk)?;
        let volume = self.volume;
        self.stream
            .as_mut()
            .ok_or_else(|| ZipError::VolumeUnavailable(format!("archive volume {volume}")))?
            .seek(SeekFrom::Start(eocd.dir_offset))?;

        let stream = self.stream.take();
        let mut concat = ConcatStream::new(stream, UnpackRollover(self));
        concat.set_length(eocd.dir_size);
        let read = read_central_headers(&mut concat, eocd.total_entries, &mut entries);
        let volume = concat.into_parts().0;
        self.stream = volume;
        read?;

        Ok(CentralDirectory { entries, eocd })
    }

    /// Extract one entry; returns false if it was skipped.
    fn extract_entry(&mut self, header: &FileHeader, number: usize) -> Result<bool> {
        if !header.method.is_supported() {
            debug!(
                "Skipping {}: unsupported compression method {}",
                header.name,
                header.method.as_u16()
            );
            return Ok(false);
        }

        self.switch_volume(header.disk_start)?;
        let not_readable = || ZipError::format(format!("Could not read file: {}", header.name));
        let stream = self.stream.as_mut().ok_or_else(not_readable)?;
        stream.seek(SeekFrom::Start(header.local_header_offset))?;
        match FileHeader::read(stream.as_mut(), false)? {
            HeaderRead::Found(local) if paths_equal(&local.name, &header.name) => {}
            _ => return Err(not_readable()),
        }

        let last_write = header.modified.to_datetime();
        let Some(destination) =
            self.context
                .open_file_write(&header.name, header.uncompressed_size, last_write)?
        else {
            debug!("Skipping {}: declined by context", header.name);
            return Ok(false);
        };
        self.progress
            .start_file(&header.name, number, header.uncompressed_size);

        let mut destination = CrcStream::new(destination);
        self.decompress(header, &mut destination)?;
        let actual = destination.crc();
        self.context.close_file_write(
            &header.name,
            destination.into_inner(),
            header.external_attributes,
            last_write,
        )?;

        if actual != header.crc32 {
            return Err(ZipError::ChecksumMismatch {
                name: header.name.clone(),
                expected: header.crc32,
                actual,
            });
        }
        debug!("Extracted {} ({} bytes)", header.name, header.uncompressed_size);
        self.progress.finish_file();
        Ok(true)
    }

    /// Write exactly the uncompressed bytes of `header` into `destination`.
    fn decompress<W: Write>(&mut self, header: &FileHeader, destination: &mut W) -> Result<()> {
        let volume = self.stream.take();
        let mut concat = ConcatStream::new(volume, UnpackRollover(self));
        concat.set_length(header.compressed_size);
        let mut reader = match header.method {
            CompressionMethod::Deflate => EntryReader::Deflate(DeflateDecoder::new(concat)),
            _ => EntryReader::Store(concat),
        };

        let copied = copy_entry(&mut reader, header, destination);
        let volume = reader.into_inner().into_parts().0;
        self.stream = volume;
        copied
    }
}

fn read_central_headers<R: Read>(reader: &mut R, total: u64, entries: &mut Vec<FileHeader>) -> Result<()> {
    for index in 0..total {
        match FileHeader::read(&mut *reader, true)? {
            HeaderRead::Found(header) => entries.push(header),
            HeaderRead::NotFound => {
                return Err(ZipError::format(format!(
                    "central directory entry {index} not found"
                )));
            }
            HeaderRead::Malformed(reason) => {
                return Err(ZipError::format(format!(
                    "central directory entry {index}: {reason}"
                )));
            }
        }
    }
    Ok(())
}

/// Copy the uncompressed bytes of `header` from `reader` into `destination`.
fn copy_entry<W, C>(
    reader: &mut EntryReader<ConcatStream<Box<dyn VolumeRead>, UnpackRollover<'_, '_, C>>>,
    header: &FileHeader,
    destination: &mut W,
) -> Result<()>
where
    W: Write,
    C: UnpackStreamContext + ?Sized,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = header.uncompressed_size;
    while remaining > 0 {
        let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..chunk])?;
        if n == 0 {
            return Err(ZipError::format(format!(
                "unexpected end of data in {} ({} of {} bytes)",
                header.name,
                header.uncompressed_size - remaining,
                header.uncompressed_size
            )));
        }
        destination.write_all(&buf[..n])?;
        remaining -= n as u64;
        reader.get_mut().rollover_mut().0.progress.advance(n as u64);
    }
    Ok(())
}

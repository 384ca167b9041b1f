//! End of central directory records.
//!
//! An archive ends with the classic EOCD record. When anything in it would
//! overflow, the classic record carries sentinels and the real values sit in
//! a ZIP64 EOCD record, found through the locator written right before the
//! classic record.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{Result, ZipError};

use super::cp437;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Size of the ZIP64 EOCD record, not counting the leading 12 bytes.
const EOCD64_RECORD_SIZE: u64 = (EOCD64_SIZE - 12) as u64;

/// End of Central Directory, with ZIP64 values merged in when present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u32,
    pub dir_start_disk: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub dir_size: u64,
    pub dir_offset: u64,
    pub comment: String,
    /// Write (or was read with) a ZIP64 record
    pub zip64: bool,
}

impl EndOfCentralDirectory {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < EOCD_SIZE {
            return Err(ZipError::format("Invalid End of Central Directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != EOCD_SIGNATURE {
            return Err(ZipError::format("Invalid End of Central Directory"));
        }

        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let dir_start_disk = cursor.read_u16::<LittleEndian>()?;
        let entries_on_disk = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let dir_size = cursor.read_u32::<LittleEndian>()?;
        let dir_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;

        let comment_end = (EOCD_SIZE + comment_len).min(data.len());
        Ok(Self {
            disk_number: disk_number as u32,
            dir_start_disk: dir_start_disk as u32,
            entries_on_disk: entries_on_disk as u64,
            total_entries: total_entries as u64,
            dir_size: dir_size as u64,
            dir_offset: dir_offset as u64,
            comment: decode_comment(&data[EOCD_SIZE..comment_end]),
            zip64: false,
        })
    }

    /// Whether any classic field holds a sentinel.
    pub fn has_sentinels(&self) -> bool {
        self.disk_number == U16_SENTINEL as u32
            || self.dir_start_disk == U16_SENTINEL as u32
            || self.entries_on_disk == U16_SENTINEL as u64
            || self.total_entries == U16_SENTINEL as u64
            || self.dir_size == U32_SENTINEL as u64
            || self.dir_offset == U32_SENTINEL as u64
    }

    /// Whether any value overflows its classic field.
    pub fn requires_zip64(&self) -> bool {
        self.disk_number >= U16_SENTINEL as u32
            || self.dir_start_disk >= U16_SENTINEL as u32
            || self.total_entries > U16_SENTINEL as u64
            || self.dir_size >= U32_SENTINEL as u64
            || self.dir_offset >= U32_SENTINEL as u64
    }

    /// Take the 64-bit values from a ZIP64 record.
    pub fn apply_zip64(&mut self, record: &Zip64EndOfCentralDirectory) {
        self.disk_number = record.disk_number;
        self.dir_start_disk = record.dir_start_disk;
        self.entries_on_disk = record.entries_on_disk;
        self.total_entries = record.total_entries;
        self.dir_size = record.dir_size;
        self.dir_offset = record.dir_offset;
        self.zip64 = true;
    }

    pub fn size(&self) -> usize {
        EOCD_SIZE + self.comment.len()
    }

    /// Write the classic record; every field is a sentinel when `zip64`.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let comment = self.comment.as_bytes();
        let comment_len = u16::try_from(comment.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "archive comment is too long")
        })?;

        let mut buf = Vec::with_capacity(self.size());
        buf.write_u32::<LittleEndian>(EOCD_SIGNATURE)?;
        if self.zip64 {
            buf.write_u16::<LittleEndian>(U16_SENTINEL)?;
            buf.write_u16::<LittleEndian>(U16_SENTINEL)?;
            buf.write_u16::<LittleEndian>(U16_SENTINEL)?;
            buf.write_u16::<LittleEndian>(U16_SENTINEL)?;
            buf.write_u32::<LittleEndian>(U32_SENTINEL)?;
            buf.write_u32::<LittleEndian>(U32_SENTINEL)?;
        } else {
            buf.write_u16::<LittleEndian>(self.disk_number as u16)?;
            buf.write_u16::<LittleEndian>(self.dir_start_disk as u16)?;
            buf.write_u16::<LittleEndian>(self.entries_on_disk as u16)?;
            buf.write_u16::<LittleEndian>(self.total_entries as u16)?;
            buf.write_u32::<LittleEndian>(self.dir_size as u32)?;
            buf.write_u32::<LittleEndian>(self.dir_offset as u32)?;
        }
        buf.write_u16::<LittleEndian>(comment_len)?;
        buf.extend_from_slice(comment);
        writer.write_all(&buf)
    }

    /// Write the ZIP64 EOCD record.
    pub fn write_zip64<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(EOCD64_SIZE);
        buf.write_u32::<LittleEndian>(EOCD64_SIGNATURE)?;
        buf.write_u64::<LittleEndian>(EOCD64_RECORD_SIZE)?;
        buf.write_u16::<LittleEndian>(VERSION_ZIP64)?;
        buf.write_u16::<LittleEndian>(VERSION_ZIP64)?;
        buf.write_u32::<LittleEndian>(self.disk_number)?;
        buf.write_u32::<LittleEndian>(self.dir_start_disk)?;
        buf.write_u64::<LittleEndian>(self.entries_on_disk)?;
        buf.write_u64::<LittleEndian>(self.total_entries)?;
        buf.write_u64::<LittleEndian>(self.dir_size)?;
        buf.write_u64::<LittleEndian>(self.dir_offset)?;
        writer.write_all(&buf)
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Locator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64Locator {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < EOCD64_LOCATOR_SIZE {
            return Err(ZipError::format("Invalid ZIP64 format"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != EOCD64_LOCATOR_SIGNATURE {
            return Err(ZipError::format("Invalid ZIP64 format"));
        }

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(EOCD64_LOCATOR_SIZE);
        buf.write_u32::<LittleEndian>(EOCD64_LOCATOR_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        buf.write_u64::<LittleEndian>(self.eocd64_offset)?;
        buf.write_u32::<LittleEndian>(self.total_disks)?;
        writer.write_all(&buf)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub record_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub dir_start_disk: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub dir_size: u64,
    pub dir_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < EOCD64_SIZE {
            return Err(ZipError::format("Invalid ZIP64 format"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != EOCD64_SIGNATURE {
            return Err(ZipError::format("Invalid ZIP64 format"));
        }

        Ok(Self {
            record_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            dir_start_disk: cursor.read_u32::<LittleEndian>()?,
            entries_on_disk: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            dir_size: cursor.read_u64::<LittleEndian>()?,
            dir_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    /// Read the record at `offset`.
    pub fn read_at<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<Self> {
        let mut buf = [0u8; EOCD64_SIZE];
        reader.seek(SeekFrom::Start(offset))?;
        reader
            .read_exact(&mut buf)
            .map_err(|_| ZipError::format("Missing or invalid ZIP64 end of central directory"))?;
        Self::from_bytes(&buf)
    }
}

/// Find and parse the classic End of Central Directory record of a volume.
///
/// The EOCD is located at the end of the volume. The simple case (no
/// comment) is checked first; otherwise the tail is searched backwards for a
/// signature whose comment length reaches exactly to the end.
///
/// Returns the record and its offset, or `None` if the volume has none.
pub fn find_end_of_central_directory<R: Read + Seek + ?Sized>(
    reader: &mut R,
) -> Result<Option<(EndOfCentralDirectory, u64)>> {
    let size = reader.seek(SeekFrom::End(0))?;
    if size < EOCD_SIZE as u64 {
        return Ok(None);
    }

    // Optimization: First try the simple case where there's no comment.
    let offset = size - EOCD_SIZE as u64;
    let mut buf = [0u8; EOCD_SIZE];
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut buf)?;
    if buf[0..4] == EOCD_SIGNATURE.to_le_bytes() && buf[20..22] == [0, 0] {
        return Ok(Some((EndOfCentralDirectory::from_bytes(&buf)?, offset)));
    }

    // EOCD not at expected location - it could be earlier if there's a ZIP
    // comment, so search backwards from the end of the volume.
    let search_size = (MAX_COMMENT_SIZE + EOCD_SIZE as u64).min(size);
    let search_start = size - search_size;

    let mut buf = vec![0u8; search_size as usize];
    reader.seek(SeekFrom::Start(search_start))?;
    reader.read_exact(&mut buf)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    for i in (0..buf.len().saturating_sub(EOCD_SIZE)).rev() {
        if buf[i..i + 4] == signature {
            // The comment length field should match the remaining bytes.
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

            if comment_len == buf.len() - i - EOCD_SIZE {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..])?;
                return Ok(Some((eocd, search_start + i as u64)));
            }
        }
    }

    Ok(None)
}

/// Read the ZIP64 locator right before the classic EOCD, if there is one.
pub fn read_zip64_locator<R: Read + Seek + ?Sized>(
    reader: &mut R,
    eocd_offset: u64,
) -> Result<Option<Zip64Locator>> {
    let Some(locator_offset) = eocd_offset.checked_sub(EOCD64_LOCATOR_SIZE as u64) else {
        return Ok(None);
    };
    let mut buf = [0u8; EOCD64_LOCATOR_SIZE];
    reader.seek(SeekFrom::Start(locator_offset))?;
    reader.read_exact(&mut buf)?;
    if buf[0..4] != EOCD64_LOCATOR_SIGNATURE.to_le_bytes() {
        return Ok(None);
    }
    Zip64Locator::from_bytes(&buf).map(Some)
}

/// The end record has no UTF-8 flag: a comment that is valid UTF-8 is read
/// as such, anything else as CP437.
fn decode_comment(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => cp437::decode(bytes),
    }
}

//! Local and central file headers.
//!
//! Both representations share [`FileHeader`]; the `central` flag passed to
//! [`FileHeader::read`] and [`FileHeader::write`] selects the layout. Sizes,
//! offsets and the start volume are always held as their true 64/32-bit
//! values; the native fields only see sentinels when the header is written
//! in ZIP64 form.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use super::cp437;
use super::structures::*;

/// One extra field other than the ZIP64 field, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraField {
    pub id: u16,
    pub data: Vec<u8>,
}

/// Outcome of [`FileHeader::read`].
#[derive(Debug)]
pub enum HeaderRead {
    Found(FileHeader),
    /// Not enough bytes left, or a different signature: the caller has
    /// reached the end of whatever it was scanning.
    NotFound,
    /// The signature matched but the variable-length part is unusable.
    Malformed(&'static str),
}

/// Per-entry metadata shared by local and central headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Volume holding the local header
    pub disk_start: u32,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u64,
    pub name: String,
    pub extra_fields: Vec<ExtraField>,
    pub comment: String,
    /// Write the local header in ZIP64 form. Decided once, before the
    /// provisional header is written, so the back-patched header has the
    /// same size.
    pub zip64: bool,
}

/// Whether a file of `length` bytes overflows the 32-bit size fields.
pub fn requires_zip64(length: u64) -> bool {
    length > u32::MAX as u64
}

/// Compare entry names, treating `\` and `/` as the same separator.
pub fn paths_equal(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.chars()
            .zip(b.chars())
            .all(|(x, y)| x == y || (matches!(x, '/' | '\\') && matches!(y, '/' | '\\')))
}

/// Encode a name or comment; non-ASCII text goes out as UTF-8.
fn encode_text(text: &str) -> (&[u8], bool) {
    (text.as_bytes(), !text.is_ascii())
}

fn decode_text(bytes: &[u8], utf8: bool) -> String {
    if utf8 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        cp437::decode(bytes)
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn length_u16(len: usize, what: &str) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{what} is too long ({len} bytes)"),
        )
    })
}

impl FileHeader {
    pub fn new(
        name: impl Into<String>,
        method: CompressionMethod,
        modified: DosDateTime,
        external_attributes: u32,
        uncompressed_size: u64,
        zip64: bool,
    ) -> Self {
        Self {
            version_made_by: VERSION_ZIP64,
            version_needed: if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT },
            flags: 0,
            method,
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size,
            disk_start: 0,
            internal_attributes: 0,
            external_attributes,
            local_header_offset: 0,
            name: name.into(),
            extra_fields: Vec::new(),
            comment: String::new(),
            zip64,
        }
    }

    /// Record the final sizes, checksum and location of the entry.
    pub fn update(
        &mut self,
        compressed_size: u64,
        uncompressed_size: u64,
        crc32: u32,
        local_header_offset: u64,
        disk_start: u32,
    ) {
        self.compressed_size = compressed_size;
        self.uncompressed_size = uncompressed_size;
        self.crc32 = crc32;
        self.local_header_offset = local_header_offset;
        self.disk_start = disk_start;
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/') || self.external_attributes & ATTR_DIRECTORY != 0
    }

    /// Whether the central header needs the ZIP64 extra field.
    ///
    /// The central header can be promoted after the fact (say, a small file
    /// whose local header sits beyond 4 GiB); the local header cannot.
    pub fn central_zip64(&self) -> bool {
        self.zip64
            || requires_zip64(self.compressed_size)
            || requires_zip64(self.uncompressed_size)
            || requires_zip64(self.local_header_offset)
            || self.disk_start >= U16_SENTINEL as u32
    }

    fn uses_zip64(&self, central: bool) -> bool {
        if central { self.central_zip64() } else { self.zip64 }
    }

    fn extra_len(&self, central: bool) -> usize {
        let zip64 = if self.uses_zip64(central) {
            4 + ZIP64_EXTRA_SIZE as usize
        } else {
            0
        };
        zip64
            + self
                .extra_fields
                .iter()
                .map(|f| 4 + f.data.len())
                .sum::<usize>()
    }

    /// Serialized size of the header.
    pub fn size(&self, central: bool) -> usize {
        let fixed = if central { CDFH_MIN_SIZE } else { LFH_SIZE };
        let comment = if central { self.comment.len() } else { 0 };
        fixed + self.name.len() + self.extra_len(central) + comment
    }

    pub fn to_info(&self) -> ZipFileInfo {
        ZipFileInfo {
            name: self.name.clone(),
            volume: self.disk_start,
            attributes: self.external_attributes,
            last_write: self.modified.to_datetime(),
            length: self.uncompressed_size,
            compressed_length: self.compressed_size,
            method: self.method,
            crc32: self.crc32,
        }
    }

    /// Parse a header at the current stream position.
    ///
    /// Local headers may be preceded by a spanning marker, which is skipped.
    pub fn read<R: Read + ?Sized>(reader: &mut R, central: bool) -> io::Result<HeaderRead> {
        let mut sig = [0u8; 4];
        if !read_fully(reader, &mut sig)? {
            return Ok(HeaderRead::NotFound);
        }
        let mut signature = u32::from_le_bytes(sig);
        if !central && matches!(signature, SPANNING_SIGNATURE | SPANNING_TEMP_SIGNATURE) {
            if !read_fully(reader, &mut sig)? {
                return Ok(HeaderRead::NotFound);
            }
            signature = u32::from_le_bytes(sig);
        }
        let expected = if central { CDFH_SIGNATURE } else { LFH_SIGNATURE };
        if signature != expected {
            return Ok(HeaderRead::NotFound);
        }

        let fixed_len = if central { CDFH_MIN_SIZE } else { LFH_SIZE } - 4;
        let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
        if !read_fully(reader, &mut fixed[..fixed_len])? {
            return Ok(HeaderRead::NotFound);
        }
        let mut cursor = Cursor::new(&fixed[..fixed_len]);

        // Read fixed-size header fields
        let version_made_by = if central {
            cursor.read_u16::<LittleEndian>()?
        } else {
            0
        };
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let time = cursor.read_u16::<LittleEndian>()?;
        let date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let (comment_len, disk_start, internal_attributes, external_attributes, offset) =
            if central {
                (
                    cursor.read_u16::<LittleEndian>()? as usize,
                    cursor.read_u16::<LittleEndian>()?,
                    cursor.read_u16::<LittleEndian>()?,
                    cursor.read_u32::<LittleEndian>()?,
                    cursor.read_u32::<LittleEndian>()?,
                )
            } else {
                (0, 0, 0, 0, 0)
            };

        let mut variable = vec![0u8; name_len + extra_len + comment_len];
        if !read_fully(reader, &mut variable)? {
            return Ok(HeaderRead::Malformed("header truncated in name or extra field"));
        }
        let (name_bytes, rest) = variable.split_at(name_len);
        let (extra_bytes, comment_bytes) = rest.split_at(extra_len);

        let utf8 = flags & FLAG_UTF8 != 0;
        let mut header = FileHeader {
            version_made_by,
            version_needed,
            flags,
            method: CompressionMethod::from_u16(method),
            modified: DosDateTime::new(date, time),
            crc32,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            disk_start: disk_start as u32,
            internal_attributes,
            external_attributes,
            local_header_offset: offset as u64,
            name: decode_text(name_bytes, utf8),
            extra_fields: Vec::new(),
            comment: decode_text(comment_bytes, utf8),
            zip64: false,
        };

        match header.parse_extra(extra_bytes, central) {
            Ok(()) => Ok(HeaderRead::Found(header)),
            Err(_) => Ok(HeaderRead::Malformed("invalid extra field")),
        }
    }

    /// Split the extra field into ZIP64 information and verbatim fields.
    ///
    /// ZIP64 values appear only for native fields holding a sentinel, in the
    /// order uncompressed size, compressed size, offset, disk start.
    fn parse_extra(&mut self, extra: &[u8], central: bool) -> io::Result<()> {
        let mut cursor = Cursor::new(extra);
        while (cursor.position() as usize) + 4 <= extra.len() {
            let id = cursor.read_u16::<LittleEndian>()?;
            let size = cursor.read_u16::<LittleEndian>()? as usize;
            let start = cursor.position() as usize;
            let end = start + size;
            if end > extra.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "extra field overruns header",
                ));
            }

            if id == ZIP64_EXTRA_ID {
                self.zip64 = true;
                let mut field = Cursor::new(&extra[start..end]);
                let mut remaining = size;
                if self.uncompressed_size == U32_SENTINEL as u64 && remaining >= 8 {
                    self.uncompressed_size = field.read_u64::<LittleEndian>()?;
                    remaining -= 8;
                }
                if self.compressed_size == U32_SENTINEL as u64 && remaining >= 8 {
                    self.compressed_size = field.read_u64::<LittleEndian>()?;
                    remaining -= 8;
                }
                if central {
                    if self.local_header_offset == U32_SENTINEL as u64 && remaining >= 8 {
                        self.local_header_offset = field.read_u64::<LittleEndian>()?;
                        remaining -= 8;
                    }
                    if self.disk_start == U16_SENTINEL as u32 && remaining >= 4 {
                        self.disk_start = field.read_u32::<LittleEndian>()?;
                    }
                }
            } else {
                self.extra_fields.push(ExtraField {
                    id,
                    data: extra[start..end].to_vec(),
                });
            }
            cursor.set_position(end as u64);
        }
        Ok(())
    }

    /// Serialize the header at the current stream position.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W, central: bool) -> io::Result<()> {
        let zip64 = self.uses_zip64(central);
        if !zip64
            && (requires_zip64(self.compressed_size) || requires_zip64(self.uncompressed_size))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: size exceeds 4 GiB in a non-ZIP64 header", self.name),
            ));
        }

        let (name, name_utf8) = encode_text(&self.name);
        let (comment, comment_utf8) = if central {
            encode_text(&self.comment)
        } else {
            (&[][..], false)
        };
        let flags = if name_utf8 || comment_utf8 {
            self.flags | FLAG_UTF8
        } else {
            self.flags & !FLAG_UTF8
        };
        let version_needed = if zip64 {
            VERSION_ZIP64
        } else {
            self.version_needed
        };
        let (compressed, uncompressed) = if zip64 {
            (U32_SENTINEL, U32_SENTINEL)
        } else {
            (self.compressed_size as u32, self.uncompressed_size as u32)
        };

        let mut buf = Vec::with_capacity(self.size(central));
        buf.write_u32::<LittleEndian>(if central { CDFH_SIGNATURE } else { LFH_SIGNATURE })?;
        if central {
            buf.write_u16::<LittleEndian>(self.version_made_by)?;
        }
        buf.write_u16::<LittleEndian>(version_needed)?;
        buf.write_u16::<LittleEndian>(flags)?;
        buf.write_u16::<LittleEndian>(self.method.as_u16())?;
        buf.write_u16::<LittleEndian>(self.modified.time)?;
        buf.write_u16::<LittleEndian>(self.modified.date)?;
        buf.write_u32::<LittleEndian>(self.crc32)?;
        buf.write_u32::<LittleEndian>(compressed)?;
        buf.write_u32::<LittleEndian>(uncompressed)?;
        buf.write_u16::<LittleEndian>(length_u16(name.len(), "file name")?)?;
        buf.write_u16::<LittleEndian>(length_u16(self.extra_len(central), "extra field")?)?;
        if central {
            buf.write_u16::<LittleEndian>(length_u16(comment.len(), "file comment")?)?;
            if zip64 {
                buf.write_u16::<LittleEndian>(U16_SENTINEL)?;
            } else {
                buf.write_u16::<LittleEndian>(self.disk_start as u16)?;
            }
            buf.write_u16::<LittleEndian>(self.internal_attributes)?;
            buf.write_u32::<LittleEndian>(self.external_attributes)?;
            if zip64 {
                buf.write_u32::<LittleEndian>(U32_SENTINEL)?;
            } else {
                buf.write_u32::<LittleEndian>(self.local_header_offset as u32)?;
            }
        }
        buf.extend_from_slice(name);

        if zip64 {
            buf.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            buf.write_u16::<LittleEndian>(ZIP64_EXTRA_SIZE)?;
            buf.write_u64::<LittleEndian>(self.uncompressed_size)?;
            buf.write_u64::<LittleEndian>(self.compressed_size)?;
            buf.write_u64::<LittleEndian>(self.local_header_offset)?;
            buf.write_u32::<LittleEndian>(self.disk_start)?;
        }
        for field in &self.extra_fields {
            buf.write_u16::<LittleEndian>(field.id)?;
            buf.write_u16::<LittleEndian>(length_u16(field.data.len(), "extra field")?)?;
            buf.extend_from_slice(&field.data);
        }
        buf.extend_from_slice(comment);

        writer.write_all(&buf)
    }
}

use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use super::{
    PackStreamContext, SourceFile, UnpackStreamContext, VolumeRead, VolumeWrite, volume_name,
};
use crate::zip::{ATTR_ARCHIVE, DosDateTime};

/// Growable byte buffer with independent cursors over shared storage.
///
/// Cloning yields a new cursor at position 0 over the same bytes, so a
/// volume handed to the engine stays inspectable after it is closed.
#[derive(Debug, Default)]
pub struct SharedBuffer {
    data: Rc<RefCell<Vec<u8>>>,
    position: u64,
}

impl Clone for SharedBuffer {
    fn clone(&self) -> Self {
        Self {
            data: Rc::clone(&self.data),
            position: 0,
        }
    }
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
            position: 0,
        }
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the contents in place, visible through every clone.
    pub fn replace(&self, data: Vec<u8>) {
        *self.data.borrow_mut() = data;
    }
}

impl Read for SharedBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = (self.position as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.borrow_mut();
        let start = self.position as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => (self.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek position")
        })?;
        self.position = position;
        Ok(position)
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    attributes: u32,
    last_write: NaiveDateTime,
}

/// An extracted entry as received by [`MemoryContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub data: Vec<u8>,
    pub attributes: u32,
    pub last_write: Option<NaiveDateTime>,
}

/// Stream context keeping volumes, sources and extracted files in memory.
#[derive(Debug)]
pub struct MemoryContext {
    base_name: String,
    volumes: Vec<SharedBuffer>,
    max_volumes: Option<u32>,
    sources: BTreeMap<String, MemoryFile>,
    pending: BTreeMap<String, SharedBuffer>,
    extracted: BTreeMap<String, ExtractedFile>,
    options: HashMap<String, bool>,
    name_requests: Vec<u32>,
    read_requests: Vec<u32>,
    file_write_opens: usize,
    open_volume_reads: usize,
    open_volume_writes: usize,
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new("archive.zip")
    }
}

impl MemoryContext {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            volumes: Vec::new(),
            max_volumes: None,
            sources: BTreeMap::new(),
            pending: BTreeMap::new(),
            extracted: BTreeMap::new(),
            options: HashMap::new(),
            name_requests: Vec::new(),
            read_requests: Vec::new(),
            file_write_opens: 0,
            open_volume_reads: 0,
            open_volume_writes: 0,
        }
    }

    /// Wrap existing volume images for unpacking.
    pub fn from_volumes(volumes: Vec<Vec<u8>>) -> Self {
        let mut context = Self::default();
        context.volumes = volumes.into_iter().map(SharedBuffer::from_vec).collect();
        context
    }

    /// Add a source file for packing.
    pub fn add_file(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> &mut Self {
        let epoch = DosDateTime::EPOCH.to_datetime().unwrap_or_default();
        self.add_file_with(name, data, ATTR_ARCHIVE, epoch)
    }

    pub fn add_file_with(
        &mut self,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        attributes: u32,
        last_write: NaiveDateTime,
    ) -> &mut Self {
        self.sources.insert(
            name.into(),
            MemoryFile {
                data: data.into(),
                attributes,
                last_write,
            },
        );
        self
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: bool) -> &mut Self {
        self.options.insert(name.into(), value);
        self
    }

    /// Refuse to name volumes numbered `max_volumes` and above.
    pub fn limit_volumes(&mut self, max_volumes: u32) -> &mut Self {
        self.max_volumes = Some(max_volumes);
        self
    }

    /// Names of the registered source files, sorted.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Copy of volume `volume`, if it was written.
    pub fn volume(&self, volume: u32) -> Option<Vec<u8>> {
        self.volumes.get(volume as usize).map(SharedBuffer::to_vec)
    }

    pub fn volumes(&self) -> Vec<Vec<u8>> {
        self.volumes.iter().map(SharedBuffer::to_vec).collect()
    }

    /// Overwrite the contents of an existing volume.
    pub fn replace_volume(&mut self, volume: u32, data: Vec<u8>) {
        if let Some(buffer) = self.volumes.get(volume as usize) {
            buffer.replace(data);
        }
    }

    /// Volume numbers whose names were requested, in request order.
    pub fn name_requests(&self) -> &[u32] {
        &self.name_requests
    }

    /// Volume numbers passed to `open_archive_read`, in request order.
    pub fn read_requests(&self) -> &[u32] {
        &self.read_requests
    }

    pub fn extracted(&self) -> &BTreeMap<String, ExtractedFile> {
        &self.extracted
    }

    /// Forget extracted files and counters, keeping volumes and sources.
    pub fn clear_extracted(&mut self) {
        self.pending.clear();
        self.extracted.clear();
        self.file_write_opens = 0;
    }

    /// Number of `open_file_write` calls.
    pub fn file_write_opens(&self) -> usize {
        self.file_write_opens
    }

    /// Volumes currently open (reads, writes); both are 0 between operations.
    pub fn open_volumes(&self) -> (usize, usize) {
        (self.open_volume_reads, self.open_volume_writes)
    }
}

impl PackStreamContext for MemoryContext {
    fn archive_name(&mut self, volume: u32) -> Option<String> {
        self.name_requests.push(volume);
        if self.max_volumes.is_some_and(|max| volume >= max) {
            return None;
        }
        Some(volume_name(&self.base_name, volume))
    }

    fn open_archive_write(
        &mut self,
        volume: u32,
        _name: &str,
        truncate: bool,
    ) -> io::Result<Option<Box<dyn VolumeWrite>>> {
        let index = volume as usize;
        if self.volumes.len() <= index {
            self.volumes.resize_with(index + 1, SharedBuffer::new);
        }
        let buffer = self.volumes[index].clone();
        if truncate {
            buffer.replace(Vec::new());
        }
        self.open_volume_writes += 1;
        Ok(Some(Box::new(buffer)))
    }

    fn close_archive_write(
        &mut self,
        _volume: u32,
        _name: &str,
        _stream: Box<dyn VolumeWrite>,
    ) -> io::Result<()> {
        self.open_volume_writes = self.open_volume_writes.saturating_sub(1);
        Ok(())
    }

    fn open_file_read(&mut self, path: &str) -> io::Result<Option<SourceFile>> {
        Ok(self.sources.get(path).map(|file| SourceFile {
            stream: Box::new(io::Cursor::new(file.data.clone())),
            length: file.data.len() as u64,
            attributes: file.attributes,
            last_write: file.last_write,
        }))
    }

    fn close_file_read(&mut self, _path: &str, _stream: Box<dyn Read>) -> io::Result<()> {
        Ok(())
    }

    fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }
}

impl UnpackStreamContext for MemoryContext {
    fn open_archive_read(&mut self, volume: u32) -> io::Result<Option<Box<dyn VolumeRead>>> {
        self.read_requests.push(volume);
        let Some(buffer) = self.volumes.get(volume as usize) else {
            return Ok(None);
        };
        self.open_volume_reads += 1;
        Ok(Some(Box::new(buffer.clone())))
    }

    fn close_archive_read(&mut self, _volume: u32, _stream: Box<dyn VolumeRead>) -> io::Result<()> {
        self.open_volume_reads = self.open_volume_reads.saturating_sub(1);
        Ok(())
    }

    fn open_file_write(
        &mut self,
        path: &str,
        length: u64,
        _last_write: Option<NaiveDateTime>,
    ) -> io::Result<Option<Box<dyn Write>>> {
        self.file_write_opens += 1;
        let buffer = SharedBuffer::from_vec(Vec::with_capacity(length.min(1 << 20) as usize));
        self.pending.insert(path.to_string(), buffer.clone());
        Ok(Some(Box::new(buffer)))
    }

    fn close_file_write(
        &mut self,
        path: &str,
        _stream: Box<dyn Write>,
        attributes: u32,
        last_write: Option<NaiveDateTime>,
    ) -> io::Result<()> {
        if let Some(buffer) = self.pending.remove(path) {
            self.extracted.insert(
                path.to_string(),
                ExtractedFile {
                    data: buffer.to_vec(),
                    attributes,
                    last_write,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_clones_share_bytes() {
        let mut writer = SharedBuffer::new();
        writer.write_all(b"hello world").unwrap();
        writer.seek(SeekFrom::Start(6)).unwrap();
        writer.write_all(b"WORLD!").unwrap();

        let mut reader = writer.clone();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello WORLD!");
    }

    #[test]
    fn test_volume_names_follow_split_convention() {
        let mut context = MemoryContext::new("backup.zip");
        assert_eq!(context.archive_name(0).as_deref(), Some("backup.zip"));
        assert_eq!(context.archive_name(3).as_deref(), Some("backup.z03"));
        context.limit_volumes(2);
        assert_eq!(context.archive_name(2), None);
        assert_eq!(context.name_requests(), &[0, 3, 2]);
    }

    #[test]
    fn test_missing_volume_reads_as_none() {
        let mut context = MemoryContext::from_volumes(vec![vec![1, 2, 3]]);
        assert!(context.open_archive_read(0).unwrap().is_some());
        assert!(context.open_archive_read(1).unwrap().is_none());
    }
}

//! Stream context over local files and HTTP(S) URLs.
//!
//! Volume 0 is the archive path (or URL) itself; volume `n > 0` swaps the
//! extension for `.zNN`, following the usual split-archive naming.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

use super::{
    OPTION_FORCE_ZIP64, PackStreamContext, SourceFile, UnpackStreamContext, VolumeRead,
    VolumeWrite,
};
use crate::io::{HttpRangeReader, LocalFileReader, ReadAtCursor};
use crate::zip::{ATTR_ARCHIVE, ATTR_READONLY, DosDateTime};

/// Read-ahead for remote volumes, so header parsing does not turn into one
/// range request per field.
const REMOTE_BUFFER_SIZE: usize = 256 * 1024;

const LOCAL_BUFFER_SIZE: usize = 64 * 1024;

/// What to do when an extracted file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overwrite {
    /// Skip the entry and say so
    #[default]
    Notice,
    /// Skip the entry silently
    Never,
    /// Replace the existing file
    Always,
}

/// Name of volume `volume` of the archive whose first volume is `base`.
pub fn volume_name(base: &str, volume: u32) -> String {
    if volume == 0 {
        return base.to_string();
    }
    let file_start = base.rfind(|c| c == '/' || c == '\\').map_or(0, |i| i + 1);
    let stem = match base[file_start..].rfind('.') {
        Some(dot) => &base[..file_start + dot],
        None => base,
    };
    format!("{stem}.z{volume:02}")
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Relative destination path of an entry, `None` if it would escape the
/// destination directory.
fn entry_path(name: &str, junk_paths: bool) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }
    let mut path = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if junk_paths {
        path = PathBuf::from(path.file_name()?);
    }
    if path.as_os_str().is_empty() {
        return None;
    }
    Some(path)
}

fn to_naive(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

fn to_system_time(time: &NaiveDateTime) -> Option<SystemTime> {
    Local
        .from_local_datetime(time)
        .earliest()
        .map(SystemTime::from)
}

/// Stream context for archives on disk or behind HTTP(S) URLs.
///
/// Packing reads sources relative to a base directory and writes local
/// volumes. Unpacking reads local or remote volumes and writes below a
/// destination directory.
#[derive(Debug)]
pub struct ArchiveFileContext {
    archive: String,
    base_dir: PathBuf,
    destination: PathBuf,
    overwrite: Overwrite,
    junk_paths: bool,
    force_zip64: bool,
    open_writes: HashMap<String, PathBuf>,
    transferred: Arc<AtomicU64>,
}

impl ArchiveFileContext {
    /// `archive` is the path or URL of the first volume.
    pub fn new(archive: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
            base_dir: PathBuf::from("."),
            destination: PathBuf::from("."),
            overwrite: Overwrite::default(),
            junk_paths: false,
            force_zip64: false,
            open_writes: HashMap::new(),
            transferred: Arc::default(),
        }
    }

    /// Directory that source file names are relative to.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Directory that entries are extracted into.
    pub fn with_destination(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = dir.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: Overwrite) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Extract every entry into the destination directory itself.
    pub fn with_junk_paths(mut self, junk_paths: bool) -> Self {
        self.junk_paths = junk_paths;
        self
    }

    pub fn with_force_zip64(mut self, force_zip64: bool) -> Self {
        self.force_zip64 = force_zip64;
        self
    }

    pub fn is_remote(&self) -> bool {
        is_url(&self.archive)
    }

    /// Bytes fetched from remote volumes so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    fn open_remote(&self, url: String) -> io::Result<Option<Box<dyn VolumeRead>>> {
        Ok(HttpRangeReader::open(url)?.map(|reader| {
            let reader = reader.with_transfer_counter(Arc::clone(&self.transferred));
            Box::new(BufReader::with_capacity(
                REMOTE_BUFFER_SIZE,
                ReadAtCursor::new(reader),
            )) as Box<dyn VolumeRead>
        }))
    }
}

impl PackStreamContext for ArchiveFileContext {
    fn archive_name(&mut self, volume: u32) -> Option<String> {
        Some(volume_name(&self.archive, volume))
    }

    fn open_archive_write(
        &mut self,
        volume: u32,
        name: &str,
        truncate: bool,
    ) -> io::Result<Option<Box<dyn VolumeWrite>>> {
        if is_url(name) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{name}: remote archives are read-only"),
            ));
        }
        debug!("Opening volume {volume} for writing: {name}");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(name)?;
        Ok(Some(Box::new(BufWriter::new(file))))
    }

    fn close_archive_write(
        &mut self,
        volume: u32,
        name: &str,
        mut stream: Box<dyn VolumeWrite>,
    ) -> io::Result<()> {
        debug!("Closing volume {volume}: {name}");
        stream.flush()
    }

    fn open_file_read(&mut self, path: &str) -> io::Result<Option<SourceFile>> {
        let full = self.base_dir.join(path);
        let metadata = match fs::metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{}: not found, skipping", full.display());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            debug!("{}: directory, skipping", full.display());
            return Ok(None);
        }

        let mut attributes = ATTR_ARCHIVE;
        if metadata.permissions().readonly() {
            attributes |= ATTR_READONLY;
        }
        let last_write = metadata
            .modified()
            .map(to_naive)
            .ok()
            .or_else(|| DosDateTime::EPOCH.to_datetime())
            .unwrap_or_default();

        Ok(Some(SourceFile {
            stream: Box::new(BufReader::new(File::open(&full)?)),
            length: metadata.len(),
            attributes,
            last_write,
        }))
    }

    fn close_file_read(&mut self, _path: &str, _stream: Box<dyn Read>) -> io::Result<()> {
        Ok(())
    }

    fn option(&self, name: &str) -> Option<bool> {
        (name == OPTION_FORCE_ZIP64).then_some(self.force_zip64)
    }
}

impl UnpackStreamContext for ArchiveFileContext {
    fn open_archive_read(&mut self, volume: u32) -> io::Result<Option<Box<dyn VolumeRead>>> {
        let name = volume_name(&self.archive, volume);
        if is_url(&name) {
            return self.open_remote(name);
        }
        match LocalFileReader::new(Path::new(&name)) {
            Ok(reader) => {
                debug!("Opened volume {volume}: {name}");
                Ok(Some(Box::new(BufReader::with_capacity(
                    LOCAL_BUFFER_SIZE,
                    ReadAtCursor::new(reader),
                ))))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close_archive_read(&mut self, volume: u32, _stream: Box<dyn VolumeRead>) -> io::Result<()> {
        debug!("Closed volume {volume}");
        Ok(())
    }

    fn open_file_write(
        &mut self,
        path: &str,
        _length: u64,
        _last_write: Option<NaiveDateTime>,
    ) -> io::Result<Option<Box<dyn Write>>> {
        let Some(relative) = entry_path(path, self.junk_paths) else {
            warn!("{path}: outside the destination directory, skipping");
            return Ok(None);
        };
        let target = self.destination.join(relative);

        if target.exists() {
            match self.overwrite {
                Overwrite::Never => {
                    debug!("Skipping: {path} (file exists)");
                    return Ok(None);
                }
                Overwrite::Notice => {
                    warn!("Skipping: {path} (use -o to overwrite)");
                    return Ok(None);
                }
                Overwrite::Always => {
                    // A read-only file from an earlier extraction cannot be truncated
                    let mut permissions = fs::metadata(&target)?.permissions();
                    if permissions.readonly() {
                        #[allow(clippy::permissions_set_readonly_false)]
                        permissions.set_readonly(false);
                        fs::set_permissions(&target, permissions)?;
                    }
                }
            }
        }

        // Create parent directories if needed
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&target)?;
        self.open_writes.insert(path.to_string(), target);
        Ok(Some(Box::new(BufWriter::new(file))))
    }

    fn close_file_write(
        &mut self,
        path: &str,
        mut stream: Box<dyn Write>,
        attributes: u32,
        last_write: Option<NaiveDateTime>,
    ) -> io::Result<()> {
        stream.flush()?;
        drop(stream);

        let Some(target) = self.open_writes.remove(path) else {
            return Ok(());
        };
        if let Some(modified) = last_write.as_ref().and_then(to_system_time) {
            OpenOptions::new()
                .write(true)
                .open(&target)?
                .set_modified(modified)?;
        }
        if attributes & ATTR_READONLY != 0 {
            let mut permissions = fs::metadata(&target)?.permissions();
            permissions.set_readonly(true);
            fs::set_permissions(&target, permissions)?;
        }
        Ok(())
    }
}

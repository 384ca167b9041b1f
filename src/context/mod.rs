//! The narrow I/O contract between the engine and its caller.
//!
//! The engine never touches the file system itself. Volumes and entry
//! streams are opened and closed through a stream context, strictly in the
//! order the engine needs them:
//!
//! - [`PackStreamContext`] names and opens archive volumes for writing and
//!   opens the source files to compress.
//! - [`UnpackStreamContext`] opens archive volumes for reading and the
//!   destination streams for extracted entries.
//!
//! Two implementations ship with the crate: [`ArchiveFileContext`] (local
//! paths or HTTP URLs) and [`MemoryContext`] for in-memory archives.

mod file;
mod memory;

pub use file::{ArchiveFileContext, Overwrite, volume_name};
pub use memory::{ExtractedFile, MemoryContext, SharedBuffer};

use chrono::NaiveDateTime;
use std::io::{self, Read, Seek, Write};

/// Option forcing ZIP64 headers and records even when nothing overflows.
pub const OPTION_FORCE_ZIP64: &str = "forceZip64";

/// A volume opened for reading.
pub trait VolumeRead: Read + Seek {}

impl<T: Read + Seek> VolumeRead for T {}

/// A volume opened for writing; back-patching needs to seek.
pub trait VolumeWrite: Write + Seek {}

impl<T: Write + Seek> VolumeWrite for T {}

/// A source file handed to the packer.
pub struct SourceFile {
    pub stream: Box<dyn Read>,
    /// Exact number of bytes the stream will yield
    pub length: u64,
    /// MS-DOS attribute bits
    pub attributes: u32,
    pub last_write: NaiveDateTime,
}

/// Stream provider for packing.
pub trait PackStreamContext {
    /// Name of archive volume `volume`, `None` when the caller has no name
    /// for it (fatal for the engine).
    fn archive_name(&mut self, volume: u32) -> Option<String>;

    /// Open a volume for writing. `truncate` is false only when the engine
    /// reopens an earlier volume to patch a header.
    fn open_archive_write(
        &mut self,
        volume: u32,
        name: &str,
        truncate: bool,
    ) -> io::Result<Option<Box<dyn VolumeWrite>>>;

    fn close_archive_write(
        &mut self,
        volume: u32,
        name: &str,
        stream: Box<dyn VolumeWrite>,
    ) -> io::Result<()>;

    /// Open a file to add to the archive; `None` skips it.
    fn open_file_read(&mut self, path: &str) -> io::Result<Option<SourceFile>>;

    fn close_file_read(&mut self, path: &str, stream: Box<dyn Read>) -> io::Result<()>;

    /// Look up a boolean option such as [`OPTION_FORCE_ZIP64`].
    fn option(&self, _name: &str) -> Option<bool> {
        None
    }
}

/// Stream provider for unpacking.
pub trait UnpackStreamContext {
    /// Open a volume for reading; `None` means there is no such volume.
    fn open_archive_read(&mut self, volume: u32) -> io::Result<Option<Box<dyn VolumeRead>>>;

    fn close_archive_read(&mut self, volume: u32, stream: Box<dyn VolumeRead>) -> io::Result<()>;

    /// Open the destination of an entry; `None` skips the entry.
    fn open_file_write(
        &mut self,
        path: &str,
        length: u64,
        last_write: Option<NaiveDateTime>,
    ) -> io::Result<Option<Box<dyn Write>>>;

    fn close_file_write(
        &mut self,
        path: &str,
        stream: Box<dyn Write>,
        attributes: u32,
        last_write: Option<NaiveDateTime>,
    ) -> io::Result<()>;
}

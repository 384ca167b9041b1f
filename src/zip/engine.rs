//! Public entry point for packing and unpacking.

use parking_lot::Mutex;
use std::io::{self, Read};

use super::header::FileHeader;
use super::packer::{PackOptions, PackSession, PackSummary};
use super::progress::{ArchiveProgress, Progress, ProgressHandler};
use super::structures::*;
use super::unpacker::{CentralDirectory, UnpackSession, UnpackSummary};
use crate::context::{PackStreamContext, UnpackStreamContext};
use crate::error::Result;

#[derive(Default)]
struct EngineState {
    progress: Option<ProgressHandler>,
}

/// Streaming ZIP engine.
///
/// All I/O goes through a stream context, so the same engine writes to disk,
/// memory or anything else a context can offer. Operations on one engine are
/// serialized: each call holds an instance-wide lock until it returns, and
/// progress handlers are invoked under that lock.
///
/// ```
/// use spanzip::{MemoryContext, ZipEngine};
///
/// let engine = ZipEngine::new();
/// let mut context = MemoryContext::default();
/// context.add_file("hello.txt", "Hello, world!");
/// engine.pack(&mut context, &["hello.txt"], 0)?;
///
/// let entries = engine.list(&mut context)?;
/// assert_eq!(entries[0].name, "hello.txt");
///
/// engine.unpack(&mut context, None)?;
/// assert_eq!(context.extracted()["hello.txt"].data, b"Hello, world!");
/// # Ok::<(), spanzip::ZipError>(())
/// ```
pub struct ZipEngine {
    state: Mutex<EngineState>,
    compression_level: CompressionLevel,
    comment: String,
}

impl Default for ZipEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipEngine")
            .field("compression_level", &self.compression_level)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

impl ZipEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            compression_level: CompressionLevel::default(),
            comment: String::new(),
        }
    }

    /// Compression level for packing; [`CompressionLevel::None`] stores.
    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    /// Archive comment written into the end of central directory record.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Register a progress handler, replacing any previous one.
    ///
    /// The handler runs while the operation holds the engine lock, so it
    /// must not call back into the same engine; that call would deadlock.
    pub fn set_progress_handler<F>(&self, handler: F)
    where
        F: FnMut(&ArchiveProgress) + Send + 'static,
    {
        self.state.lock().progress = Some(Box::new(handler));
    }

    pub fn clear_progress_handler(&self) {
        self.state.lock().progress = None;
    }

    /// Pack `files` into an archive.
    ///
    /// `max_archive_size` caps every volume at that many bytes, starting a
    /// new volume when the cap is reached; 0 writes a single volume.
    pub fn pack<C, S>(&self, context: &mut C, files: &[S], max_archive_size: u64) -> Result<PackSummary>
    where
        C: PackStreamContext + ?Sized,
        S: AsRef<str>,
    {
        let mut state = self.state.lock();
        let progress = Progress::new(state.progress.as_mut());
        let options = PackOptions {
            level: self.compression_level,
            comment: &self.comment,
            max_archive_size,
        };
        PackSession::new(context, progress, options).run(files)
    }

    /// Extract the entries whose names `filter` accepts, or all entries.
    pub fn unpack<C>(&self, context: &mut C, filter: Option<&dyn Fn(&str) -> bool>) -> Result<UnpackSummary>
    where
        C: UnpackStreamContext + ?Sized,
    {
        let mut state = self.state.lock();
        let progress = Progress::new(state.progress.as_mut());
        UnpackSession::new(context, progress).run(filter)
    }

    /// Parse the central directory without extracting anything.
    pub fn read_central_directory<C>(&self, context: &mut C) -> Result<CentralDirectory>
    where
        C: UnpackStreamContext + ?Sized,
    {
        let _state = self.state.lock();
        UnpackSession::new(context, Progress::new(None)).read_directory()
    }

    /// List the entries of an archive in directory order.
    pub fn list<C>(&self, context: &mut C) -> Result<Vec<ZipFileInfo>>
    where
        C: UnpackStreamContext + ?Sized,
    {
        let directory = self.read_central_directory(context)?;
        Ok(directory.entries.iter().map(FileHeader::to_info).collect())
    }

    /// Whether `stream` starts like a ZIP volume: a local header, a
    /// spanning marker, or the end record of an empty archive.
    pub fn is_archive<R: Read + ?Sized>(stream: &mut R) -> io::Result<bool> {
        let mut sig = [0u8; 4];
        match stream.read_exact(&mut sig) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }
        Ok(matches!(
            u32::from_le_bytes(sig),
            LFH_SIGNATURE | SPANNING_SIGNATURE | SPANNING_TEMP_SIGNATURE | EOCD_SIGNATURE
        ))
    }
}

//! # spanzip
//!
//! A streaming ZIP packer/unpacker with multi-volume spanning and ZIP64
//! support.
//!
//! The engine never touches the file system itself: every volume and every
//! entry stream is opened through a stream context. The crate ships a
//! context for local files and HTTP URLs (using Range requests, so only the
//! needed parts of a remote archive are downloaded) and an in-memory one.
//!
//! ## Features
//!
//! - Pack files into one archive or into volumes of a maximum size
//! - Extract all or selected entries, verifying CRC-32 checksums
//! - ZIP64 records for entries and archives beyond 4 GiB or 65535 entries
//! - STORED (uncompressed) and DEFLATE compression methods
//! - Remote archives over HTTP/HTTPS
//!
//! ## Example
//!
//! ```no_run
//! use spanzip::{ArchiveFileContext, ZipEngine};
//!
//! fn main() -> spanzip::Result<()> {
//!     let engine = ZipEngine::new();
//!
//!     // Pack two files into volumes of at most 100 MiB each
//!     let mut context = ArchiveFileContext::new("backup.zip").with_base_dir("data");
//!     engine.pack(&mut context, &["a.bin", "b.bin"], 100 << 20)?;
//!
//!     // List a remote archive
//!     let mut remote = ArchiveFileContext::new("https://example.com/archive.zip");
//!     for file in engine.list(&mut remote)? {
//!         println!("{}", file.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod context;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use context::{ArchiveFileContext, MemoryContext, Overwrite};
pub use error::{Result, ZipError};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use zip::{
    ArchiveProgress, CompressionLevel, PackSummary, ProgressKind, UnpackSummary, ZipEngine,
    ZipFileInfo,
};

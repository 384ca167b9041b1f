//! ZIP archive packing and unpacking.
//!
//! ## Architecture
//!
//! - [`structures`]: constants, compression settings, DOS timestamps and the
//!   public entry view
//! - [`header`]: local and central file headers, including ZIP64 extras
//! - [`eocd`]: end of central directory records and their discovery
//! - `packer` / `unpacker`: the per-call pack and unpack sessions
//! - [`engine`]: [`ZipEngine`], the public entry point
//!
//! ## ZIP Format Overview
//!
//! A ZIP archive consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end, preceded by the
//!    ZIP64 EOCD record and locator when a field overflows
//!
//! Any of these may be spread over several volumes. Readers locate the EOCD
//! first, then the Central Directory, so listing never touches entry data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for entries and archives beyond 4 GiB or 65535 entries
//! - Split archives with a volume size cap
//! - STORED (no compression) and DEFLATE methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No BZIP2, LZMA, or other compression methods (such entries are skipped)

pub mod cp437;
pub mod engine;
pub mod eocd;
pub mod header;
mod packer;
pub mod progress;
pub mod structures;
mod unpacker;

pub use engine::ZipEngine;
pub use header::{FileHeader, HeaderRead};
pub use packer::PackSummary;
pub use progress::{ArchiveProgress, ProgressHandler, ProgressKind};
pub use structures::*;
pub use unpacker::{CentralDirectory, UnpackSummary};

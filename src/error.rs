//! Error types for archive packing and unpacking.

use std::io;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Errors produced while packing or unpacking an archive.
#[derive(Debug, Error)]
pub enum ZipError {
    /// The archive structure is invalid: bad or missing signature, corrupt
    /// central directory, local header mismatch or truncated entry data.
    #[error("invalid archive: {0}")]
    Format(String),

    /// The CRC-32 of an extracted entry does not match its header.
    #[error("CRC check failed for {name}: expected {expected:08X}, got {actual:08X}")]
    ChecksumMismatch {
        /// Entry name as stored in the central directory
        name: String,
        /// CRC-32 recorded in the header
        expected: u32,
        /// CRC-32 computed over the extracted bytes
        actual: u32,
    },

    /// The stream context did not supply a volume name or stream.
    #[error("archive volume unavailable: {0}")]
    VolumeUnavailable(String),

    /// I/O error from an underlying stream.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl ZipError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Wrap this error so it can cross a `Read`/`Write` boundary.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}

impl From<io::Error> for ZipError {
    /// Recovers a `ZipError` that was tunneled through `io::Error::other`.
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(zip)) => *zip,
            Some(Err(inner)) => Self::Io(io::Error::other(inner)),
            None => Self::format("stream error without cause"),
        }
    }
}

//! Error types for the egg archive library

use std::io;
use thiserror::Error;

/// Result type alias for egg archive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for egg archive operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid ZIP structure or corrupted archive
    #[error("Invalid archive format: {0}")]
    InvalidFormat(String),

    /// The end of central directory record could not be located
    #[error("End of central directory record not found")]
    MissingEndOfCentralDirectory,

    /// Entry uses a feature this library does not read or write
    #[error("Unsupported archive feature: {0}")]
    Unsupported(String),

    /// Entry not found in archive
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Entry name would escape the extraction directory
    #[error("Unsafe entry path: {0}")]
    UnsafePath(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Stored checksum does not match the decompressed data
    #[error("Checksum mismatch for {entry}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Entry name
        entry: String,
        /// CRC-32 recorded in the central directory
        expected: u32,
        /// CRC-32 of the decompressed data
        actual: u32,
    },

    /// Decompressed size does not match the central directory
    #[error("Invalid size for {entry}: expected {expected}, got {actual}")]
    InvalidSize {
        /// Entry name
        entry: String,
        /// Size recorded in the central directory
        expected: u64,
        /// Size actually produced
        actual: u64,
    },

    /// Archive exceeds the limits of the classic (non-ZIP64) format
    #[error("Archive capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl Error {
    /// Create a new InvalidFormat error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create a new Unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a new Compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Error::Compression(msg.into())
    }

    /// Check if this error indicates the archive is corrupted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_)
                | Error::MissingEndOfCentralDirectory
                | Error::UnsafePath(_)
                | Error::Compression(_)
                | Error::ChecksumMismatch { .. }
                | Error::InvalidSize { .. }
        ) || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

//! # egg_archive - Egg (ZIP) Archive Library
//!
//! Reads and writes the ZIP containers Python ships eggs in. Only what an
//! egg needs is covered: stored and deflated entries, explicit directory
//! entries, unix permission bits, and the classic (non-ZIP64) layout.
//!
//! ## Examples
//!
//! ### Extract and repack
//!
//! ```no_run
//! # fn main() -> Result<(), egg_archive::Error> {
//! let summary = egg_archive::extract("pyovpn-2.0-py3.10.egg", "work/extracted")?;
//! println!("{} files extracted", summary.files);
//!
//! egg_archive::repack("work/extracted", "work/pyovpn-2.0-py3.10.egg")?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod archive;
pub mod builder;
pub mod compression;
pub mod error;
pub mod header;
pub mod path;

// Re-export commonly used types
pub use archive::{EggArchive, EntryInfo, ExtractSummary, extract};
pub use builder::{BuildSummary, EggBuilder, repack};
pub use error::{Error, Result};
pub use header::{CompressionMethod, DosDateTime};

/// Re-exported so callers can choose a deflate level without depending on flate2
pub use flate2::Compression;

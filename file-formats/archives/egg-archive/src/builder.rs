//! Archive builder for creating egg archives

use crate::compression::compress;
use crate::header::{
    CentralDirectoryHeader, CompressionMethod, DosDateTime, EndOfCentralDirectory,
    LocalFileHeader, VERSION_MADE_BY_UNIX, flags,
};
use crate::path::entry_name_from_path;
use crate::{Error, Result};
use chrono::{DateTime, Local};
use flate2::Compression;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Mode recorded for regular files when the source has none
const DEFAULT_FILE_MODE: u32 = 0o100_644;

/// Mode recorded for directories when the source has none
const DEFAULT_DIR_MODE: u32 = 0o040_755;

/// MS-DOS directory attribute bit
const DOS_DIRECTORY_ATTRIBUTE: u32 = 0x10;

#[derive(Debug)]
enum EntrySource {
    Path(PathBuf),
    Data(Vec<u8>),
    Directory,
}

/// Entry to be written to the archive
#[derive(Debug)]
struct PendingEntry {
    source: EntrySource,
    name: String,
    modified: DosDateTime,
    unix_mode: u32,
}

/// Totals reported after an archive is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Regular file entries written
    pub files: usize,
    /// Directory entries written
    pub directories: usize,
    /// Uncompressed bytes of all file entries
    pub uncompressed_bytes: u64,
    /// Total size of the archive
    pub archive_bytes: u64,
}

/// Builder for creating new egg archives
///
/// Files are deflated; directory entries are stored with a trailing slash so
/// empty directories survive a round trip.
///
/// # Examples
///
/// ```no_run
/// use egg_archive::EggBuilder;
///
/// EggBuilder::new()
///     .add_directory("EGG-INFO/")
///     .add_file_data(b"Metadata-Version: 1.1\n".to_vec(), "EGG-INFO/PKG-INFO")
///     .add_file("build/uprop.pyc", "pyovpn/lic/uprop.pyc")
///     .build("pyovpn-2.0-py3.10.egg")?;
/// # Ok::<(), egg_archive::Error>(())
/// ```
#[derive(Debug)]
pub struct EggBuilder {
    entries: Vec<PendingEntry>,
    compression: Compression,
    comment: Vec<u8>,
}

impl EggBuilder {
    /// Create a builder with default deflate compression
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            compression: Compression::default(),
            comment: Vec::new(),
        }
    }

    /// Set the deflate compression level
    pub fn compression_level(mut self, level: Compression) -> Self {
        self.compression = level;
        self
    }

    /// Set the archive comment
    pub fn comment(mut self, comment: Vec<u8>) -> Self {
        self.comment = comment;
        self
    }

    /// Add a file from disk under the given entry name
    ///
    /// The file is read when the archive is built; its modification time and
    /// unix mode are recorded.
    pub fn add_file<P: AsRef<Path>>(mut self, path: P, archive_name: &str) -> Self {
        self.entries.push(PendingEntry {
            source: EntrySource::Path(path.as_ref().to_path_buf()),
            name: archive_name.to_string(),
            modified: DosDateTime::EPOCH,
            unix_mode: DEFAULT_FILE_MODE,
        });
        self
    }

    /// Add in-memory data under the given entry name
    pub fn add_file_data(mut self, data: Vec<u8>, archive_name: &str) -> Self {
        self.entries.push(PendingEntry {
            source: EntrySource::Data(data),
            name: archive_name.to_string(),
            modified: DosDateTime::EPOCH,
            unix_mode: DEFAULT_FILE_MODE,
        });
        self
    }

    /// Add an explicit directory entry
    pub fn add_directory(mut self, archive_name: &str) -> Self {
        let mut name = archive_name.to_string();
        if !name.ends_with('/') {
            name.push('/');
        }
        self.entries.push(PendingEntry {
            source: EntrySource::Directory,
            name,
            modified: DosDateTime::EPOCH,
            unix_mode: DEFAULT_DIR_MODE,
        });
        self
    }

    /// Add every file and directory beneath `root`, keyed by path relative to it
    ///
    /// Entries are added in file-name order at each level.
    pub fn add_tree<P: AsRef<Path>>(mut self, root: P) -> Result<Self> {
        let root = root.as_ref();

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let message = e.to_string();
                e.into_io_error()
                    .map_or_else(|| Error::invalid_format(message), Error::Io)
            })?;

            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| Error::invalid_format("walked outside the source tree"))?;
            let name = entry_name_from_path(relative);

            if entry.file_type().is_dir() {
                let metadata = entry.metadata().map_err(|e| Error::invalid_format(e.to_string()))?;
                self.entries.push(PendingEntry {
                    source: EntrySource::Directory,
                    name: format!("{name}/"),
                    modified: modified_time(metadata.modified().ok()),
                    unix_mode: unix_mode(&metadata).unwrap_or(DEFAULT_DIR_MODE),
                });
            } else if entry.path().is_file() {
                let metadata = fs::metadata(entry.path())?;
                self.entries.push(PendingEntry {
                    source: EntrySource::Path(entry.path().to_path_buf()),
                    name,
                    modified: modified_time(metadata.modified().ok()),
                    unix_mode: unix_mode(&metadata).unwrap_or(DEFAULT_FILE_MODE),
                });
            } else {
                log::warn!("Skipping {}: not a regular file", entry.path().display());
            }
        }

        Ok(self)
    }

    /// Number of entries queued so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the archive and write it to the specified path
    ///
    /// The archive is written to a temporary file in the same directory and
    /// renamed into place.
    pub fn build<P: AsRef<Path>>(self, path: P) -> Result<BuildSummary> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp_file = NamedTempFile::new_in(parent)?;
        let summary = {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            let summary = self.write_to(&mut writer)?;
            writer.flush()?;
            summary
        };

        temp_file.persist(path).map_err(|e| Error::Io(e.error))?;

        log::debug!(
            "Wrote {} ({} files, {} directories, {} bytes)",
            path.display(),
            summary.files,
            summary.directories,
            summary.archive_bytes
        );
        Ok(summary)
    }

    /// Serialise the archive to any writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<BuildSummary> {
        let mut summary = BuildSummary::default();
        let mut central = Vec::with_capacity(self.entries.len());
        let mut offset: u64 = 0;

        for entry in &self.entries {
            let (method, data) = match &entry.source {
                EntrySource::Directory => (CompressionMethod::Stored, Vec::new()),
                EntrySource::Data(data) => (CompressionMethod::Deflated, data.clone()),
                EntrySource::Path(path) => (CompressionMethod::Deflated, fs::read(path)?),
            };

            let crc32 = crc32fast::hash(&data);
            let compressed = compress(method, &data, self.compression)?;
            let mut general_flags = 0;
            if !entry.name.is_ascii() {
                general_flags |= flags::UTF8_NAMES;
            }

            let local = LocalFileHeader {
                version_needed: method.version_needed(),
                flags: general_flags,
                method: method as u16,
                modified: entry.modified,
                crc32,
                compressed_size: to_u32(compressed.len() as u64, &entry.name)?,
                uncompressed_size: to_u32(data.len() as u64, &entry.name)?,
                name: entry.name.as_bytes().to_vec(),
                extra: Vec::new(),
            };

            let mut external_attributes = entry.unix_mode << 16;
            if matches!(entry.source, EntrySource::Directory) {
                external_attributes |= DOS_DIRECTORY_ATTRIBUTE;
            }

            central.push(CentralDirectoryHeader {
                version_made_by: VERSION_MADE_BY_UNIX,
                version_needed: local.version_needed,
                flags: local.flags,
                method: local.method,
                modified: local.modified,
                crc32,
                compressed_size: local.compressed_size,
                uncompressed_size: local.uncompressed_size,
                disk_start: 0,
                internal_attributes: 0,
                external_attributes,
                local_header_offset: to_u32(offset, &entry.name)?,
                name: local.name.clone(),
                extra: Vec::new(),
                comment: Vec::new(),
            });

            offset += local.write(writer)?;
            writer.write_all(&compressed)?;
            offset += compressed.len() as u64;

            if matches!(entry.source, EntrySource::Directory) {
                summary.directories += 1;
            } else {
                summary.files += 1;
                summary.uncompressed_bytes += data.len() as u64;
            }
            log::trace!(
                "Added {} ({} -> {} bytes)",
                entry.name,
                data.len(),
                compressed.len()
            );
        }

        let central_directory_offset = offset;
        for header in &central {
            offset += header.write(writer)?;
        }
        let central_directory_size = offset - central_directory_offset;

        let total_entries = u16::try_from(central.len()).map_err(|_| {
            Error::CapacityExceeded(format!("{} entries exceed 65535", central.len()))
        })?;
        if total_entries == u16::MAX {
            return Err(Error::CapacityExceeded("65535 entries require ZIP64".to_string()));
        }

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            central_directory_disk: 0,
            entries_on_disk: total_entries,
            total_entries,
            central_directory_size: to_u32(central_directory_size, "central directory")?,
            central_directory_offset: to_u32(central_directory_offset, "central directory")?,
            comment: self.comment.clone(),
        };
        offset += eocd.write(writer)?;

        summary.archive_bytes = offset;
        Ok(summary)
    }
}

impl Default for EggBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-serialise the directory tree at `source_dir` into a deflated archive at `archive_path`
pub fn repack<P: AsRef<Path>, Q: AsRef<Path>>(source_dir: P, archive_path: Q) -> Result<BuildSummary> {
    EggBuilder::new().add_tree(source_dir)?.build(archive_path)
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    match u32::try_from(value) {
        Ok(v) if v != u32::MAX => Ok(v),
        _ => Err(Error::CapacityExceeded(format!(
            "{what}: {value} bytes require ZIP64"
        ))),
    }
}

fn modified_time(modified: Option<SystemTime>) -> DosDateTime {
    modified.map_or(DosDateTime::EPOCH, |time| {
        DosDateTime::from_naive(DateTime::<Local>::from(time).naive_local())
    })
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.mode())
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

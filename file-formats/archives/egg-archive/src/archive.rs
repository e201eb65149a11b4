//! Reading and extracting egg archives

use crate::compression::decompress;
use crate::header::{
    CentralDirectoryHeader, CompressionMethod, DosDateTime, EndOfCentralDirectory,
    LocalFileHeader, flags,
};
use crate::path::{decode_cp437, is_directory_name, resolve_entry_path};
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Information about a single entry, taken from the central directory
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Entry name, forward-slash separated, trailing slash for directories
    pub name: String,
    /// Raw compression method
    pub method: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Compressed size in bytes
    pub compressed_size: u64,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Last modification time
    pub modified: DosDateTime,
    /// Unix mode, when the writer recorded one
    pub unix_mode: Option<u32>,
    /// Offset of the local file header
    pub local_header_offset: u64,
}

impl EntryInfo {
    fn from_central(header: &CentralDirectoryHeader) -> Result<Self> {
        let name = if header.flags & flags::UTF8_NAMES != 0 {
            String::from_utf8(header.name.clone())
                .map_err(|_| Error::invalid_format("Entry name is not valid UTF-8"))?
        } else {
            decode_cp437(&header.name)
        };

        Ok(Self {
            name,
            method: header.method,
            flags: header.flags,
            compressed_size: u64::from(header.compressed_size),
            size: u64::from(header.uncompressed_size),
            crc32: header.crc32,
            modified: header.modified,
            unix_mode: header.unix_mode(),
            local_header_offset: u64::from(header.local_header_offset),
        })
    }

    /// Whether this entry is a directory marker
    pub fn is_dir(&self) -> bool {
        is_directory_name(&self.name)
    }

    /// Compression method, `None` if this library cannot decode it
    pub fn compression_method(&self) -> Option<CompressionMethod> {
        CompressionMethod::from_raw(self.method)
    }

    /// Whether the entry data is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }
}

/// Totals reported after an extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written
    pub files: usize,
    /// Directories created from explicit directory entries
    pub directories: usize,
    /// Uncompressed bytes written
    pub bytes: u64,
}

/// An open egg archive
///
/// # Examples
///
/// ```no_run
/// use egg_archive::EggArchive;
///
/// let mut archive = EggArchive::open("pyovpn-2.0-py3.10.egg")?;
/// for entry in archive.entries() {
///     println!("{} ({} bytes)", entry.name, entry.size);
/// }
/// let data = archive.read_file("pyovpn/lic/uprop.pyc")?;
/// # Ok::<(), egg_archive::Error>(())
/// ```
#[derive(Debug)]
pub struct EggArchive {
    path: PathBuf,
    reader: BufReader<File>,
    entries: Vec<EntryInfo>,
    comment: Vec<u8>,
}

impl EggArchive {
    /// Open an archive and parse its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::new(File::open(&path)?);

        let (eocd_offset, eocd) = EndOfCentralDirectory::locate(&mut reader)?;
        let entries = read_central_directory(&mut reader, eocd_offset, &eocd)?;

        log::debug!(
            "Opened {} with {} entries",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            reader,
            entries,
            comment: eocd.comment,
        })
    }

    /// Path the archive was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in central directory order
    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    /// Archive comment
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name
    pub fn find(&self, name: &str) -> Option<&EntryInfo> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read and decompress an entry by name
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(name)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        self.read_entry(&entry)
    }

    /// Read and decompress an entry, verifying its size and CRC-32
    pub fn read_entry(&mut self, entry: &EntryInfo) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            return Err(Error::unsupported(format!(
                "{} is encrypted",
                entry.name
            )));
        }
        let method = entry.compression_method().ok_or_else(|| {
            Error::unsupported(format!(
                "{} uses compression method {}",
                entry.name, entry.method
            ))
        })?;

        self.reader.seek(SeekFrom::Start(entry.local_header_offset))?;
        let local = LocalFileHeader::read(&mut self.reader)?;
        if local.method != entry.method {
            return Err(Error::invalid_format(format!(
                "{}: local header method {} disagrees with central directory method {}",
                entry.name, local.method, entry.method
            )));
        }

        let mut compressed = vec![0u8; entry.compressed_size as usize];
        self.reader.read_exact(&mut compressed)?;

        let data = decompress(method, &compressed, entry.size as usize)?;
        if data.len() as u64 != entry.size {
            return Err(Error::InvalidSize {
                entry: entry.name.clone(),
                expected: entry.size,
                actual: data.len() as u64,
            });
        }

        let actual = crc32fast::hash(&data);
        if actual != entry.crc32 {
            return Err(Error::ChecksumMismatch {
                entry: entry.name.clone(),
                expected: entry.crc32,
                actual,
            });
        }

        Ok(data)
    }

    /// Extract every entry beneath `dest`, recreating relative paths
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<ExtractSummary> {
        let dest = dest.as_ref();
        let mut summary = ExtractSummary::default();

        for entry in self.entries.clone() {
            let target = resolve_entry_path(dest, &entry.name)?;

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                summary.directories += 1;
                continue;
            }

            let data = self.read_entry(&entry)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &data)?;
            restore_permissions(&target, entry.unix_mode)?;

            log::trace!("Extracted {} ({} bytes)", entry.name, data.len());
            summary.files += 1;
            summary.bytes += data.len() as u64;
        }

        log::debug!(
            "Extracted {} files and {} directories from {} into {}",
            summary.files,
            summary.directories,
            self.path.display(),
            dest.display()
        );
        Ok(summary)
    }
}

/// Extract the archive at `archive_path` into `dest_dir`
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(archive_path: P, dest_dir: Q) -> Result<ExtractSummary> {
    EggArchive::open(archive_path)?.extract_all(dest_dir)
}

fn read_central_directory<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
    eocd: &EndOfCentralDirectory,
) -> Result<Vec<EntryInfo>> {
    let cd_offset = u64::from(eocd.central_directory_offset);
    let cd_size = u64::from(eocd.central_directory_size);

    // Bytes in front of the archive (a shebang or launcher script) shift
    // every recorded offset by the same amount.
    let prefix = eocd_offset
        .checked_sub(cd_offset + cd_size)
        .ok_or_else(|| {
            Error::invalid_format(format!(
                "Central directory at {cd_offset} (+{cd_size}) overlaps end record at {eocd_offset}"
            ))
        })?;
    if prefix > 0 {
        log::debug!("Archive data starts after {prefix} prefix bytes");
    }

    reader.seek(SeekFrom::Start(cd_offset + prefix))?;
    let mut raw = vec![0u8; cd_size as usize];
    reader.read_exact(&mut raw)?;

    let mut cursor = Cursor::new(raw);
    let mut entries = Vec::with_capacity(usize::from(eocd.total_entries));
    for index in 0..eocd.total_entries {
        let header = CentralDirectoryHeader::read(&mut cursor).map_err(|e| match e {
            Error::Io(_) => Error::invalid_format(format!(
                "Central directory truncated at entry {index} of {}",
                eocd.total_entries
            )),
            other => other,
        })?;

        if u64::from(header.local_header_offset) >= cd_offset {
            return Err(Error::invalid_format(format!(
                "Local header offset {} of entry {index} points past the data area",
                header.local_header_offset
            )));
        }

        let mut entry = EntryInfo::from_central(&header)?;
        entry.local_header_offset += prefix;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(unix)]
fn restore_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        let bits = mode & 0o777;
        if bits != 0 {
            fs::set_permissions(path, fs::Permissions::from_mode(bits))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

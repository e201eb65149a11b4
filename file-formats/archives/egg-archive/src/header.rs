//! ZIP record structures and parsing
//!
//! An egg is a plain ZIP container. Three record types are needed to read and
//! write one: the local file header that precedes each entry's data, the
//! central directory header that indexes every entry, and the end of central
//! directory record that locates the index. All integers are little-endian.

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::io::{Read, Seek, SeekFrom, Write};

/// Local file header signature ('PK\x03\x04')
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4B50;

/// Central directory header signature ('PK\x01\x02')
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4B50;

/// End of central directory signature ('PK\x05\x06')
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4B50;

/// ZIP64 end of central directory locator signature ('PK\x06\x07')
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;

/// Version needed to extract deflated entries (2.0)
pub const VERSION_NEEDED_DEFLATE: u16 = 20;

/// Version needed to extract stored entries and directories (1.0)
pub const VERSION_NEEDED_STORED: u16 = 10;

/// "Version made by" for entries written on a unix host, APPNOTE version 2.0
pub const VERSION_MADE_BY_UNIX: u16 = (3 << 8) | 20;

/// General purpose flag bits
pub mod flags {
    /// Entry data is encrypted
    pub const ENCRYPTED: u16 = 0x0001;
    /// Sizes and CRC follow the data in a data descriptor
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// Name and comment are UTF-8
    pub const UTF8_NAMES: u16 = 0x0800;
}

/// Largest comment the end of central directory record can carry
const MAX_COMMENT_LEN: u64 = u16::MAX as u64;

/// Compression methods this library reads and writes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    Stored = 0,
    /// Raw deflate stream
    Deflated = 8,
}

impl CompressionMethod {
    /// Create from raw method number
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflated),
            _ => None,
        }
    }

    /// Version needed to extract an entry using this method
    pub fn version_needed(self) -> u16 {
        match self {
            CompressionMethod::Stored => VERSION_NEEDED_STORED,
            CompressionMethod::Deflated => VERSION_NEEDED_DEFLATE,
        }
    }
}

/// MS-DOS packed modification time, two second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    /// Packed time: hour << 11 | minute << 5 | second / 2
    pub time: u16,
    /// Packed date: (year - 1980) << 9 | month << 5 | day
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant
    pub const EPOCH: Self = Self {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// Pack a calendar time, clamping to the 1980..=2107 range the format supports
    pub fn from_naive(datetime: NaiveDateTime) -> Self {
        let year = datetime.year();
        if year < 1980 {
            return Self::EPOCH;
        }
        if year > 2107 {
            return Self {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }

        let time = (datetime.hour() << 11) | (datetime.minute() << 5) | (datetime.second() / 2);
        let date = ((year as u32 - 1980) << 9) | (datetime.month() << 5) | datetime.day();
        Self {
            time: time as u16,
            date: date as u16,
        }
    }

    /// Unpack into a calendar time, `None` when the fields are out of range
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year = 1980 + i32::from(self.date >> 9);
        let month = u32::from((self.date >> 5) & 0x0F);
        let day = u32::from(self.date & 0x1F);
        let hour = u32::from(self.time >> 11);
        let minute = u32::from((self.time >> 5) & 0x3F);
        let second = u32::from(self.time & 0x1F) * 2;

        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}

/// Header written immediately before each entry's data
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    /// Minimum version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Raw compression method
    pub method: u16,
    /// Last modification time
    pub modified: DosDateTime,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Size of the compressed data
    pub compressed_size: u32,
    /// Size of the uncompressed data
    pub uncompressed_size: u32,
    /// Raw entry name
    pub name: Vec<u8>,
    /// Extra field
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Size of the fixed part of the record, signature included
    pub const FIXED_SIZE: u64 = 30;

    /// Read a local file header, starting at its signature
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(Error::invalid_format(format!(
                "Invalid local file header signature 0x{signature:08X}"
            )));
        }

        let version_needed = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let method = reader.read_u16::<LittleEndian>()?;
        let time = reader.read_u16::<LittleEndian>()?;
        let date = reader.read_u16::<LittleEndian>()?;
        let crc32 = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let name_len = reader.read_u16::<LittleEndian>()?;
        let extra_len = reader.read_u16::<LittleEndian>()?;

        let name = read_bytes(reader, name_len)?;
        let extra = read_bytes(reader, extra_len)?;

        Ok(Self {
            version_needed,
            flags,
            method,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Write this header, returning the number of bytes written
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        writer.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.modified.time)?;
        writer.write_u16::<LittleEndian>(self.modified.date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(field_len(&self.name, "entry name")?)?;
        writer.write_u16::<LittleEndian>(field_len(&self.extra, "extra field")?)?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;

        Ok(Self::FIXED_SIZE + self.name.len() as u64 + self.extra.len() as u64)
    }
}

/// One entry of the central directory
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    /// Host system and APPNOTE version that wrote the entry
    pub version_made_by: u16,
    /// Minimum version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Raw compression method
    pub method: u16,
    /// Last modification time
    pub modified: DosDateTime,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Size of the compressed data
    pub compressed_size: u32,
    /// Size of the uncompressed data
    pub uncompressed_size: u32,
    /// Disk on which the entry starts
    pub disk_start: u16,
    /// Internal file attributes
    pub internal_attributes: u16,
    /// External file attributes (unix mode in the high 16 bits)
    pub external_attributes: u32,
    /// Offset of the local file header
    pub local_header_offset: u32,
    /// Raw entry name
    pub name: Vec<u8>,
    /// Extra field
    pub extra: Vec<u8>,
    /// Entry comment
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Size of the fixed part of the record, signature included
    pub const FIXED_SIZE: u64 = 46;

    /// Read a central directory header, starting at its signature
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(Error::invalid_format(format!(
                "Invalid central directory signature 0x{signature:08X}"
            )));
        }

        let version_made_by = reader.read_u16::<LittleEndian>()?;
        let version_needed = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let method = reader.read_u16::<LittleEndian>()?;
        let time = reader.read_u16::<LittleEndian>()?;
        let date = reader.read_u16::<LittleEndian>()?;
        let crc32 = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let name_len = reader.read_u16::<LittleEndian>()?;
        let extra_len = reader.read_u16::<LittleEndian>()?;
        let comment_len = reader.read_u16::<LittleEndian>()?;
        let disk_start = reader.read_u16::<LittleEndian>()?;
        let internal_attributes = reader.read_u16::<LittleEndian>()?;
        let external_attributes = reader.read_u32::<LittleEndian>()?;
        let local_header_offset = reader.read_u32::<LittleEndian>()?;

        let name = read_bytes(reader, name_len)?;
        let extra = read_bytes(reader, extra_len)?;
        let comment = read_bytes(reader, comment_len)?;

        if compressed_size == u32::MAX
            || uncompressed_size == u32::MAX
            || local_header_offset == u32::MAX
        {
            return Err(Error::unsupported("ZIP64 entry sizes"));
        }

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            method,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            name,
            extra,
            comment,
        })
    }

    /// Write this header, returning the number of bytes written
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        writer.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.modified.time)?;
        writer.write_u16::<LittleEndian>(self.modified.date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(field_len(&self.name, "entry name")?)?;
        writer.write_u16::<LittleEndian>(field_len(&self.extra, "extra field")?)?;
        writer.write_u16::<LittleEndian>(field_len(&self.comment, "entry comment")?)?;
        writer.write_u16::<LittleEndian>(self.disk_start)?;
        writer.write_u16::<LittleEndian>(self.internal_attributes)?;
        writer.write_u32::<LittleEndian>(self.external_attributes)?;
        writer.write_u32::<LittleEndian>(self.local_header_offset)?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        writer.write_all(&self.comment)?;

        Ok(Self::FIXED_SIZE
            + self.name.len() as u64
            + self.extra.len() as u64
            + self.comment.len() as u64)
    }

    /// Unix permission bits carried in the external attributes, if the entry was written on unix
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        if self.version_made_by >> 8 == 3 && mode != 0 {
            Some(mode)
        } else {
            None
        }
    }
}

/// Trailer that locates the central directory
#[derive(Debug, Clone, Default)]
pub struct EndOfCentralDirectory {
    /// Number of this disk
    pub disk_number: u16,
    /// Disk where the central directory starts
    pub central_directory_disk: u16,
    /// Central directory entries on this disk
    pub entries_on_disk: u16,
    /// Total central directory entries
    pub total_entries: u16,
    /// Size of the central directory in bytes
    pub central_directory_size: u32,
    /// Offset of the central directory from the start of the archive
    pub central_directory_offset: u32,
    /// Archive comment
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Size of the fixed part of the record, signature included
    pub const FIXED_SIZE: u64 = 22;

    /// Scan backwards from the end of the stream for the record
    ///
    /// Returns the record together with its absolute offset.
    pub fn locate<R: Read + Seek>(reader: &mut R) -> Result<(u64, Self)> {
        let archive_len = reader.seek(SeekFrom::End(0))?;
        if archive_len < Self::FIXED_SIZE {
            return Err(Error::MissingEndOfCentralDirectory);
        }

        let window = archive_len.min(Self::FIXED_SIZE + MAX_COMMENT_LEN);
        let window_start = archive_len - window;
        reader.seek(SeekFrom::Start(window_start))?;
        let mut tail = vec![0u8; window as usize];
        reader.read_exact(&mut tail)?;

        let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
        let last_candidate = tail.len() - Self::FIXED_SIZE as usize;

        for pos in (0..=last_candidate).rev() {
            if tail[pos..pos + 4] != signature {
                continue;
            }

            let comment_len = u16::from_le_bytes([tail[pos + 20], tail[pos + 21]]) as usize;
            if pos + Self::FIXED_SIZE as usize + comment_len > tail.len() {
                log::trace!("Skipping end of central directory candidate at {pos}: comment overruns");
                continue;
            }

            let record = Self::read(&mut &tail[pos..])?;
            let offset = window_start + pos as u64;
            record.check_supported(reader, offset)?;
            return Ok((offset, record));
        }

        Err(Error::MissingEndOfCentralDirectory)
    }

    /// Read the record, starting at its signature
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return Err(Error::invalid_format(format!(
                "Invalid end of central directory signature 0x{signature:08X}"
            )));
        }

        let disk_number = reader.read_u16::<LittleEndian>()?;
        let central_directory_disk = reader.read_u16::<LittleEndian>()?;
        let entries_on_disk = reader.read_u16::<LittleEndian>()?;
        let total_entries = reader.read_u16::<LittleEndian>()?;
        let central_directory_size = reader.read_u32::<LittleEndian>()?;
        let central_directory_offset = reader.read_u32::<LittleEndian>()?;
        let comment_len = reader.read_u16::<LittleEndian>()?;
        let comment = read_bytes(reader, comment_len)?;

        Ok(Self {
            disk_number,
            central_directory_disk,
            entries_on_disk,
            total_entries,
            central_directory_size,
            central_directory_offset,
            comment,
        })
    }

    /// Write the record, returning the number of bytes written
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        writer.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.disk_number)?;
        writer.write_u16::<LittleEndian>(self.central_directory_disk)?;
        writer.write_u16::<LittleEndian>(self.entries_on_disk)?;
        writer.write_u16::<LittleEndian>(self.total_entries)?;
        writer.write_u32::<LittleEndian>(self.central_directory_size)?;
        writer.write_u32::<LittleEndian>(self.central_directory_offset)?;
        writer.write_u16::<LittleEndian>(field_len(&self.comment, "archive comment")?)?;
        writer.write_all(&self.comment)?;

        Ok(Self::FIXED_SIZE + self.comment.len() as u64)
    }

    fn check_supported<R: Read + Seek>(&self, reader: &mut R, offset: u64) -> Result<()> {
        if self.disk_number != 0 || self.central_directory_disk != 0 {
            return Err(Error::unsupported("multi-disk archives"));
        }

        if self.total_entries == u16::MAX
            || self.central_directory_size == u32::MAX
            || self.central_directory_offset == u32::MAX
        {
            return Err(Error::unsupported("ZIP64 archives"));
        }

        // A ZIP64 locator sits 20 bytes before the classic record
        if offset >= 20 {
            reader.seek(SeekFrom::Start(offset - 20))?;
            if reader.read_u32::<LittleEndian>()? == ZIP64_LOCATOR_SIGNATURE {
                return Err(Error::unsupported("ZIP64 archives"));
            }
        }

        Ok(())
    }
}

fn read_bytes<R: Read>(reader: &mut R, len: u16) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; usize::from(len)];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn field_len(field: &[u8], what: &str) -> Result<u16> {
    u16::try_from(field.len())
        .map_err(|_| Error::CapacityExceeded(format!("{what} longer than 65535 bytes")))
}

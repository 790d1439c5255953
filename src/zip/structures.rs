use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, NaiveDate, Utc};
use std::io::Cursor;

use anyhow::{Result, bail};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }
}

/// End of Central Directory (EOCD), 22 bytes plus the archive comment.
///
/// Multi-disk fields are read past; only single-disk archives are supported.
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let what = "Invalid End of Central Directory";
        let mut cursor = record(data, Self::SIGNATURE, Self::SIZE, what)?;
        cursor.set_position(8);
        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Saturated fields mean the real values live in the ZIP64 record.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == u16::MAX
            || self.total_entries == u16::MAX
            || self.cd_size == u32::MAX
            || self.cd_offset == u32::MAX
    }
}

/// ZIP64 End of Central Directory Locator, 20 bytes.
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = record(data, Self::SIGNATURE, Self::SIZE, "Invalid ZIP64 format")?;
        cursor.set_position(8);
        Ok(Self {
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory, 56 bytes plus extensible data.
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = record(data, Self::SIGNATURE, Self::MIN_SIZE, "Invalid ZIP64 format")?;
        cursor.set_position(32);
        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Checks length and signature of a fixed record.
fn record<'a>(
    data: &'a [u8],
    signature: &[u8],
    size: usize,
    what: &str,
) -> Result<Cursor<&'a [u8]>> {
    if data.len() < size || &data[..4] != signature {
        bail!("{what}");
    }
    Ok(Cursor::new(data))
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// General purpose flag bits
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
pub const FLAG_UTF8: u16 = 1 << 11;

/// Extra field header IDs
pub const EXTRA_ZIP64: u16 = 0x0001;
pub const EXTRA_TIMESTAMP: u16 = 0x5455;

/// Host systems in the upper byte of "version made by"
const CREATOR_FAT: u16 = 0;
const CREATOR_UNIX: u16 = 3;
const CREATOR_NTFS: u16 = 11;
const CREATOR_VFAT: u16 = 14;
const CREATOR_MACOSX: u16 = 19;

/// Parsed central directory entry. The name is kept as raw bytes; see
/// [`NameDecoder`](super::NameDecoder) for turning it into text.
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub raw_name: Vec<u8>,
    pub version_made_by: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub external_attrs: u32,
    /// Modification time from the extended timestamp extra field
    pub unix_mtime: Option<i64>,
}

impl ZipFileEntry {
    /// Directory entries end with '/'
    pub fn is_directory(&self) -> bool {
        self.raw_name.ends_with(b"/")
    }

    /// Whether the language encoding flag marks the name as UTF-8
    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Permission bits to apply on extraction
    pub fn mode(&self) -> u32 {
        let mode = match self.version_made_by >> 8 {
            CREATOR_UNIX | CREATOR_MACOSX => (self.external_attrs >> 16) & 0o777,
            CREATOR_FAT | CREATOR_NTFS | CREATOR_VFAT => {
                if self.is_directory() {
                    0o777
                } else if self.external_attrs & 0x01 != 0 {
                    0o444
                } else {
                    0o666
                }
            }
            _ => 0,
        };
        match mode {
            0 if self.is_directory() => 0o755,
            0 => 0o644,
            mode => mode,
        }
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Modification time, preferring the extended timestamp over the MS-DOS
    /// fields (which carry no zone and are taken as UTC).
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        if let Some(secs) = self.unix_mtime {
            return DateTime::from_timestamp(secs, 0);
        }
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())?
            .and_hms_opt(hour.into(), minute.into(), second.into())
            .map(|t| t.and_utc())
    }
}

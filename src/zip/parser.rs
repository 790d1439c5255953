//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Entry names are returned as raw bytes. Legacy archives store them in
//! whatever code page the creating system used, so decoding is left to
//! [`NameDecoder`](super::NameDecoder).

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser over any [`ReadAt`] source.
///
/// Typically used through [`ZipArchive`](super::ZipArchive)
/// rather than directly.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the End of Central Directory record, returning it together
    /// with its offset.
    ///
    /// The record is followed only by the archive comment, so the tail of the
    /// archive is scanned backwards for a signature whose comment length
    /// reaches exactly to the end.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let tail_len = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let tail_start = self.size - tail_len;
        let mut tail = vec![0u8; tail_len as usize];
        self.reader.read_exact_at(tail_start, &mut tail).await?;

        let Some(last) = tail.len().checked_sub(EndOfCentralDirectory::SIZE) else {
            bail!("Not a valid ZIP file");
        };
        for i in (0..=last).rev() {
            if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let eocd = EndOfCentralDirectory::from_bytes(&tail[i..])?;
            if eocd.comment_len as usize == last - i {
                return Ok((eocd, tail_start + i as u64));
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Read the ZIP64 record through the locator that sits right before the
    /// regular EOCD at `eocd_offset`.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            bail!("Invalid ZIP64 format");
        };
        let mut buf = [0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut buf[..Zip64EOCDLocator::SIZE])
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&buf[..Zip64EOCDLocator::SIZE])?;

        self.reader.read_exact_at(locator.eocd64_offset, &mut buf).await?;
        Zip64EOCD::from_bytes(&buf)
    }

    /// Read every Central Directory entry, in archive order.
    pub async fn entries(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > self.size) {
            bail!("Central Directory lies outside the archive");
        }
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        // the count comes from the archive, so don't trust it for allocation
        let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
        let mut cursor = Cursor::new(&cd_data);

        for _ in 0..total_entries {
            let entry = self.parse_cdfh(&mut cursor)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse one Central Directory File Header at the cursor position.
    fn parse_cdfh(&self, cursor: &mut Cursor<&Vec<u8>>) -> Result<ZipFileEntry> {
        let len = cursor.get_ref().len() as u64;
        if len.saturating_sub(cursor.position()) < CDFH_MIN_SIZE as u64 {
            bail!("Central Directory ends inside a file header");
        }
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            bail!("Invalid Central Directory File Header");
        }

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        // The name stays raw: its charset is only known to the caller
        let mut raw_name = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut raw_name)?;

        let extra_field_end = cursor.position() + extra_field_length as u64;
        let mut unix_mtime = None;

        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()?;
            let field_end = (cursor.position() + field_size as u64).min(extra_field_end);

            match header_id {
                EXTRA_ZIP64 => {
                    // Fields are present only if corresponding header field is 0xFFFFFFFF
                    if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                        uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                    }
                    if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                        compressed_size = cursor.read_u64::<LittleEndian>()?;
                    }
                    if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                        lfh_offset = cursor.read_u64::<LittleEndian>()?;
                    }
                }
                EXTRA_TIMESTAMP => {
                    // Flags byte, then mtime when bit 0 is set
                    if cursor.position() + 5 <= field_end {
                        let ts_flags = cursor.read_u8()?;
                        if ts_flags & 0x01 != 0 {
                            unix_mtime = Some(cursor.read_i32::<LittleEndian>()? as i64);
                        }
                    }
                }
                _ => {}
            }
            cursor.set_position(field_end);
        }

        // the comment is not needed
        cursor.set_position(extra_field_end + file_comment_length as u64);

        Ok(ZipFileEntry {
            raw_name,
            version_made_by,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            external_attrs,
            unix_mtime,
        })
    }

    /// Offset of an entry's (possibly compressed) data.
    ///
    /// The Local File Header repeats the name and carries its own extra
    /// field, whose length may differ from the central directory's.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh).await?;
        if &lfh[0..4] != LFH_SIGNATURE {
            bail!("Invalid Local File Header");
        }

        let name_len = u16::from_le_bytes([lfh[26], lfh[27]]) as u64;
        let extra_len = u16::from_le_bytes([lfh[28], lfh[29]]) as u64;
        Ok(entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len)
    }

    /// The underlying data source.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

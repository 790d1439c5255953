use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use flate2::Crc;
use flate2::read::DeflateDecoder;
use tracing::debug;

use crate::error::ExtractError;
use crate::io::ReadAt;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Initial output capacity is capped so a lying header cannot force a huge
/// allocation up front.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Archive walker: entry metadata plus verified entry contents.
pub struct ZipArchive<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipArchive<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// All entries in central directory order
    pub async fn entries(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.entries().await
    }

    /// Read an entry's contents into memory, inflating and checking the
    /// CRC-32. `name` is the decoded entry name used in errors.
    pub async fn read_data(&self, entry: &ZipFileEntry, name: &str) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            return Err(unsupported(name, "encrypted"));
        }

        let data_offset = self.parser.get_data_offset(entry).await?;
        let len = usize::try_from(entry.compressed_size)
            .with_context(|| format!("{name}: entry too large"))?;
        let mut raw = vec![0u8; len];
        self.parser
            .reader()
            .read_exact_at(data_offset, &mut raw)
            .await
            .with_context(|| format!("Cannot read data of {name}"))?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let mut out =
                    Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
                DeflateDecoder::new(raw.as_slice())
                    .read_to_end(&mut out)
                    .with_context(|| format!("Cannot inflate {name}"))?;
                out
            }
            CompressionMethod::Unknown(method) => {
                return Err(unsupported(name, &format!("compression method {method}")));
            }
        };

        if data.len() as u64 != entry.uncompressed_size {
            bail!(
                "{}: size mismatch (expected {} bytes, got {})",
                name,
                entry.uncompressed_size,
                data.len()
            );
        }

        let mut crc = Crc::new();
        crc.update(&data);
        if crc.sum() != entry.crc32 {
            return Err(ExtractError::Checksum {
                name: name.to_string(),
                expected: entry.crc32,
                actual: crc.sum(),
            }
            .into());
        }

        debug!(name, bytes = data.len(), "read entry data");
        Ok(data)
    }
}

fn unsupported(name: &str, reason: &str) -> anyhow::Error {
    ExtractError::Unsupported {
        name: name.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

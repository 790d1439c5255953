//! Entry name decoding.

use std::io::Cursor;

use crate::error::ConvertError;
use crate::iconv::ConvReader;
use crate::iconv::engine::E_OUTPUT;

use super::structures::ZipFileEntry;

/// Names rarely exceed a path component or two.
const NAME_CHUNK_SIZE: usize = 256;

/// Turns raw entry names into UTF-8 text.
///
/// Two converters are opened once and rebound to each name with
/// [`ConvReader::reset`]: one for the archive's declared charset and one for
/// entries that carry the UTF-8 flag. The name buffer handed back by `reset`
/// is reused for the next name.
pub struct NameDecoder {
    declared: ConvReader<Cursor<Vec<u8>>>,
    flagged: ConvReader<Cursor<Vec<u8>>>,
    scratch: Vec<u8>,
}

impl NameDecoder {
    pub fn new(charset: &str) -> Result<Self, ConvertError> {
        Self::with_chunk_size(charset, NAME_CHUNK_SIZE)
    }

    pub fn with_chunk_size(charset: &str, chunk_size: usize) -> Result<Self, ConvertError> {
        let open = |from: &str| {
            ConvReader::with_chunk_size(Cursor::new(Vec::new()), from, "utf-8", chunk_size)
        };
        Ok(Self {
            declared: open(charset)?,
            flagged: open("utf-8")?,
            scratch: Vec::new(),
        })
    }

    /// Decodes the entry's name, honoring its UTF-8 flag.
    pub fn decode(&mut self, entry: &ZipFileEntry) -> Result<String, ConvertError> {
        self.decode_raw(&entry.raw_name, entry.is_utf8())
    }

    pub fn decode_raw(&mut self, raw: &[u8], utf8: bool) -> Result<String, ConvertError> {
        let conv = if utf8 {
            &mut self.flagged
        } else {
            &mut self.declared
        };

        let mut input = std::mem::take(&mut self.scratch);
        input.clear();
        input.extend_from_slice(raw);
        self.scratch = conv.reset(Cursor::new(input)).into_inner();

        let mut out = Vec::with_capacity(raw.len() * 3 / 2);
        conv.read_all_into(&mut out)?;
        String::from_utf8(out).map_err(|_| ConvertError::EngineFailure {
            code: E_OUTPUT,
            offset: conv.position(),
        })
    }
}

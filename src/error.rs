//! Error types for charset conversion and archive extraction.

use std::fmt;
use std::io;

use thiserror::Error;

/// Up to this many bytes of the offending input are kept in a diagnostic window.
pub const WINDOW_LEN: usize = 10;

/// A short copy of the input bytes around a conversion failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteWindow(Vec<u8>);

impl ByteWindow {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes[..bytes.len().min(WINDOW_LEN)].to_vec())
    }

    /// `head` followed by as much of `tail` as fits.
    pub fn joined(head: &[u8], tail: &[u8]) -> Self {
        let mut bytes = head[..head.len().min(WINDOW_LEN)].to_vec();
        let room = WINDOW_LEN - bytes.len();
        bytes.extend_from_slice(&tail[..tail.len().min(room)]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02x}")?;
        }
        f.write_str("]")
    }
}

/// Errors reported by a conversion session or a streaming converter.
///
/// Once a [`ConvReader`](crate::ConvReader) reports one of the stream errors it
/// keeps reporting the same value until it is reset, so the type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("unknown charset {0:?}")]
    UnknownCharset(String),

    #[error("charset {0} cannot be used as a conversion target")]
    UnsupportedTarget(String),

    #[error("chunk size must be positive")]
    InvalidChunkSize,

    /// The input does not form a valid sequence in the source charset.
    #[error("invalid byte sequence {window} at offset {offset}")]
    InvalidSequence { offset: u64, window: ByteWindow },

    /// The input ended in the middle of a multibyte sequence.
    #[error("truncated byte sequence {window} at end of input (offset {offset})")]
    IncompleteSequence { offset: u64, window: ByteWindow },

    /// A decoded character has no representation in the target charset.
    #[error("character {ch:?} cannot be encoded in the target charset (input offset {offset})")]
    Unmappable { ch: char, offset: u64 },

    #[error("reading input failed at offset {offset}: {message}")]
    UpstreamRead {
        kind: io::ErrorKind,
        message: String,
        offset: u64,
    },

    #[error("conversion engine failed with code {code} at offset {offset}")]
    EngineFailure { code: i32, offset: u64 },

    /// The input made no progress and did not signal end of stream.
    #[error("input stalled at offset {offset} before end of stream")]
    Stalled { offset: u64 },
}

impl ConvertError {
    pub(crate) fn upstream(err: &io::Error, offset: u64) -> Self {
        Self::UpstreamRead {
            kind: err.kind(),
            message: err.to_string(),
            offset,
        }
    }

    /// Input offset the error refers to, for stream errors.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::InvalidSequence { offset, .. }
            | Self::IncompleteSequence { offset, .. }
            | Self::Unmappable { offset, .. }
            | Self::UpstreamRead { offset, .. }
            | Self::EngineFailure { offset, .. }
            | Self::Stalled { offset } => Some(*offset),
            _ => None,
        }
    }
}

impl From<ConvertError> for io::Error {
    fn from(err: ConvertError) -> Self {
        let kind = match &err {
            ConvertError::UpstreamRead { kind, .. } => *kind,
            ConvertError::Stalled { .. } => io::ErrorKind::WouldBlock,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Fatal extraction failures that callers may want to tell apart.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<ExtractError>()`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot decode entry name {raw}: {source}")]
    Name {
        raw: ByteWindow,
        #[source]
        source: ConvertError,
    },

    #[error("cannot decode contents of {name}: {source}")]
    Content {
        name: String,
        #[source]
        source: ConvertError,
    },

    #[error("entry name {0:?} escapes the extraction directory")]
    UnsafePath(String),

    #[error("would overwrite {0}")]
    Conflict(String),

    #[error("{name}: CRC-32 mismatch (expected {expected:08x}, got {actual:08x})")]
    Checksum {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("{name}: unsupported entry ({reason})")]
    Unsupported { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_truncated_and_hex_formatted() {
        let w = ByteWindow::new(&[0xff, 0x00, 0x41, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(w.as_bytes().len(), WINDOW_LEN);
        assert_eq!(w.to_string(), "[ff 00 41 01 02 03 04 05 06 07]");
        assert_eq!(ByteWindow::default().to_string(), "[]");

        let w = ByteWindow::joined(&[0x81, 0x30], &[0xff; 20]);
        assert_eq!(w.to_string(), "[81 30 ff ff ff ff ff ff ff ff]");
    }

    #[test]
    fn io_error_keeps_kind_and_source() {
        let err = ConvertError::InvalidSequence {
            offset: 3,
            window: ByteWindow::new(&[0xff]),
        };
        let io_err: io::Error = err.clone().into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<ConvertError>())
            .unwrap();
        assert_eq!(inner, &err);

        let upstream = ConvertError::upstream(&io::ErrorKind::BrokenPipe.into(), 7);
        assert_eq!(upstream.offset(), Some(7));
        assert_eq!(io::Error::from(upstream).kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn messages_carry_offset_and_window() {
        let err = ConvertError::InvalidSequence {
            offset: 2,
            window: ByteWindow::new(b"\xffcd"),
        };
        assert_eq!(err.to_string(), "invalid byte sequence [ff 63 64] at offset 2");
        assert_eq!(
            ExtractError::Conflict("a.txt".into()).to_string(),
            "would overwrite a.txt"
        );
    }
}

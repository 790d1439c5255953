//! Conversion sessions backed by `encoding_rs`.
//!
//! A [`Session`] behaves like a native converter handle: it is fed one input
//! slice and one output slice at a time and reports how much of each it used
//! together with a [`Status`]. Decoders keep partial multibyte sequences and
//! shift state internally between calls, so a caller only sees
//! [`Status::Incomplete`] from [`Session::finish`], once no more input can
//! arrive.

use std::fmt;
use std::str;

use encoding_rs::{Decoder, DecoderResult, Encoder, EncoderResult, Encoding, UTF_8};

use crate::error::ConvertError;

/// Size of the UTF-8 staging buffer used when the target is not UTF-8.
const STAGE_LEN: usize = 1024;

/// `convert` was called after `finish` without a `reset`.
pub const E_FINISHED: i32 = 1;
/// The staging buffer held something other than whole UTF-8 characters.
pub const E_STAGE: i32 = 2;
/// A UTF-8 target produced bytes that are not valid UTF-8.
pub const E_OUTPUT: i32 = 3;

/// Outcome of a single engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All input was consumed.
    Ok,
    /// The output slice cannot take the next character.
    OutputFull,
    /// `len` malformed bytes were found; `trailing` bytes after them were also consumed.
    Invalid { len: usize, trailing: usize },
    /// Input ended inside a multibyte sequence of `len` already consumed bytes.
    Incomplete { len: usize },
    /// The decoded character has no mapping in the target charset.
    Unmappable(char),
    Failure(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub status: Status,
    pub consumed: usize,
    pub produced: usize,
}

impl Step {
    fn new(status: Status, consumed: usize, produced: usize) -> Self {
        Self {
            status,
            consumed,
            produced,
        }
    }
}

/// Resolves a charset label; an empty label means UTF-8.
pub fn lookup(label: &str) -> Result<&'static Encoding, ConvertError> {
    let label = label.trim();
    if label.is_empty() {
        return Ok(UTF_8);
    }
    Encoding::for_label(label.as_bytes()).ok_or_else(|| ConvertError::UnknownCharset(label.into()))
}

/// Malformed input found while staged text was still waiting to be encoded.
#[derive(Debug, Clone, Copy)]
struct Held {
    len: usize,
    trailing: usize,
    /// Bytes the decoder consumed that have not been reported yet.
    unreported: usize,
}

/// One live conversion handle for a `(from, to)` charset pair.
pub struct Session {
    from: &'static Encoding,
    to: &'static Encoding,
    decoder: Decoder,
    /// `None` when the target is UTF-8 and decoding alone suffices.
    encoder: Option<Encoder>,
    stage: Box<[u8]>,
    stage_pos: usize,
    stage_len: usize,
    held: Option<Held>,
    decoder_done: bool,
    encoder_done: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("from", &self.from.name())
            .field("to", &self.to.name())
            .field("staged", &(self.stage_len - self.stage_pos))
            .field("decoder_done", &self.decoder_done)
            .field("encoder_done", &self.encoder_done)
            .finish()
    }
}

impl Session {
    pub fn open(from: &str, to: &str) -> Result<Self, ConvertError> {
        let from = lookup(from)?;
        let to = lookup(to)?;
        if to.output_encoding() != to {
            return Err(ConvertError::UnsupportedTarget(to.name().into()));
        }

        let encoder = (to != UTF_8).then(|| to.new_encoder());
        let stage = if encoder.is_some() {
            vec![0u8; STAGE_LEN].into_boxed_slice()
        } else {
            Box::default()
        };

        Ok(Self {
            from,
            to,
            decoder: from.new_decoder_without_bom_handling(),
            encoder,
            stage,
            stage_pos: 0,
            stage_len: 0,
            held: None,
            decoder_done: false,
            encoder_done: false,
        })
    }

    pub fn source(&self) -> &'static Encoding {
        self.from
    }

    pub fn target(&self) -> &'static Encoding {
        self.to
    }

    /// Converts as much of `src` into `dst` as possible.
    pub fn convert(&mut self, src: &[u8], dst: &mut [u8]) -> Step {
        if self.decoder_done {
            return Step::new(Status::Failure(E_FINISHED), 0, 0);
        }
        if self.encoder.is_none() {
            let (result, consumed, produced) =
                self.decoder
                    .decode_to_utf8_without_replacement(src, dst, false);
            let status = match result {
                DecoderResult::InputEmpty => Status::Ok,
                DecoderResult::OutputFull => Status::OutputFull,
                DecoderResult::Malformed(len, trailing) => Status::Invalid {
                    len: len.into(),
                    trailing: trailing.into(),
                },
            };
            return Step::new(status, consumed, produced);
        }
        self.transcode(src, dst)
    }

    fn transcode(&mut self, src: &[u8], dst: &mut [u8]) -> Step {
        let mut consumed = 0;
        let mut produced = 0;
        loop {
            match self.drain(&mut dst[produced..], false) {
                (Status::Ok, n) => produced += n,
                (status, n) => return Step::new(status, consumed, produced + n),
            }
            if let Some(held) = self.held.take() {
                let status = Status::Invalid {
                    len: held.len,
                    trailing: held.trailing,
                };
                return Step::new(status, consumed + held.unreported, produced);
            }
            if consumed == src.len() {
                return Step::new(Status::Ok, consumed, produced);
            }

            let (result, read, written) =
                self.decoder
                    .decode_to_utf8_without_replacement(&src[consumed..], &mut self.stage, false);
            self.stage_pos = 0;
            self.stage_len = written;
            match result {
                DecoderResult::InputEmpty | DecoderResult::OutputFull => consumed += read,
                DecoderResult::Malformed(len, trailing) => {
                    // The malformed bytes stay unreported until the text decoded
                    // in front of them has been encoded.
                    let (len, trailing) = (usize::from(len), usize::from(trailing));
                    let keep = read.saturating_sub(len + trailing);
                    self.held = Some(Held {
                        len,
                        trailing,
                        unreported: read - keep,
                    });
                    consumed += keep;
                }
            }
        }
    }

    /// Encodes staged text into `dst`.
    fn drain(&mut self, dst: &mut [u8], last: bool) -> (Status, usize) {
        let Some(encoder) = self.encoder.as_mut() else {
            return (Status::Ok, 0);
        };
        let Ok(text) = str::from_utf8(&self.stage[self.stage_pos..self.stage_len]) else {
            return (Status::Failure(E_STAGE), 0);
        };
        if text.is_empty() && !last {
            self.stage_pos = 0;
            self.stage_len = 0;
            return (Status::Ok, 0);
        }

        let (result, read, written) = encoder.encode_from_utf8_without_replacement(text, dst, last);
        self.stage_pos += read;
        match result {
            EncoderResult::InputEmpty => {
                self.stage_pos = 0;
                self.stage_len = 0;
                if last {
                    self.encoder_done = true;
                }
                (Status::Ok, written)
            }
            EncoderResult::OutputFull => (Status::OutputFull, written),
            EncoderResult::Unmappable(ch) => (Status::Unmappable(ch), written),
        }
    }

    /// Signals the true end of input and flushes whatever the session still holds.
    ///
    /// Returns [`Status::OutputFull`] when `dst` was too small; call again
    /// with fresh space. [`Status::Ok`] means the session is drained.
    pub fn finish(&mut self, dst: &mut [u8]) -> Step {
        if self.encoder.is_none() {
            if self.decoder_done {
                return Step::new(Status::Ok, 0, 0);
            }
            let (result, _, produced) = self
                .decoder
                .decode_to_utf8_without_replacement(&[], dst, true);
            let status = match result {
                DecoderResult::InputEmpty => {
                    self.decoder_done = true;
                    Status::Ok
                }
                DecoderResult::OutputFull => Status::OutputFull,
                DecoderResult::Malformed(len, _) => Status::Incomplete { len: len.into() },
            };
            return Step::new(status, 0, produced);
        }

        let mut produced = 0;
        match self.drain(dst, false) {
            (Status::Ok, n) => produced += n,
            (status, n) => return Step::new(status, 0, n),
        }
        if let Some(held) = self.held.take() {
            let status = Status::Invalid {
                len: held.len,
                trailing: held.trailing,
            };
            return Step::new(status, held.unreported, produced);
        }
        if !self.decoder_done {
            let (result, _, written) =
                self.decoder
                    .decode_to_utf8_without_replacement(&[], &mut self.stage, true);
            self.stage_pos = 0;
            self.stage_len = written;
            match result {
                DecoderResult::InputEmpty => self.decoder_done = true,
                DecoderResult::OutputFull => {
                    return Step::new(Status::Failure(E_STAGE), 0, produced);
                }
                DecoderResult::Malformed(len, _) => {
                    let status = Status::Incomplete { len: len.into() };
                    return Step::new(status, 0, produced);
                }
            }
        }
        if self.encoder_done {
            return Step::new(Status::Ok, 0, produced);
        }
        let (status, n) = self.drain(&mut dst[produced..], true);
        Step::new(status, 0, produced + n)
    }

    /// Clears shift state and anything staged so the session can start a new input.
    pub fn reset(&mut self) {
        self.decoder = self.from.new_decoder_without_bom_handling();
        if let Some(encoder) = self.encoder.as_mut() {
            *encoder = self.to.new_encoder();
        }
        self.stage_pos = 0;
        self.stage_len = 0;
        self.held = None;
        self.decoder_done = false;
        self.encoder_done = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_label_is_utf8() {
        assert_eq!(lookup("").unwrap(), UTF_8);
        assert_eq!(lookup("  ").unwrap(), UTF_8);
        assert_eq!(lookup("utf8").unwrap(), UTF_8);
        assert_eq!(lookup("GB18030").unwrap(), encoding_rs::GB18030);
        assert_eq!(
            lookup("klingon").unwrap_err(),
            ConvertError::UnknownCharset("klingon".into())
        );
    }

    #[test]
    fn utf16_is_not_a_target() {
        assert!(matches!(
            Session::open("", "utf-16le"),
            Err(ConvertError::UnsupportedTarget(_))
        ));
        assert!(Session::open("utf-16le", "").is_ok());
    }

    #[test]
    fn decode_reports_counts() {
        let mut s = Session::open("gb18030", "").unwrap();
        let mut out = [0u8; 32];
        let step = s.convert(b"a\xb2\xe2", &mut out);
        assert_eq!(step, Step::new(Status::Ok, 3, 4));
        assert_eq!(&out[..4], "a测".as_bytes());
    }

    #[test]
    fn split_sequence_is_held_by_the_decoder() {
        let mut s = Session::open("gb18030", "").unwrap();
        let mut out = [0u8; 32];
        assert_eq!(s.convert(b"\xb2", &mut out), Step::new(Status::Ok, 1, 0));
        assert_eq!(s.convert(b"\xe2", &mut out), Step::new(Status::Ok, 1, 3));
        assert_eq!(&out[..3], "测".as_bytes());
        assert_eq!(s.finish(&mut out).status, Status::Ok);
    }

    #[test]
    fn finish_reports_incomplete() {
        let mut s = Session::open("gb18030", "").unwrap();
        let mut out = [0u8; 32];
        s.convert(b"\xb2", &mut out);
        assert_eq!(s.finish(&mut out).status, Status::Incomplete { len: 1 });

        let mut s = Session::open("gb18030", "").unwrap();
        assert_eq!(s.convert(b"a\x81\x30\x81", &mut out), Step::new(Status::Ok, 4, 1));
        assert_eq!(s.finish(&mut out).status, Status::Incomplete { len: 3 });

        // same count when the target needs the staging buffer
        let mut s = Session::open("", "gbk").unwrap();
        s.convert(b"ab\xe6\xb5", &mut out);
        assert_eq!(s.finish(&mut out).status, Status::Incomplete { len: 2 });
    }

    #[test]
    fn output_full_when_character_does_not_fit() {
        let mut s = Session::open("gb18030", "").unwrap();
        let mut out = [0u8; 2];
        let step = s.convert(b"\xb2\xe2", &mut out);
        assert_eq!(step.status, Status::OutputFull);
        assert_eq!(step.produced, 0);
    }

    #[test]
    fn convert_after_finish_is_a_failure() {
        let mut s = Session::open("", "").unwrap();
        let mut out = [0u8; 8];
        assert_eq!(s.finish(&mut out).status, Status::Ok);
        assert_eq!(
            s.convert(b"a", &mut out).status,
            Status::Failure(E_FINISHED)
        );
        s.reset();
        assert_eq!(s.convert(b"a", &mut out), Step::new(Status::Ok, 1, 1));
    }

    #[test]
    fn transcode_to_legacy_target() {
        let mut s = Session::open("utf-8", "gb18030").unwrap();
        let mut out = [0u8; 16];
        let src = "测试".as_bytes();
        let step = s.convert(src, &mut out);
        assert_eq!(step, Step::new(Status::Ok, src.len(), 4));
        assert_eq!(&out[..4], b"\xb2\xe2\xca\xd4");
        assert_eq!(s.finish(&mut out[4..]), Step::new(Status::Ok, 0, 0));
    }

    #[test]
    fn transcode_stages_text_when_output_is_short() {
        let mut s = Session::open("utf-8", "gb18030").unwrap();
        let src = "测试".as_bytes();
        let mut out = [0u8; 4];
        let mut all = Vec::new();
        let mut step = s.convert(src, &mut out);
        assert_eq!(step.consumed, src.len());
        all.extend_from_slice(&out[..step.produced]);
        while step.status == Status::OutputFull {
            step = s.convert(&[], &mut out);
            assert_eq!(step.consumed, 0);
            all.extend_from_slice(&out[..step.produced]);
        }
        assert_eq!(step.status, Status::Ok);
        assert_eq!(all, b"\xb2\xe2\xca\xd4");
    }

    #[test]
    fn transcode_holds_malformed_bytes_until_staged_text_is_written() {
        let mut s = Session::open("utf-8", "gb18030").unwrap();
        let src = b"\xe6\xb5\x8b\xff";
        let mut out = [0u8; 1];
        let first = s.convert(src, &mut out);
        assert_eq!(first.status, Status::OutputFull);
        assert_eq!(first.consumed, 3);

        let mut out = [0u8; 8];
        let second = s.convert(&src[3..], &mut out);
        assert_eq!(second.status, Status::Invalid { len: 1, trailing: 0 });
        assert_eq!(second.consumed, 1);
        assert_eq!(&out[..second.produced], b"\xb2\xe2");
    }

    #[test]
    fn unmappable_character() {
        let mut s = Session::open("utf-8", "shift_jis").unwrap();
        let mut out = [0u8; 16];
        let step = s.convert("a😀".as_bytes(), &mut out);
        assert_eq!(step.status, Status::Unmappable('😀'));
    }

    #[test]
    fn stateful_target_emits_closing_shift() {
        let mut s = Session::open("utf-8", "iso-2022-jp").unwrap();
        let mut out = [0u8; 32];
        let step = s.convert("日".as_bytes(), &mut out);
        assert_eq!(step.status, Status::Ok);
        let tail = s.finish(&mut out[step.produced..]);
        assert_eq!(tail.status, Status::Ok);
        let all = &out[..step.produced + tail.produced];
        assert!(all.starts_with(b"\x1b$B"));
        assert!(all.ends_with(b"\x1b(B"));
    }
}

use std::io::{self, Read};
use std::mem;

use tracing::debug;

use super::engine::{Session, Status};
use crate::error::{ByteWindow, ConvertError};

/// Pending buffer size used when none is given.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Output windows at least this long are converted in place.
///
/// Shorter windows are served from an internal spill buffer of this size, so
/// even one-byte reads make progress.
pub const MIN_WINDOW: usize = 16;

/// Consumed bytes remembered for error windows after they leave the pending
/// buffer. Covers the longest malformed sequence plus its trailing bytes.
const HISTORY: usize = 8;

/// Result of one [`ConvReader::pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pull {
    pub written: usize,
    pub end_of_stream: bool,
}

/// A pull-based reader that converts a byte stream from one charset to another.
///
/// Input is read into a fixed pending buffer of `chunk_size` bytes and fed to
/// a conversion [`Session`]. Bytes the session could not take yet stay pending
/// for the next call. Multibyte sequences split across input reads are carried
/// by the session's decoder, and only at the real end of input does a dangling
/// sequence become [`ConvertError::IncompleteSequence`].
///
/// Errors latch: after a failure every pull returns the same error until
/// [`reset`](ConvReader::reset). Bytes converted before the failure are
/// returned by the pull that hit it; the error shows up on the next one.
///
/// # Examples
///
/// ```
/// use unzipconv::ConvReader;
///
/// let src: &[u8] = b"\xb2\xe2\xca\xd4.txt";
/// let mut conv = ConvReader::new(src, "gb18030", "")?;
/// assert_eq!(conv.read_all()?, "测试.txt".as_bytes());
/// # Ok::<(), unzipconv::ConvertError>(())
/// ```
#[derive(Debug)]
pub struct ConvReader<R> {
    input: R,
    session: Session,
    pending: Box<[u8]>,
    start: usize,
    end: usize,
    /// Input bytes consumed by the session since the last reset.
    cursor: u64,
    /// The last `recent_len` consumed bytes, right-aligned.
    recent: [u8; HISTORY],
    recent_len: usize,
    input_ended: bool,
    finished: bool,
    error: Option<ConvertError>,
    spill: Box<[u8]>,
    spill_pos: usize,
    spill_len: usize,
}

impl<R: Read> ConvReader<R> {
    /// Opens a converter from `from` to `to` with the default chunk size.
    ///
    /// An empty charset name means UTF-8.
    pub fn new(input: R, from: &str, to: &str) -> Result<Self, ConvertError> {
        Self::with_chunk_size(input, from, to, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        input: R,
        from: &str,
        to: &str,
        chunk_size: usize,
    ) -> Result<Self, ConvertError> {
        if chunk_size == 0 {
            return Err(ConvertError::InvalidChunkSize);
        }
        let session = Session::open(from, to)?;
        debug!(
            from = session.source().name(),
            to = session.target().name(),
            chunk_size,
            "opened conversion session"
        );
        Ok(Self {
            input,
            session,
            pending: vec![0u8; chunk_size].into_boxed_slice(),
            start: 0,
            end: 0,
            cursor: 0,
            recent: [0; HISTORY],
            recent_len: 0,
            input_ended: false,
            finished: false,
            error: None,
            spill: vec![0u8; MIN_WINDOW].into_boxed_slice(),
            spill_pos: 0,
            spill_len: 0,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.pending.len()
    }

    /// Input bytes consumed since the last reset.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn get_ref(&self) -> &R {
        &self.input
    }

    /// Converts into `out`.
    ///
    /// Fewer bytes than `out.len()` come back when the stream ended, when the
    /// next character does not fit in what is left of `out`, or when the input
    /// had nothing to offer without ending. Only the first case sets
    /// `end_of_stream`.
    pub fn pull(&mut self, out: &mut [u8]) -> Result<Pull, ConvertError> {
        if self.spill_pos < self.spill_len {
            let written = self.unspill(out);
            return Ok(Pull {
                written,
                end_of_stream: false,
            });
        }
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.finished {
            return Ok(Pull {
                written: 0,
                end_of_stream: true,
            });
        }
        if out.is_empty() {
            return Ok(Pull {
                written: 0,
                end_of_stream: false,
            });
        }

        let written = if out.len() >= MIN_WINDOW {
            self.fill(out)
        } else {
            let mut spill = mem::take(&mut self.spill);
            self.spill_len = self.fill(&mut spill);
            self.spill_pos = 0;
            self.spill = spill;
            self.unspill(out)
        };

        match &self.error {
            Some(err) if written == 0 => Err(err.clone()),
            _ => Ok(Pull {
                written,
                end_of_stream: self.finished && self.spill_pos == self.spill_len,
            }),
        }
    }

    fn unspill(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.spill_len - self.spill_pos);
        out[..n].copy_from_slice(&self.spill[self.spill_pos..self.spill_pos + n]);
        self.spill_pos += n;
        n
    }

    /// The pull loop: refill, convert, classify.
    fn fill(&mut self, dst: &mut [u8]) -> usize {
        let mut written = 0;
        loop {
            let refilled = self.refill();
            if self.error.is_some() {
                break;
            }

            if self.start == self.end {
                if !self.input_ended {
                    // nothing arrived and the input has not ended
                    break;
                }
                let step = self.session.finish(&mut dst[written..]);
                written += step.produced;
                match step.status {
                    Status::Ok => self.finished = true,
                    Status::OutputFull => {}
                    status => {
                        let pending = step.consumed.min(self.end - self.start);
                        self.consume(pending);
                        self.cursor += (step.consumed - pending) as u64;
                        self.latch(status);
                    }
                }
                break;
            }

            let step = self
                .session
                .convert(&self.pending[self.start..self.end], &mut dst[written..]);
            self.consume(step.consumed);
            written += step.produced;

            match step.status {
                Status::Ok => {}
                Status::OutputFull => break,
                Status::Incomplete { .. } if !self.input_ended => {}
                status => {
                    self.latch(status);
                    break;
                }
            }
            if !refilled && step.consumed == 0 && step.produced == 0 {
                break;
            }
        }
        written
    }

    /// Tops up the pending buffer with one read. Returns whether anything
    /// changed: new bytes, end of input, or a read failure.
    fn refill(&mut self) -> bool {
        if self.input_ended || self.error.is_some() {
            return false;
        }
        if self.end == self.pending.len() {
            if self.start == 0 {
                return false;
            }
            self.pending.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        loop {
            match self.input.read(&mut self.pending[self.end..]) {
                Ok(0) => {
                    self.input_ended = true;
                    return true;
                }
                Ok(n) => {
                    self.end += n;
                    return true;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.error = Some(ConvertError::upstream(&e, self.cursor));
                    return true;
                }
            }
        }
    }

    /// Marks `n` pending bytes as taken by the session.
    fn consume(&mut self, n: usize) {
        let taken = &self.pending[self.start..self.start + n];
        if n >= HISTORY {
            self.recent.copy_from_slice(&taken[n - HISTORY..]);
        } else {
            self.recent.copy_within(n.., 0);
            self.recent[HISTORY - n..].copy_from_slice(taken);
        }
        self.recent_len = (self.recent_len + n).min(HISTORY);
        self.start += n;
        self.cursor += n as u64;
    }

    /// The last `n` consumed bytes, or as many as are remembered.
    fn consumed_tail(&self, n: usize) -> &[u8] {
        &self.recent[HISTORY - n.min(self.recent_len)..]
    }

    fn latch(&mut self, status: Status) {
        let err = match status {
            Status::Invalid { len, trailing } => {
                let back = len + trailing;
                ConvertError::InvalidSequence {
                    offset: self.cursor.saturating_sub(back as u64),
                    window: ByteWindow::joined(
                        self.consumed_tail(back),
                        &self.pending[self.start..self.end],
                    ),
                }
            }
            Status::Incomplete { len } => ConvertError::IncompleteSequence {
                offset: self.cursor.saturating_sub(len as u64),
                window: ByteWindow::new(self.consumed_tail(len)),
            },
            Status::Unmappable(ch) => ConvertError::Unmappable {
                ch,
                offset: self.cursor,
            },
            Status::Failure(code) => ConvertError::EngineFailure {
                code,
                offset: self.cursor,
            },
            Status::Ok | Status::OutputFull => return,
        };
        debug!(error = %err, "conversion stopped");
        self.error = Some(err);
    }

    /// Pulls until end of stream, appending everything to `out`.
    ///
    /// On error `out` still holds the bytes converted before the failure.
    pub fn read_all_into(&mut self, out: &mut Vec<u8>) -> Result<(), ConvertError> {
        let window = self.pending.len().max(MIN_WINDOW);
        loop {
            let len = out.len();
            out.resize(len + window, 0);
            let pulled = self.pull(&mut out[len..]);
            out.truncate(len + pulled.as_ref().map_or(0, |p| p.written));

            let pull = pulled?;
            if pull.end_of_stream {
                return Ok(());
            }
            if pull.written == 0 {
                return Err(ConvertError::Stalled {
                    offset: self.cursor,
                });
            }
        }
    }

    /// Converts the whole input.
    pub fn read_all(&mut self) -> Result<Vec<u8>, ConvertError> {
        let mut out = Vec::new();
        self.read_all_into(&mut out)?;
        Ok(out)
    }

    /// Rebinds to a new input, clearing all stream state and the session's
    /// shift state. Returns the previous input.
    pub fn reset(&mut self, input: R) -> R {
        self.session.reset();
        self.start = 0;
        self.end = 0;
        self.cursor = 0;
        self.recent_len = 0;
        self.input_ended = false;
        self.finished = false;
        self.error = None;
        self.spill_pos = 0;
        self.spill_len = 0;
        mem::replace(&mut self.input, input)
    }

    /// Releases the session and hands back the input.
    pub fn close(self) -> R {
        self.input
    }
}

/// Converts all of `input` from `from` to `to` in one call.
///
/// ```
/// let utf8 = unzipconv::convert("gbk", "", b"\xd6\xd0\xce\xc4")?;
/// assert_eq!(utf8, "中文".as_bytes());
/// # Ok::<(), unzipconv::ConvertError>(())
/// ```
pub fn convert(from: &str, to: &str, input: &[u8]) -> Result<Vec<u8>, ConvertError> {
    ConvReader::new(input, from, to)?.read_all()
}

impl<R: Read> Read for ConvReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pull = self.pull(buf)?;
        if pull.written == 0 && !pull.end_of_stream && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(pull.written)
    }
}

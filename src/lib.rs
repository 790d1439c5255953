//! # unzipconv
//!
//! Streaming charset conversion, and a ZIP extractor built on it for archives
//! whose entry names are stored in a legacy charset such as GB18030.
//!
//! The core is [`ConvReader`]: a pull-based converter over any
//! [`std::io::Read`] that keeps multibyte sequences intact across read
//! boundaries, tells "output window too small" apart from invalid and
//! truncated input, and can be reset onto a new input without reopening its
//! conversion session.
//!
//! ## Example
//!
//! ```
//! use unzipconv::ConvReader;
//!
//! let mut conv = ConvReader::new(&b"\xb2\xe2\xca\xd4"[..], "gb18030", "")?;
//! assert_eq!(conv.read_all()?, "测试".as_bytes());
//! # Ok::<(), unzipconv::ConvertError>(())
//! ```
//!
//! Extraction goes through [`extract::extract_archive`], which decodes every
//! name with a [`zip::NameDecoder`], stages the output in a temporary
//! directory and moves it into place only when nothing failed.

pub mod cli;
pub mod error;
pub mod extract;
pub mod iconv;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{ByteWindow, ConvertError, ExtractError};
pub use extract::{ExtractOptions, NamedEntry, Report, Warning};
pub use iconv::{ConvReader, Pull, convert};
pub use io::{LocalFileReader, ReadAt};
pub use zip::{NameDecoder, ZipArchive, ZipFileEntry};

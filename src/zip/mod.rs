//! ZIP archive walking.
//!
//! The archive is read from the end: the End of Central Directory record
//! (or its ZIP64 form) locates the Central Directory, which describes every
//! entry. Entry data is only touched when [`ZipArchive::read_data`] is
//! called.
//!
//! - [`structures`]: on-disk records and the parsed [`ZipFileEntry`]
//! - `parser`: EOCD search, ZIP64, central directory and extra fields
//! - `archive`: entry contents (STORED and DEFLATE) with CRC-32 checks
//! - `names`: raw entry names to UTF-8 through the streaming converter
//!
//! Encryption, multi-disk archives and methods other than STORED and
//! DEFLATE are not supported.

mod archive;
mod names;
mod parser;
pub mod structures;

pub use archive::ZipArchive;
pub use names::NameDecoder;
pub use parser::ZipParser;
pub use structures::*;

//! Streaming charset conversion.
//!
//! [`engine`] wraps `encoding_rs` in a converter handle that works on one
//! input slice and one output slice at a time. [`ConvReader`] turns that into
//! a pull-based stream over any [`std::io::Read`], carrying split multibyte
//! sequences across reads and latching the first fatal error.

pub mod engine;
mod reader;

pub use engine::{Session, Status, Step, lookup};
pub use reader::{ConvReader, DEFAULT_CHUNK_SIZE, MIN_WINDOW, Pull, convert};

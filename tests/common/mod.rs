//! Hand-built ZIP archives for the integration tests.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};

pub const FLAG_UTF8: u16 = 1 << 11;

struct Entry {
    name: Vec<u8>,
    data: Vec<u8>,
    flags: u16,
    mode: Option<u32>,
    deflate: bool,
    dos_date: u16,
    dos_time: u16,
    mtime: Option<i32>,
    crc_xor: u32,
}

/// Builder for small in-memory archives. Modifiers apply to the entry added
/// last.
#[derive(Default)]
pub struct ZipWriter {
    entries: Vec<Entry>,
}

impl ZipWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &[u8], data: &[u8]) -> Self {
        self.entries.push(Entry {
            name: name.to_vec(),
            data: data.to_vec(),
            flags: 0,
            mode: None,
            deflate: false,
            // 2020-01-02 03:04:06
            dos_date: ((2020 - 1980) << 9) | (1 << 5) | 2,
            dos_time: (3 << 11) | (4 << 5) | 3,
            mtime: None,
            crc_xor: 0,
        });
        self
    }

    /// Directory names get a trailing '/'.
    pub fn dir(self, name: &[u8]) -> Self {
        let mut name = name.to_vec();
        if !name.ends_with(b"/") {
            name.push(b'/');
        }
        self.file(&name, b"")
    }

    fn last(&mut self) -> &mut Entry {
        self.entries.last_mut().expect("no entry to modify")
    }

    pub fn utf8(mut self) -> Self {
        self.last().flags |= FLAG_UTF8;
        self
    }

    /// Unix permission bits; marks the entry as made on Unix.
    pub fn mode(mut self, mode: u32) -> Self {
        self.last().mode = Some(mode);
        self
    }

    pub fn deflated(mut self) -> Self {
        self.last().deflate = true;
        self
    }

    /// Extended timestamp extra field.
    pub fn mtime(mut self, secs: i32) -> Self {
        self.last().mtime = Some(secs);
        self
    }

    pub fn bad_crc(mut self) -> Self {
        self.last().crc_xor = 0xdead_beef;
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for e in &self.entries {
            let mut crc = Crc::new();
            crc.update(&e.data);
            let crc = crc.sum() ^ e.crc_xor;

            let (method, payload) = if e.deflate {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(&e.data).unwrap();
                (8u16, enc.finish().unwrap())
            } else {
                (0u16, e.data.clone())
            };

            let mut extra = Vec::new();
            if let Some(secs) = e.mtime {
                extra.extend_from_slice(&0x5455u16.to_le_bytes());
                extra.extend_from_slice(&5u16.to_le_bytes());
                extra.push(1);
                extra.extend_from_slice(&secs.to_le_bytes());
            }

            let offset = out.len() as u32;
            let mut common = Vec::new();
            common.extend_from_slice(&e.flags.to_le_bytes());
            common.extend_from_slice(&method.to_le_bytes());
            common.extend_from_slice(&e.dos_time.to_le_bytes());
            common.extend_from_slice(&e.dos_date.to_le_bytes());
            common.extend_from_slice(&crc.to_le_bytes());
            common.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            common.extend_from_slice(&(e.data.len() as u32).to_le_bytes());
            common.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
            common.extend_from_slice(&(extra.len() as u16).to_le_bytes());

            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&common);
            out.extend_from_slice(&e.name);
            out.extend_from_slice(&extra);
            out.extend_from_slice(&payload);

            let (made_by, external) = match e.mode {
                Some(mode) => {
                    let kind = if e.name.ends_with(b"/") { 0o040000 } else { 0o100000 };
                    ((3u16 << 8) | 30, (kind | mode) << 16)
                }
                None => (20, if e.name.ends_with(b"/") { 0x10 } else { 0 }),
            };
            central.extend_from_slice(b"PK\x01\x02");
            central.extend_from_slice(&made_by.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&common);
            central.extend_from_slice(&0u16.to_le_bytes()); // comment
            central.extend_from_slice(&0u16.to_le_bytes()); // disk
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
            central.extend_from_slice(&external.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(&e.name);
            central.extend_from_slice(&extra);
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);
        let count = self.entries.len() as u16;
        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }
}

pub fn gb18030(text: &str) -> Vec<u8> {
    let (bytes, _, unmappable) = encoding_rs::GB18030.encode(text);
    assert!(!unmappable);
    bytes.into_owned()
}

/// Names directly under `dir`, sorted.
pub fn listing(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

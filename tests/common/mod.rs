//! Builds small ZIP archives for tests, so we don't need `zip` installed.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::DeflateEncoder;
use flate2::Compression;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Method {
    Stored,
    Deflated,
    /// Deflated, with sizes and CRC in a trailing data descriptor
    Streamed,
}

/// Writes local headers as entries are added,
/// then the central directory when finished.
#[derive(Default)]
pub struct ZipBuilder {
    bytes: Vec<u8>,
    central_directory: Vec<u8>,
    entries: u16,
}

// 1980-01-01, midnight
const DOS_DATE: u16 = (1 << 5) | 1;

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.add(name, data, Method::Stored)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.add(name, data, Method::Deflated)
    }

    pub fn streamed(self, name: &str, data: &[u8]) -> Self {
        self.add(name, data, Method::Streamed)
    }

    pub fn dir(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.add(name, b"", Method::Stored)
    }

    fn add(mut self, name: &str, data: &[u8], method: Method) -> Self {
        let crc = crc32fast::hash(data);
        let (compressed, method_code) = match method {
            Method::Stored => (data.to_vec(), 0u16),
            Method::Deflated | Method::Streamed => (deflate(data), 8u16),
        };
        let streamed = method == Method::Streamed;
        let flags: u16 = (1 << 11) | if streamed { 1 << 3 } else { 0 };
        let (header_crc, header_compressed, header_size) = if streamed {
            (0, 0, 0)
        } else {
            (crc, compressed.len() as u32, data.len() as u32)
        };
        let offset = self.bytes.len() as u32;

        let out = &mut self.bytes;
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&method_code.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&header_crc.to_le_bytes());
        out.extend_from_slice(&header_compressed.to_le_bytes());
        out.extend_from_slice(&header_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&compressed);
        if streamed {
            out.extend_from_slice(b"PK\x07\x08");
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }

        let cd = &mut self.central_directory;
        cd.extend_from_slice(b"PK\x01\x02");
        cd.extend_from_slice(&20u16.to_le_bytes());
        cd.extend_from_slice(&20u16.to_le_bytes());
        cd.extend_from_slice(&flags.to_le_bytes());
        cd.extend_from_slice(&method_code.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&DOS_DATE.to_le_bytes());
        cd.extend_from_slice(&crc.to_le_bytes());
        cd.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        cd.extend_from_slice(&(data.len() as u32).to_le_bytes());
        cd.extend_from_slice(&(name.len() as u16).to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes()); // extra field
        cd.extend_from_slice(&0u16.to_le_bytes()); // comment
        cd.extend_from_slice(&0u16.to_le_bytes()); // disk
        cd.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        cd.extend_from_slice(&0u32.to_le_bytes()); // external attributes
        cd.extend_from_slice(&offset.to_le_bytes());
        cd.extend_from_slice(name.as_bytes());

        self.entries += 1;
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let cd_offset = self.bytes.len() as u32;
        let cd_size = self.central_directory.len() as u32;
        self.bytes.extend_from_slice(&self.central_directory);

        let out = &mut self.bytes;
        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.entries.to_le_bytes());
        out.extend_from_slice(&self.entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        self.bytes
    }
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Writes `bytes` to `dir/name` and returns the path.
pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("Couldn't write fixture");
    path
}

/// Some bytes that compress well but aren't all the same.
pub fn lorem(len: usize) -> Vec<u8> {
    b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. "
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}

/// Where `needle` first shows up in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("Needle not in haystack")
}

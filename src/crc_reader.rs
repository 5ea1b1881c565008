//! Helper module to check an entry's CRC32 and size once we've read all of it.
//!
//! Entries streamed with a data descriptor only tell us their CRC
//! after their data, so unlike a reader that knows the checksum up front,
//! this just tallies what goes by and checks it when asked.

use crc32fast::Hasher;

use crate::result::*;

/// Running CRC32 and byte count of everything read from one entry.
#[derive(Default)]
pub struct Crc32Tally {
    hasher: Hasher,
    bytes: u64,
}

impl Crc32Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.hasher.update(buf);
        self.bytes += buf.len() as u64;
    }

    #[cfg(test)]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Checks the tally against the values the archive provided.
    pub fn verify(&self, path: &str, expected_crc: u32, expected_size: u64) -> ZipResult<()> {
        if self.bytes != expected_size {
            return Err(ZipError::Checksum(format!(
                "{} decompressed to {} bytes, expected {}",
                path, self.bytes, expected_size
            )));
        }
        if cfg!(feature = "check-crc32") {
            let actual = self.hasher.clone().finalize();
            if actual != expected_crc {
                return Err(ZipError::Checksum(format!(
                    "{} has CRC32 {:#010x}, expected {:#010x}",
                    path, actual, expected_crc
                )));
            }
        }
        Ok(())
    }
}

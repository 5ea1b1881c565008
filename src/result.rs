//! Error types and the related `Result<T>`s
//!
//! [`ZipError`] comes from decoding a single archive layer.
//! [`ResolveError`] is what callers of [`resolve()`] see,
//! tagged with where in the chain of nested containers things went wrong.
//!
//! [`resolve()`]: ../resolve/fn.resolve.html

use std::io;

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// The ZIP archive contained invalid data per APPNOTE.TXT.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// An entry's contents didn't match the CRC-32 or size it was stored with
    #[error("Checksum mismatch: {0}")]
    Checksum(String),
}

/// Entries are read through `io::Read`,
/// so decoding errors have to squeeze into an `io::Error`.
impl From<ZipError> for io::Error {
    fn from(e: ZipError) -> Self {
        match e {
            ZipError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Things that can go wrong while resolving a nested reference.
///
/// Not finding the referenced entry isn't one of them:
/// that's a normal `Ok(None)`.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The reference was malformed. Caught before any I/O happens.
    #[error("Invalid reference {reference:?}: {reason}")]
    InvalidReference {
        reference: String,
        reason: &'static str,
    },

    /// The outermost container couldn't be opened.
    #[error("Couldn't open container {location}")]
    ContainerUnavailable {
        location: String,
        #[source]
        source: io::Error,
    },

    /// The container at the given depth (1 being the outermost)
    /// couldn't be decoded.
    #[error("Corrupt container at depth {depth}")]
    ContainerCorrupt {
        depth: usize,
        #[source]
        source: ZipError,
    },

    /// The reference nests more containers than the resolver allows.
    #[error("Reference nests {depth} containers deep, more than the limit of {limit}")]
    TooDeep { depth: usize, limit: usize },

    /// A nested container was too big to buffer in memory.
    #[error("Entry {name} at depth {depth} exceeds the {limit} byte buffering limit")]
    TooLarge {
        name: String,
        depth: usize,
        limit: u64,
    },
}

impl ResolveError {
    /// Returns a closure that tags decoder errors with the depth they happened at.
    pub(crate) fn corrupt_at(depth: usize) -> impl Fn(ZipError) -> Self {
        move |source| ResolveError::ContainerCorrupt { depth, source }
    }
}

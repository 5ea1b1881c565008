//! Tools for reading a ZIP archive front to back.
//!
//! A [`ZipStream`] walks an archive's local file headers in order,
//! handing out one [`ZipEntry`] at a time.
//! It never seeks, so it works on anything that implements [`BufRead`]:
//! files, network responses, or the decompressed bytes of an entry
//! from another archive.
//!
//! The price is that each entry is only readable while it's current.
//! Asking for the next one skips whatever's left of the previous one,
//! and the borrow checker won't let you hold onto both.
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io::{self, BufReader};
//! # use nestzip::read::ZipStream;
//! let mut stream = ZipStream::new(BufReader::new(File::open("foo.zip")?));
//! while let Some(mut entry) = stream.next_entry()? {
//!     if entry.is_file() {
//!         println!("{} ({:?} bytes)", entry.name(), entry.size());
//!         io::copy(&mut entry, &mut io::sink())?;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`ZipStream`]: struct.ZipStream.html
//! [`ZipEntry`]: struct.ZipEntry.html
//! [`BufRead`]: https://doc.rust-lang.org/std/io/trait.BufRead.html

use std::io::{self, BufRead, Read};

use chrono::NaiveDateTime;
use flate2::{Decompress, FlushDecompress, Status};
use log::*;

use crate::crc_reader::Crc32Tally;
use crate::result::*;
use crate::spec::{self, DataDescriptor, LocalFileHeader};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for a file or directory in the archive,
/// retrieved from its local file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// The provided path of the file, as stored in the archive.
    pub path: String,

    /// Uncompressed size of the file in bytes,
    /// or `None` if it was streamed into the archive with a data descriptor.
    pub size: Option<u64>,

    /// Compressed size of the file in bytes, if known up front
    pub compressed_size: Option<u64>,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed file, if known up front
    pub crc32: Option<u32>,

    /// True if the file is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// When the file was last modified, if the archive stored a valid date
    pub last_modified: Option<NaiveDateTime>,

    pub(crate) has_data_descriptor: bool,
    pub(crate) zip64: bool,
}

impl EntryMetadata {
    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }
}

/// How to get the bytes of the current entry out of the archive.
enum Body {
    Stored {
        remaining: u64,
    },
    Deflated {
        decompress: Decompress,
        /// Compressed bytes left, if the header told us how many there are.
        remaining: Option<u64>,
        ended: bool,
    },
    /// Encrypted, or compressed with something we can't decompress.
    /// We can still skip over it if we know how big it is.
    Unreadable {
        remaining: Option<u64>,
    },
}

impl Body {
    fn for_entry(metadata: &EntryMetadata) -> ZipResult<Self> {
        if metadata.encrypted {
            return Ok(Body::Unreadable {
                remaining: metadata.compressed_size,
            });
        }
        match metadata.compression_method {
            CompressionMethod::None => {
                // EntryMetadata::from_local_header() rejects stored entries
                // with data descriptors, so the sizes are here.
                let remaining = metadata.compressed_size.unwrap_or_default();
                if metadata.size != Some(remaining) {
                    return Err(ZipError::InvalidArchive(
                        "Stored entry's compressed and uncompressed sizes differ",
                    ));
                }
                Ok(Body::Stored { remaining })
            }
            CompressionMethod::Deflate => Ok(Body::Deflated {
                // ZIP stores raw DEFLATE streams, without zlib headers.
                decompress: Decompress::new(false),
                remaining: metadata.compressed_size,
                ended: false,
            }),
            CompressionMethod::Unsupported(_) => Ok(Body::Unreadable {
                remaining: metadata.compressed_size,
            }),
        }
    }
}

/// Everything we track about the entry a stream is currently on.
struct EntryState {
    metadata: EntryMetadata,
    body: Body,
    tally: Crc32Tally,
    /// Set once we've reached the end of the entry's data.
    complete: bool,
}

/// Reads a ZIP archive sequentially, one local file header at a time.
///
/// This doesn't look at the central directory at all,
/// which is the only way to read an archive we can't seek around in.
pub struct ZipStream<R> {
    reader: R,
    current: Option<EntryState>,
    finished: bool,
}

impl<R: BufRead> ZipStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            current: None,
            finished: false,
        }
    }

    /// Advances to the next entry in the archive,
    /// skipping any unread data of the previous one.
    ///
    /// Returns `None` once we reach the central directory
    /// (or the end of the stream, if it ends cleanly between entries).
    pub fn next_entry(&mut self) -> ZipResult<Option<ZipEntry<'_, R>>> {
        if let Some(mut previous) = self.current.take() {
            finish_entry(&mut self.reader, &mut previous)?;
        }
        if self.finished {
            return Ok(None);
        }

        let signature = match spec::read_signature(&mut self.reader)? {
            Some(s) => s,
            None => {
                trace!("Stream ended without a central directory");
                self.finished = true;
                return Ok(None);
            }
        };
        if spec::ends_entries(&signature) {
            trace!("Reached the central directory");
            self.finished = true;
            return Ok(None);
        }
        if signature != spec::LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid local file header"));
        }

        let local_header = LocalFileHeader::read_from(&mut self.reader)?;
        trace!("{:?}", local_header);
        let metadata = EntryMetadata::from_local_header(local_header)?;
        debug!("{:?}", metadata);
        let body = Body::for_entry(&metadata)?;

        let state = self.current.insert(EntryState {
            metadata,
            body,
            tally: Crc32Tally::new(),
            complete: false,
        });
        Ok(Some(ZipEntry {
            state,
            reader: &mut self.reader,
        }))
    }

    /// Returns the entry the stream is currently on, if any.
    ///
    /// Handy for picking an entry back up after deciding, with
    /// [`next_entry()`](#method.next_entry), that it's the one you want.
    pub fn current_entry(&mut self) -> Option<ZipEntry<'_, R>> {
        let state = self.current.as_mut()?;
        Some(ZipEntry {
            state,
            reader: &mut self.reader,
        })
    }

    /// Gives back the underlying reader, positioned wherever we stopped.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// A file or directory in a [`ZipStream`], readable while it's current.
///
/// Reading a file to its end checks its CRC-32 and size.
///
/// [`ZipStream`]: struct.ZipStream.html
pub struct ZipEntry<'a, R> {
    state: &'a mut EntryState,
    reader: &'a mut R,
}

impl<R> ZipEntry<'_, R> {
    pub fn metadata(&self) -> &EntryMetadata {
        &self.state.metadata
    }

    /// The entry's path, as stored in the archive
    pub fn name(&self) -> &str {
        &self.state.metadata.path
    }

    pub fn is_dir(&self) -> bool {
        self.state.metadata.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.state.metadata.is_file()
    }

    /// The declared uncompressed size, if the archive gave one up front.
    pub fn size(&self) -> Option<u64> {
        self.state.metadata.size
    }
}

impl<R: BufRead> Read for ZipEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_body(&mut *self.reader, &mut *self.state, buf).map_err(io::Error::from)
    }
}

fn unreadable(metadata: &EntryMetadata) -> ZipError {
    if metadata.encrypted {
        ZipError::UnsupportedArchive(format!("Can't read encrypted file {}", metadata.path))
    } else {
        ZipError::UnsupportedArchive(format!(
            "Can't read {}: compression method {:?} not supported",
            metadata.path, metadata.compression_method
        ))
    }
}

/// Reads decompressed bytes of the current entry.
/// Returns 0 once there aren't any more.
fn read_body<R: BufRead>(reader: &mut R, state: &mut EntryState, buf: &mut [u8]) -> ZipResult<usize> {
    if buf.is_empty() || state.complete {
        return Ok(0);
    }
    let count = match &mut state.body {
        Body::Stored { remaining } => read_stored(reader, remaining, buf)?,
        Body::Deflated {
            decompress,
            remaining,
            ended,
        } => read_deflated(reader, decompress, remaining, ended, buf)?,
        Body::Unreadable { .. } => return Err(unreadable(&state.metadata)),
    };
    if count == 0 {
        complete_entry(reader, state)?;
    } else {
        state.tally.update(&buf[..count]);
    }
    Ok(count)
}

fn read_stored<R: BufRead>(reader: &mut R, remaining: &mut u64, buf: &mut [u8]) -> ZipResult<usize> {
    if *remaining == 0 {
        return Ok(0);
    }
    let max = (*remaining).min(buf.len() as u64) as usize;
    let count = reader.read(&mut buf[..max])?;
    if count == 0 {
        return Err(ZipError::InvalidArchive("Truncated entry data"));
    }
    *remaining -= count as u64;
    Ok(count)
}

fn read_deflated<R: BufRead>(
    reader: &mut R,
    decompress: &mut Decompress,
    remaining: &mut Option<u64>,
    ended: &mut bool,
    buf: &mut [u8],
) -> ZipResult<usize> {
    loop {
        if *ended {
            return Ok(0);
        }

        let available = reader.fill_buf()?;
        // Don't let the decompressor wander into the next entry's header.
        let input = match *remaining {
            Some(r) => &available[..available.len().min(usize::try_from(r).unwrap_or(usize::MAX))],
            None => available,
        };
        let at_eof = input.is_empty();
        let flush = if at_eof {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };

        let in_before = decompress.total_in();
        let out_before = decompress.total_out();
        let status = decompress
            .decompress(input, buf, flush)
            .map_err(|_| ZipError::InvalidArchive("Corrupt DEFLATE stream"))?;
        let consumed = (decompress.total_in() - in_before) as usize;
        let produced = (decompress.total_out() - out_before) as usize;

        reader.consume(consumed);
        if let Some(r) = remaining {
            *r -= consumed as u64;
        }
        if status == Status::StreamEnd {
            *ended = true;
        }

        if produced > 0 {
            return Ok(produced);
        }
        if consumed == 0 && !*ended {
            return Err(ZipError::InvalidArchive(if at_eof {
                "Truncated DEFLATE stream"
            } else {
                "Corrupt DEFLATE stream"
            }));
        }
    }
}

/// Called when we've read the last byte of an entry:
/// reads its data descriptor (if it has one) and checks what we read.
fn complete_entry<R: Read>(reader: &mut R, state: &mut EntryState) -> ZipResult<()> {
    state.complete = true;
    let metadata = &state.metadata;

    let consumed = match &state.body {
        Body::Deflated {
            remaining: Some(r), ..
        } if *r != 0 => {
            return Err(ZipError::InvalidArchive(
                "DEFLATE stream ended before the entry's compressed size",
            ));
        }
        Body::Deflated { decompress, .. } => Some(decompress.total_in()),
        _ => None,
    };

    let (crc32, size) = if metadata.has_data_descriptor {
        let descriptor = DataDescriptor::read_from(reader, metadata.zip64)?;
        trace!("{:?}", descriptor);
        if consumed.map_or(false, |c| c != descriptor.compressed_size) {
            return Err(ZipError::InvalidArchive(
                "Data descriptor's compressed size doesn't match the DEFLATE stream",
            ));
        }
        (descriptor.crc32, descriptor.uncompressed_size)
    } else {
        match (metadata.crc32, metadata.size) {
            (Some(crc32), Some(size)) => (crc32, size),
            _ => return Err(ZipError::InvalidArchive("Entry is missing its CRC-32 and size")),
        }
    };
    state.tally.verify(&metadata.path, crc32, size)
}

/// Moves the reader past whatever's left of the given entry.
fn finish_entry<R: BufRead>(reader: &mut R, state: &mut EntryState) -> ZipResult<()> {
    if state.complete {
        return Ok(());
    }
    let to_skip = match &state.body {
        Body::Stored { remaining } => Some(*remaining),
        Body::Deflated { remaining, .. } => *remaining,
        Body::Unreadable { remaining: Some(r) } => Some(*r),
        Body::Unreadable { remaining: None } => {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't skip {}: its size is in a data descriptor and we can't decompress it",
                state.metadata.path
            )));
        }
    };

    match to_skip {
        // Skip the compressed bytes without bothering to decompress them.
        // (We won't check the CRC, but we weren't asked to read it anyways.)
        Some(count) => {
            trace!("Skipping {} bytes of {}", count, state.metadata.path);
            let skipped = io::copy(&mut reader.by_ref().take(count), &mut io::sink())?;
            if skipped != count {
                return Err(ZipError::InvalidArchive("Truncated entry data"));
            }
            state.complete = true;
            Ok(())
        }
        // No idea where the entry ends but the DEFLATE stream does,
        // so decompress our way there.
        None => {
            trace!("Draining {}", state.metadata.path);
            let mut scratch = [0u8; 8 * 1024];
            while read_body(reader, state, &mut scratch)? != 0 {}
            Ok(())
        }
    }
}

//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! Since we read archives front to back, as a stream,
//! we only care about the records found along the way:
//! local file headers, the data descriptors that sometimes trail
//! an entry's data, and the start of the central directory,
//! which tells us we've seen every entry.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;
use std::convert::TryInto;
use std::io::{self, Read};

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;

use crate::read::{CompressionMethod, EntryMetadata};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Data descriptor magic number (optional, but most writers emit it)
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Zip64 extended information extra field header ID
const ZIP64_EXTRA_FIELD: u16 = 0x0001;

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Fills `buf` from the reader, calling it a truncated archive
/// (instead of a generic I/O error) if we run out of bytes.
fn read_record<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> ZipResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ZipError::InvalidArchive(what),
        _ => ZipError::Io(e),
    })
}

/// Reads the four-byte signature that starts every ZIP record.
///
/// Returns `None` if the stream ends cleanly before the signature starts.
/// Some writers omit the central directory of an empty archive entirely,
/// and an empty stream has no entries either way.
pub fn read_signature<R: Read>(reader: &mut R) -> ZipResult<Option<[u8; 4]>> {
    let mut signature = [0u8; 4];
    let mut filled = 0;
    while filled < signature.len() {
        match reader.read(&mut signature[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ZipError::Io(e)),
        }
    }
    match filled {
        0 => Ok(None),
        4 => Ok(Some(signature)),
        _ => Err(ZipError::InvalidArchive("Truncated record signature")),
    }
}

/// Returns true if the signature starts one of the records
/// that follow the last entry in an archive.
pub fn ends_entries(signature: &[u8; 4]) -> bool {
    *signature == CENTRAL_DIRECTORY_MAGIC
        || *signature == EOCDR_MAGIC
        || *signature == ZIP64_EOCDR_MAGIC
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumped to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Extracts the "sizes and CRC follow the data" bit from the 16-bit flags field.
fn has_data_descriptor(flags: u16) -> bool {
    // Bit 3: If this bit is set, the fields crc-32, compressed
    //        size and uncompressed size are set to zero in the
    //        local header.  The correct values are put in the
    //        data descriptor immediately following the compressed
    //        data.
    flags & (1 << 3) != 0
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// These headers allow for "streaming" decompression without
/// the use of the central directory, which is exactly what we do.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    /// Reads a local file header, assuming its signature was already consumed.
    pub fn read_from<R: Read>(reader: &mut R) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut fixed = [0u8; 26];
        read_record(reader, &mut fixed, "Truncated local file header")?;
        let mut header = &fixed[..];
        let _version_needed_to_extract = read_u16(&mut header);
        let flags = read_u16(&mut header);
        let compression_method = read_u16(&mut header);
        let last_modified_time = read_u16(&mut header);
        let last_modified_date = read_u16(&mut header);
        let crc32 = read_u32(&mut header);
        let compressed_size = read_u32(&mut header);
        let uncompressed_size = read_u32(&mut header);
        let path_length = read_u16(&mut header) as usize;
        let extra_field_length = read_u16(&mut header) as usize;

        let mut path = vec![0u8; path_length];
        read_record(reader, &mut path, "Truncated file name")?;
        let mut extra_field = vec![0u8; extra_field_length];
        read_record(reader, &mut extra_field, "Truncated extra field")?;

        Ok(Self {
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }
}

/// Data from a data descriptor, which follows an entry's data
/// when the writer didn't know its size up front.
#[derive(Debug, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub fn read_from<R: Read>(reader: &mut R, zip64: bool) -> ZipResult<Self> {
        // 4.3.9  Data descriptor:
        //
        //     crc-32                          4 bytes
        //     compressed size                 4 bytes
        //     uncompressed size               4 bytes
        //
        // 4.3.9.1 This descriptor MUST exist if bit 3 of the general
        // purpose bit flag is set (see below).  It is byte aligned
        // and immediately follows the last byte of compressed data.
        // [...] For ZIP64(tm) format archives, the compressed
        // and uncompressed sizes are 8 bytes each.
        //
        // 4.3.9.3 Although not originally assigned a signature, the value
        // 0x08074b50 has commonly been adopted as a signature value
        // for the data descriptor record.
        let mut first = [0u8; 4];
        read_record(reader, &mut first, "Truncated data descriptor")?;
        let crc_bytes = if first == DATA_DESCRIPTOR_MAGIC {
            let mut crc_bytes = [0u8; 4];
            read_record(reader, &mut crc_bytes, "Truncated data descriptor")?;
            crc_bytes
        } else {
            first
        };
        let crc32 = u32::from_le_bytes(crc_bytes);

        let (compressed_size, uncompressed_size) = if zip64 {
            let mut sizes = [0u8; 16];
            read_record(reader, &mut sizes, "Truncated data descriptor")?;
            let mut sizes = &sizes[..];
            (read_u64(&mut sizes), read_u64(&mut sizes))
        } else {
            let mut sizes = [0u8; 8];
            read_record(reader, &mut sizes, "Truncated data descriptor")?;
            let mut sizes = &sizes[..];
            (read_u32(&mut sizes) as u64, read_u32(&mut sizes) as u64)
        };

        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }
}

impl EntryMetadata {
    /// Extracts `EntryMetadata` from a local file header
    pub(crate) fn from_local_header(local: LocalFileHeader) -> ZipResult<Self> {
        let path = decode_path(local.path, local.flags)?;
        let deferred = has_data_descriptor(local.flags);
        let compression_method = CompressionMethod::from_u16(local.compression_method);

        // Without the central directory, the data descriptor is our only
        // way to know sizes after the fact. We can find the end of
        // a DEFLATE stream without it, but not the end of stored bytes.
        if deferred && compression_method == CompressionMethod::None {
            return Err(ZipError::UnsupportedArchive(format!(
                "Stored entry {} has its size in a data descriptor",
                path
            )));
        }

        let mut sizes = Zip64Sizes {
            size: local.uncompressed_size as u64,
            compressed_size: local.compressed_size as u64,
            present: false,
        };
        parse_extra_field(&mut sizes, &local.extra_field)?;

        let (size, compressed_size, crc32) = if deferred {
            (None, None, None)
        } else {
            (
                Some(sizes.size),
                Some(sizes.compressed_size),
                Some(local.crc32),
            )
        };

        Ok(Self {
            path,
            size,
            compressed_size,
            compression_method,
            crc32,
            encrypted: is_encrypted(local.flags),
            last_modified: parse_msdos(local.last_modified_time, local.last_modified_date),
            has_data_descriptor: deferred,
            zip64: sizes.present,
        })
    }
}

fn decode_path(raw: Vec<u8>, flags: u16) -> ZipResult<String> {
    if is_utf8(flags) {
        String::from_utf8(raw).map_err(|e| ZipError::Encoding(e.utf8_error()))
    } else {
        let str_cow: Cow<str> = Cow::borrow_from_cp437(&raw[..], &CP437_CONTROL);
        Ok(str_cow.into_owned())
    }
}

/// Converts MS-DOS date and time fields.
///
/// Returns `None` for nonsense (like the all-zero date some writers use).
fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Sizes from a local header, possibly widened by a Zip64 extra field.
struct Zip64Sizes {
    size: u64,
    compressed_size: u64,
    /// True if the header had a Zip64 extra field,
    /// which also means its data descriptor (if any) has 64-bit sizes.
    present: bool,
}

/// Parses the "extra fields" found in local file headers.
///
/// Currently we just look for Zip64 info (64-bit values for files > 2^32 in size)
fn parse_extra_field(sizes: &mut Zip64Sizes, mut extra_field: &[u8]) -> ZipResult<()> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:

    //     header1+data1 + header2+data2 . . .

    // Each header MUST consist of:

    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field);
        let field_len = read_u16(&mut extra_field) as usize;
        if field_len > extra_field.len() {
            return Err(ZipError::InvalidArchive("Extra field overruns its header"));
        }
        let (mut field, rest) = extra_field.split_at(field_len);
        extra_field = rest;

        if kind != ZIP64_EXTRA_FIELD {
            continue;
        }
        sizes.present = true;

        // 4.5.3 [...] The order of the fields in the zip64 extended
        // information record is fixed, but the fields MUST
        // only appear if the corresponding Local or Central
        // directory record field is set to 0xFFFF or 0xFFFFFFFF.
        if sizes.size == u32::MAX as u64 {
            if field.len() < 8 {
                return Err(ZipError::InvalidArchive("Zip64 extra field is missing a size"));
            }
            sizes.size = read_u64(&mut field);
        }
        if sizes.compressed_size == u32::MAX as u64 {
            if field.len() < 8 {
                return Err(ZipError::InvalidArchive(
                    "Zip64 extra field is missing a compressed size",
                ));
            }
            sizes.compressed_size = read_u64(&mut field);
        }
    }
    Ok(())
}

use std::io::{self, Cursor, Read};

use anyhow::Result;

use nestzip::read::*;
use nestzip::result::ZipError;

mod common;
use common::*;

fn hello_zip() -> Vec<u8> {
    ZipBuilder::new()
        .dir("hello/")
        .stored("hello/hi.txt", b"hi")
        .deflated("hello/rip.txt", &lorem(5000))
        .streamed("hello/sr71.txt", &lorem(777))
        .finish()
}

#[test]
fn walks_every_entry() -> Result<()> {
    init_logging();

    let mut stream = ZipStream::new(Cursor::new(hello_zip()));
    let mut seen = Vec::new();
    while let Some(mut entry) = stream.next_entry()? {
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        seen.push((
            entry.name().to_owned(),
            entry.is_dir(),
            entry.size(),
            contents,
        ));
    }

    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], ("hello/".to_owned(), true, Some(0), vec![]));
    assert_eq!(seen[1], ("hello/hi.txt".to_owned(), false, Some(2), b"hi".to_vec()));
    assert_eq!(seen[2], ("hello/rip.txt".to_owned(), false, Some(5000), lorem(5000)));
    // Streamed entries don't know their size up front.
    assert_eq!(seen[3], ("hello/sr71.txt".to_owned(), false, None, lorem(777)));

    // Once we hit the central directory, we're done for good.
    assert!(stream.next_entry()?.is_none());
    Ok(())
}

#[test]
fn metadata() -> Result<()> {
    let mut stream = ZipStream::new(Cursor::new(hello_zip()));
    stream.next_entry()?;
    let entry = stream.next_entry()?.unwrap();
    let metadata = entry.metadata();
    assert_eq!(metadata.compression_method, CompressionMethod::None);
    assert_eq!(metadata.crc32, Some(crc32fast::hash(b"hi")));
    assert!(!metadata.encrypted);
    assert_eq!(
        metadata.last_modified.map(|t| t.to_string()).as_deref(),
        Some("1980-01-01 00:00:00")
    );

    let entry = stream.next_entry()?.unwrap();
    assert_eq!(entry.metadata().compression_method, CompressionMethod::Deflate);
    assert!(entry.metadata().compressed_size.unwrap() < 5000);
    Ok(())
}

#[test]
fn skips_unread_entries() -> Result<()> {
    init_logging();

    // Don't read anything.
    let mut stream = ZipStream::new(Cursor::new(hello_zip()));
    let mut names = Vec::new();
    while let Some(entry) = stream.next_entry()? {
        names.push(entry.name().to_owned());
    }
    assert_eq!(
        names,
        ["hello/", "hello/hi.txt", "hello/rip.txt", "hello/sr71.txt"]
    );

    // Read a bit of each.
    let mut stream = ZipStream::new(Cursor::new(hello_zip()));
    let mut names = Vec::new();
    while let Some(mut entry) = stream.next_entry()? {
        let mut first = [0u8; 3];
        let _ = entry.read(&mut first)?;
        names.push(entry.name().to_owned());
    }
    assert_eq!(names.len(), 4);
    Ok(())
}

#[test]
fn picks_up_the_current_entry() -> Result<()> {
    let mut stream = ZipStream::new(Cursor::new(hello_zip()));
    assert!(stream.current_entry().is_none());
    while let Some(entry) = stream.next_entry()? {
        if entry.name() == "hello/rip.txt" {
            break;
        }
    }
    let mut entry = stream.current_entry().unwrap();
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;
    assert_eq!(contents, lorem(5000));
    Ok(())
}

#[test]
fn empty_archives() -> Result<()> {
    let mut stream = ZipStream::new(Cursor::new(ZipBuilder::new().finish()));
    assert!(stream.next_entry()?.is_none());

    let mut stream = ZipStream::new(io::empty());
    assert!(stream.next_entry()?.is_none());
    Ok(())
}

#[test]
fn not_a_zip() {
    let mut stream = ZipStream::new(&b"This is not the archive you're looking for"[..]);
    match stream.next_entry() {
        Err(ZipError::InvalidArchive(_)) => {}
        Err(other) => panic!("Got the wrong error: {:?}", other),
        Ok(_) => panic!("Found an entry in plain text"),
    }
}

#[test]
fn truncated() {
    let mut zip = hello_zip();
    // Cut it off partway through rip.txt.
    let rip = find(&zip, b"hello/rip.txt") + "hello/rip.txt".len() + 10;
    zip.truncate(rip);

    let mut stream = ZipStream::new(Cursor::new(zip));
    let mut result = Ok(());
    loop {
        match stream.next_entry() {
            Ok(Some(mut entry)) => {
                if let Err(e) = io::copy(&mut entry, &mut io::sink()) {
                    result = Err(e);
                    break;
                }
            }
            Ok(None) => panic!("Truncated archive ended cleanly"),
            Err(e) => {
                result = Err(e.into());
                break;
            }
        }
    }
    let err = result.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn corrupt_contents() {
    let mut zip = ZipBuilder::new().stored("a.txt", b"abcdefgh").finish();
    let contents = find(&zip, b"abcdefgh");
    zip[contents] = b'z';

    let mut stream = ZipStream::new(Cursor::new(zip));
    let mut entry = stream.next_entry().unwrap().unwrap();
    let mut contents = Vec::new();
    let result = entry.read_to_end(&mut contents);
    if cfg!(feature = "check-crc32") {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("Checksum"), "{}", err);
    } else {
        assert!(result.is_ok());
    }
}

#[test]
fn stored_entries_cant_be_streamed() {
    let mut zip = ZipBuilder::new().stored("a.txt", b"abc").finish();
    // Set the data descriptor bit on the local header.
    zip[6] |= 1 << 3;
    let mut stream = ZipStream::new(Cursor::new(zip));
    assert!(matches!(
        stream.next_entry(),
        Err(ZipError::UnsupportedArchive(_))
    ));
}

#[test]
fn encrypted_entries_are_skippable_but_not_readable() -> Result<()> {
    let mut zip = ZipBuilder::new()
        .deflated("secret.txt", b"shh")
        .stored("public.txt", b"hello")
        .finish();
    zip[6] |= 1;

    let mut stream = ZipStream::new(Cursor::new(zip.clone()));
    let mut secret = stream.next_entry()?.unwrap();
    assert!(secret.metadata().encrypted);
    let err = secret.read(&mut [0u8; 16]).unwrap_err();
    assert!(err.to_string().contains("encrypted"), "{}", err);

    let mut stream = ZipStream::new(Cursor::new(zip));
    stream.next_entry()?;
    let mut public = stream.next_entry()?.unwrap();
    let mut contents = String::new();
    public.read_to_string(&mut contents)?;
    assert_eq!(contents, "hello");
    Ok(())
}

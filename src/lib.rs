//! nestzip reads files out of ZIP archives nested inside other ZIP archives,
//! as deep as you like, without writing anything to disk:
//!
//! ```no_run
//! # use nestzip::*;
//! let reference = Reference::parse("jar:file:/tmp/outer.jar!/lib/inner.jar!/hello.txt")?;
//! match Resolver::new().read_to_vec(&reference)? {
//!     Some((name, contents)) => println!("{}: {} bytes", name, contents.len()),
//!     None => println!("Nothing matched"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! References are chains of segments split on `!`.
//! The first segment names the outermost archive (a path, a `file:` URL,
//! or with the `http` feature, an HTTP(S) URL).
//! Each one after that names an entry in the archive picked out by the one
//! before it. Entries are matched by prefix, so `/lib/inner` finds
//! `lib/inner.jar`, and directories are never matched.
//!
//! If you just want to know what a reference points to, ask for its name:
//! ```no_run
//! # use nestzip::*;
//! let name = resolve("outer.jar!/lib/inner.jar!/hello", Delivery::Name, |r| {
//!     Ok::<_, ResolveError>(r.name().to_owned())
//! })?;
//! assert_eq!(name.as_deref(), Some("/hello.txt"));
//! # Ok::<(), ResolveError>(())
//! ```
//!
//! Archives are read front to back, through their local file headers,
//! so they don't need to be seekable. Nested archives are buffered in memory
//! while we look through them; the file you asked for is streamed straight
//! to you.
//!
//! Lower-level, [`read::ZipStream`] walks the entries of one archive.
//!
//! [`read::ZipStream`]: read/struct.ZipStream.html

pub mod read;
pub mod reference;
pub mod resolve;
pub mod result;
pub mod source;

pub use read::ZipStream;
pub use reference::{Location, Reference};
pub use resolve::{resolve, Delivery, ResolveOptions, Resolved, Resolver};
pub use result::{ResolveError, ZipError};
pub use source::{DefaultOpener, Open};

mod crc_reader;
mod spec;

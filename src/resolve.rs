//! Resolving a reference through any number of nested archives.
//!
//! For `outer.jar!/lib/inner.jar!/foo.txt`, we open `outer.jar`,
//! scan its entries for one matching `/lib/inner.jar`,
//! read that entry into memory, scan *it* for `/foo.txt`,
//! and hand that entry to the caller.
//!
//! Entries are matched by prefix, and directories never match.
//!
//! Nested archives are read into memory before they're scanned.
//! An entry's bytes come out of the same forward-only stream as the rest
//! of its archive, so the inner scan needs a stream of its own.

use std::io::{self, Read};

use log::*;

use crate::read::{ZipEntry, ZipStream};
use crate::reference::{qualified_name, segment_matches, Reference};
use crate::result::*;
use crate::source::{Container, DefaultOpener, Open};

/// What the handler wants to hear about the entry we found.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Just its name
    Name,
    /// Its name and its contents
    Content,
}

/// The entry a reference resolved to, as requested by a [`Delivery`].
///
/// [`Delivery`]: enum.Delivery.html
pub enum Resolved<'a> {
    Name(&'a str),
    Content {
        /// The entry's path with a leading `/`,
        /// or the container's location if the reference had no entries.
        name: &'a str,
        /// The declared uncompressed size, if known.
        size: Option<u64>,
        /// The entry's decompressed contents.
        reader: &'a mut dyn Read,
    },
}

impl Resolved<'_> {
    pub fn name(&self) -> &str {
        match self {
            Resolved::Name(name) => name,
            Resolved::Content { name, .. } => name,
        }
    }
}

/// Limits on what a resolver is willing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// The most archives a reference may nest through.
    pub max_depth: usize,
    /// The largest nested archive we'll buffer in memory, in bytes.
    pub max_materialized_size: u64,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_materialized_size: 1 << 30,
        }
    }
}

/// Resolves references to files in nested archives.
///
/// Each call is independent: nothing is cached between them,
/// so one resolver can be shared across threads.
#[derive(Debug, Default, Clone)]
pub struct Resolver<O = DefaultOpener> {
    opener: O,
    options: ResolveOptions,
}

impl Resolver<DefaultOpener> {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One archive layer being scanned.
/// Dropping it closes the container.
struct Layer {
    depth: usize,
    stream: ZipStream<Container>,
}

impl Layer {
    fn new(depth: usize, container: Container) -> Self {
        trace!("Scanning container at depth {}", depth);
        Self {
            depth,
            stream: ZipStream::new(container),
        }
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        trace!("Closing container at depth {}", self.depth);
    }
}

impl<O: Open> Resolver<O> {
    /// Creates a resolver that opens containers with the given opener.
    pub fn with_opener(opener: O) -> Self {
        Self {
            opener,
            options: ResolveOptions::default(),
        }
    }

    pub fn options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Finds the entry the reference points to and hands it to `handler`.
    ///
    /// Returns `Ok(None)` (without calling `handler`) if some segment
    /// of the reference didn't match anything.
    /// Errors from `handler` are passed back untouched.
    pub fn resolve<T, E, F>(&self, reference: &Reference, delivery: Delivery, handler: F) -> Result<Option<T>, E>
    where
        F: FnOnce(Resolved<'_>) -> Result<T, E>,
        E: From<ResolveError>,
    {
        let depth = reference.depth();
        if depth > self.options.max_depth {
            return Err(ResolveError::TooDeep {
                depth,
                limit: self.options.max_depth,
            }
            .into());
        }

        let location = reference.location();
        let container =
            self.opener
                .open_location(location)
                .map_err(|source| ResolveError::ContainerUnavailable {
                    location: location.to_string(),
                    source,
                })?;

        // No entries to look for: the container is the file.
        if depth == 0 {
            let mut container = container;
            let name = reference.segments()[0].as_str();
            debug!("Reference {} names a container, not an entry", reference);
            let resolved = match delivery {
                Delivery::Name => Resolved::Name(name),
                Delivery::Content => Resolved::Content {
                    name,
                    size: None,
                    reader: &mut container,
                },
            };
            return handler(resolved).map(Some);
        }

        // An explicit stack of layers, not recursion.
        let mut layers = vec![Layer::new(1, container)];

        while let Some(layer) = layers.last_mut() {
            let depth = layer.depth;
            let segment = reference.segments()[depth].as_str();

            let found = next_match(&mut layer.stream, segment)
                .map_err(ResolveError::corrupt_at(depth))?;
            let mut entry = match found {
                Some(entry) => entry,
                None => {
                    // Nothing here. Any layer above keeps looking.
                    debug!("No match for {} at depth {}", segment, depth);
                    layers.pop();
                    continue;
                }
            };

            let name = qualified_name(entry.name());
            let size = entry.size();
            debug!(
                "Entry {} with size {:?} matched {} at depth {}",
                name, size, segment, depth
            );

            if depth == reference.depth() {
                let resolved = match delivery {
                    Delivery::Name => Resolved::Name(&name),
                    Delivery::Content => Resolved::Content {
                        name: &name,
                        size,
                        reader: &mut entry,
                    },
                };
                return handler(resolved).map(Some);
            }

            let limit = self.options.max_materialized_size;
            let bytes = materialize(&mut entry, size, limit).map_err(|e| match e {
                Materialize::TooLarge => ResolveError::TooLarge {
                    name: name.clone(),
                    depth,
                    limit,
                },
                Materialize::Failed(source) => ResolveError::ContainerCorrupt {
                    depth,
                    source: io_to_zip(source),
                },
            })?;
            let nested = self.opener.open_nested(depth + 1, bytes);
            layers.push(Layer::new(depth + 1, nested));
        }

        Ok(None)
    }

    /// Resolves the reference and reads the entry it names into memory.
    pub fn read_to_vec(&self, reference: &Reference) -> ResolveResult<Option<(String, Vec<u8>)>> {
        self.resolve(reference, Delivery::Content, |resolved| {
            let mut contents = Vec::new();
            let name = resolved.name().to_owned();
            if let Resolved::Content { reader, .. } = resolved {
                reader
                    .read_to_end(&mut contents)
                    .map_err(|e| ResolveError::ContainerCorrupt {
                        depth: reference.depth(),
                        source: io_to_zip(e),
                    })?;
            }
            Ok((name, contents))
        })
    }
}

/// Parses `reference` and resolves it with a default [`Resolver`].
///
/// ```no_run
/// # use std::io::Read;
/// # use nestzip::{resolve, Delivery, Resolved};
/// let contents = resolve("outer.jar!/lib/inner.jar!/hello.txt", Delivery::Content, |r| {
///     let mut contents = String::new();
///     if let Resolved::Content { reader, .. } = r {
///         reader.read_to_string(&mut contents).map_err(anyhow::Error::from)?;
///     }
///     Ok::<_, anyhow::Error>(contents)
/// })?;
/// match contents {
///     Some(c) => println!("{}", c),
///     None => println!("No such file"),
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// [`Resolver`]: struct.Resolver.html
pub fn resolve<T, E, F>(reference: &str, delivery: Delivery, handler: F) -> Result<Option<T>, E>
where
    F: FnOnce(Resolved<'_>) -> Result<T, E>,
    E: From<ResolveError>,
{
    let reference = Reference::parse(reference)?;
    Resolver::new().resolve(&reference, delivery, handler)
}

/// Advances the stream to the first file whose name matches `segment`.
fn next_match<'s, R: io::BufRead>(
    stream: &'s mut ZipStream<R>,
    segment: &str,
) -> ZipResult<Option<ZipEntry<'s, R>>> {
    loop {
        // Decide with the entry borrowed, then pick it back up below.
        // (Returning it straight out of the loop upsets the borrow checker.)
        let matched = match stream.next_entry()? {
            None => return Ok(None),
            Some(entry) if entry.is_dir() => {
                trace!("Skipping directory {}", entry.name());
                false
            }
            Some(entry) => segment_matches(segment, entry.name()),
        };
        if matched {
            return Ok(stream.current_entry());
        }
    }
}

#[derive(Debug)]
enum Materialize {
    TooLarge,
    Failed(io::Error),
}

/// Reads an entry into memory so it can be scanned as an archive itself.
///
/// With a declared size we read exactly that many bytes, never more,
/// then read once more to hit the end of the entry (and check its CRC-32).
/// Without one we read until the entry ends.
fn materialize<R: Read>(entry: &mut R, declared: Option<u64>, limit: u64) -> Result<Vec<u8>, Materialize> {
    match declared {
        Some(size) => {
            if size > limit {
                return Err(Materialize::TooLarge);
            }
            let capacity = usize::try_from(size).map_err(|_| Materialize::TooLarge)?;
            let mut bytes = Vec::with_capacity(capacity);
            entry
                .by_ref()
                .take(size)
                .read_to_end(&mut bytes)
                .map_err(Materialize::Failed)?;
            match entry.read(&mut [0u8; 1]).map_err(Materialize::Failed)? {
                0 => Ok(bytes),
                _ => Err(Materialize::Failed(
                    ZipError::InvalidArchive("Entry is longer than its declared size").into(),
                )),
            }
        }
        None => {
            let mut bytes = Vec::new();
            // One past the limit tells us it went over.
            entry
                .take(limit.saturating_add(1))
                .read_to_end(&mut bytes)
                .map_err(Materialize::Failed)?;
            if bytes.len() as u64 > limit {
                return Err(Materialize::TooLarge);
            }
            Ok(bytes)
        }
    }
}

/// Recovers the decoder error an entry's reader squeezed into an `io::Error`.
fn io_to_zip(e: io::Error) -> ZipError {
    if e.get_ref().map_or(false, |inner| inner.is::<ZipError>()) {
        match e.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip_error)) => *zip_error,
            _ => ZipError::InvalidArchive("Unreadable entry"),
        }
    } else {
        ZipError::Io(e)
    }
}

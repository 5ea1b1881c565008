//! Opening containers: the outermost one from wherever the reference says,
//! and nested ones from the bytes of an entry we've already read out.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};

use log::*;

use crate::reference::Location;

/// An open archive layer, read front to back.
pub type Container = Box<dyn BufRead>;

/// Opens the containers a resolver walks through.
pub trait Open {
    /// Opens the outermost container.
    fn open_location(&self, location: &Location) -> io::Result<Container>;

    /// Wraps the buffered bytes of an entry so they can be read as a container.
    ///
    /// `depth` is the nesting depth the new container sits at (2 or more).
    fn open_nested(&self, depth: usize, bytes: Vec<u8>) -> Container {
        trace!("Opening {} buffered bytes at depth {}", bytes.len(), depth);
        Box::new(Cursor::new(bytes))
    }
}

impl<O: Open + ?Sized> Open for &O {
    fn open_location(&self, location: &Location) -> io::Result<Container> {
        (**self).open_location(location)
    }

    fn open_nested(&self, depth: usize, bytes: Vec<u8>) -> Container {
        (**self).open_nested(depth, bytes)
    }
}

/// Opens local files, and HTTP(S) URLs if built with the `http` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

impl Open for DefaultOpener {
    fn open_location(&self, location: &Location) -> io::Result<Container> {
        match location {
            Location::Path(path) => {
                debug!("Opening {}", path);
                let file = File::open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            Location::Url(url) => open_url(url),
        }
    }
}

#[cfg(feature = "http")]
fn open_url(url: &str) -> io::Result<Container> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(unsupported_url(url));
    }
    debug!("Fetching {}", url);
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Box::new(BufReader::new(response)))
}

#[cfg(not(feature = "http"))]
fn open_url(url: &str) -> io::Result<Container> {
    Err(unsupported_url(url))
}

fn unsupported_url(url: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("No support for fetching {}", url),
    )
}

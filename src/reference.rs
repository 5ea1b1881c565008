//! Parsing references to files nested in archives,
//! like `jar:file:/tmp/outer.jar!/lib/inner.jar!/foo.txt`.
//!
//! A reference is a chain of segments split on a delimiter (`!` by default).
//! The first names the outermost container; each one after that is a path
//! inside the archive the previous segment picked out.

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;

use crate::result::*;

/// The delimiter used by `jar:` URLs, and the default for everything else.
pub const DEFAULT_DELIMITER: char = '!';

const JAR_SCHEME: &str = "jar:";

/// Where to find the outermost container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A local file, given either as a plain path or a `file:` URL.
    Path(Utf8PathBuf),
    /// An `http://` or `https://` URL.
    /// References only parse to these with the `http` feature.
    Url(String),
}

impl Location {
    /// Rejects schemes nothing can open, so bad references fail before any I/O.
    fn parse(location: &str) -> Result<Self, &'static str> {
        let scheme = match scheme(location) {
            Some(s) => s,
            None => return Ok(Location::Path(Utf8PathBuf::from(location))),
        };
        let rest = &location[scheme.len() + 1..];
        if scheme.eq_ignore_ascii_case("file") {
            // file:///tmp/a.jar and file:/tmp/a.jar both mean /tmp/a.jar.
            let path = match rest.strip_prefix("//") {
                Some(authority_and_path) => authority_and_path
                    .strip_prefix("localhost")
                    .unwrap_or(authority_and_path),
                None => rest,
            };
            Ok(Location::Path(Utf8PathBuf::from(path)))
        } else if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
            if !rest.starts_with("//") {
                Err("Expected // after the URL scheme")
            } else if cfg!(feature = "http") {
                Ok(Location::Url(location.to_owned()))
            } else {
                Err("HTTP(S) URLs need the http feature")
            }
        } else {
            Err("Unsupported URL scheme")
        }
    }
}

/// Returns the URL scheme `location` starts with, if any.
///
/// Single letters are Windows drives (`C:/foo.jar`), not schemes.
fn scheme(location: &str) -> Option<&str> {
    let (scheme, _) = location.split_once(':')?;
    let valid = scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid {
        Some(scheme)
    } else {
        None
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(p) => write!(f, "{}", p),
            Location::Url(u) => write!(f, "{}", u),
        }
    }
}

/// A parsed reference: a container location and the entries to descend through.
///
/// Segments are fixed once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    raw: String,
    location: Location,
    /// All segments, the location's included, as they appeared in `raw`.
    segments: Vec<String>,
}

impl Reference {
    /// Parses `[jar:]<location>!<entry>!<entry>...`
    pub fn parse(raw: &str) -> ResolveResult<Self> {
        Self::parse_with_delimiter(raw, DEFAULT_DELIMITER)
    }

    /// Parses a `jar:` URL, rejecting anything with a different scheme.
    pub fn from_jar_url(raw: &str) -> ResolveResult<Self> {
        if !raw.starts_with(JAR_SCHEME) {
            return Err(invalid(raw, "Expected a jar: URL"));
        }
        Self::parse(raw)
    }

    /// Like [`parse()`](#method.parse), but splits on the given delimiter.
    pub fn parse_with_delimiter(raw: &str, delimiter: char) -> ResolveResult<Self> {
        let chain = raw.strip_prefix(JAR_SCHEME).unwrap_or(raw);
        if chain.is_empty() {
            return Err(invalid(raw, "Empty reference"));
        }

        let segments: Vec<String> = chain.split(delimiter).map(str::to_owned).collect();
        if segments[0].is_empty() {
            return Err(invalid(raw, "Missing container location"));
        }
        for segment in &segments[1..] {
            if segment.trim_start_matches('/').is_empty() {
                return Err(invalid(raw, "Empty entry path"));
            }
        }

        let location = Location::parse(&segments[0]).map_err(|reason| invalid(raw, reason))?;
        Ok(Self {
            raw: raw.to_owned(),
            location,
            segments,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Every segment, starting with the container location.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The segments naming entries, outermost first.
    pub fn entry_segments(&self) -> &[String] {
        &self.segments[1..]
    }

    /// How many archives deep the reference goes.
    /// Zero means it's just the container itself.
    pub fn depth(&self) -> usize {
        self.segments.len() - 1
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Reference {
    type Err = ResolveError;

    fn from_str(s: &str) -> ResolveResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(raw: &str, reason: &'static str) -> ResolveError {
    ResolveError::InvalidReference {
        reference: raw.to_owned(),
        reason,
    }
}

/// Entry paths are compared with a leading slash,
/// the way they're written after the delimiter.
pub(crate) fn qualified_name(entry_path: &str) -> String {
    format!("/{}", entry_path.trim_start_matches('/'))
}

/// Does `segment` pick out the entry at `entry_path`?
///
/// This is a prefix match: `/lib/inner` matches `lib/inner.jar`.
pub(crate) fn segment_matches(segment: &str, entry_path: &str) -> bool {
    let segment = segment.trim_start_matches('/');
    entry_path.trim_start_matches('/').starts_with(segment)
}

//! # UrlEntry
//!
//! One candidate URL taken from the input list.
//!
//! **Features:**
//! - Scheme-less lines are normalised by prepending `http://`
//! - Hostname extraction (`DNS`, `IPv4`, `IPv6`) backed by the `url` crate
//! - The normalised string is kept verbatim, because deduplication and
//!   output both use the exact text rather than semantic URL equality
//!
//! ## Example
//!
//! ```rust
//! use reachmap::ingest::UrlEntry;
//!
//! let entry = UrlEntry::new("example.com/login").unwrap();
//! assert_eq!(entry.raw, "http://example.com/login");
//! assert_eq!(entry.host, "example.com");
//!
//! let parsed: UrlEntry = "https://[::1]:8443/".parse().unwrap();
//! assert_eq!(parsed.host, "::1");
//! ```
use std::{borrow::Cow, fmt::Display, str::FromStr};

use thiserror::Error;
use url::{Host, Url};

/// Scheme prefix applied to lines that carry none.
pub const DEFAULT_SCHEME_PREFIX: &str = "http://";

/// A parsed candidate URL.
///
/// Contains:
/// - the normalised URL string (`raw`), exactly as it will be emitted
/// - the [`Scheme`] it was normalised to
/// - the hostname used as the domain key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntry {
    pub raw: String,
    pub scheme: Scheme,
    pub host: String,
}

impl Display for UrlEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (host: {})", self.raw, self.host)
    }
}

/// Represents the scheme of a URL (`http` or `https`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// Represents possible errors when turning an input line into a [`UrlEntry`].
#[derive(Debug, Error, PartialEq)]
pub enum UrlEntryErrors {
    #[error("The url is empty")]
    UrlEmpty,
    #[error("The line is not valid UTF-8")]
    InvalidEncoding,
    #[error("Invalid url => {0}")]
    Parse(#[from] url::ParseError),
    #[error("Invalid target => the url has no host")]
    MissingHost,
}

/// Prepends [`DEFAULT_SCHEME_PREFIX`] unless the line already starts with
/// `http://` or `https://`. The match is case-sensitive.
pub fn normalize(line: &str) -> Cow<'_, str> {
    if line.starts_with("http://") || line.starts_with("https://") {
        Cow::Borrowed(line)
    } else {
        Cow::Owned(format!("{DEFAULT_SCHEME_PREFIX}{line}"))
    }
}

impl FromStr for UrlEntry {
    type Err = UrlEntryErrors;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UrlEntry::new(s)
    }
}

impl TryFrom<&str> for UrlEntry {
    type Error = UrlEntryErrors;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        UrlEntry::new(value)
    }
}

impl TryFrom<&[u8]> for UrlEntry {
    type Error = UrlEntryErrors;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let line = std::str::from_utf8(value).map_err(|_| UrlEntryErrors::InvalidEncoding)?;
        UrlEntry::new(line)
    }
}

impl UrlEntry {
    /// Normalises `input` and extracts its hostname.
    ///
    /// # Errors
    /// Returns [`UrlEntryErrors`] if:
    /// - The line is empty
    /// - The normalised string is not a valid URL
    /// - The URL has no host component
    pub fn new(input: &str) -> Result<UrlEntry, UrlEntryErrors> {
        if input.is_empty() {
            return Err(UrlEntryErrors::UrlEmpty);
        }

        let raw = normalize(input);
        let parsed = Url::parse(&raw)?;

        let scheme = match parsed.scheme() {
            "https" => Scheme::Https,
            _ => Scheme::Http,
        };

        // Hosts must match resolver output: IPv6 without brackets, domains
        // without the trailing root dot.
        let host = match parsed.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.strip_suffix('.').unwrap_or(domain);
                if domain.is_empty() {
                    return Err(UrlEntryErrors::MissingHost);
                }
                domain.to_string()
            }
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(UrlEntryErrors::MissingHost),
        };

        Ok(UrlEntry {
            raw: raw.into_owned(),
            scheme,
            host,
        })
    }
}

//! # Streaming correlators
//!
//! The two long-lived stages sitting behind the external tools:
//!
//! ```text
//!  domains ──> [resolver] ──ip,domain──> ResolutionCorrelator ──ip──> [scanner]
//!                                              │ writes                  │
//!                                              v                         v
//!                                        ReverseIndex <──reads── ScanCorrelator ──ip,url──> sink
//! ```
//!
//! - [`ResolutionCorrelator`]: fills the reverse index from resolver output and
//!   forwards every IP to the scanner feed.
//! - [`ScanCorrelator`]: consumes the scanner's open/closed line protocol and
//!   emits each domain's URLs at most once.
//!
//! Both read their upstream through [`LineReader`], which only yields
//! newline-terminated lines: an unterminated trailing fragment is dropped.
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

pub mod resolution;
pub mod scan;

pub use resolution::{ResolutionCorrelator, parse_resolution};
pub use scan::{CorrelationRecord, ScanCorrelator, ScanReport};

/// Line splitter for the output of an external tool.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    component: &'static str,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R, component: &'static str) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(256),
            component,
        }
    }

    /// Next complete line with its terminator (`\n` or `\r\n`) removed.
    ///
    /// Returns `None` at end of stream. A read error is logged and also
    /// treated as end of stream, as is a trailing line with no terminator.
    pub async fn next_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.inner.read_until(b'\n', &mut self.buf).await {
            Ok(0) => None,
            Ok(_) => match self.buf.strip_suffix(b"\n") {
                Some(line) => {
                    let line = line.strip_suffix(b"\r").unwrap_or(line);
                    Some(String::from_utf8_lossy(line).into_owned())
                }
                None => {
                    debug!(
                        action = "drop",
                        component = self.component,
                        bytes = self.buf.len(),
                        "Dropping truncated trailing line"
                    );
                    None
                }
            },
            Err(e) => {
                warn!(
                    action = "read",
                    component = self.component,
                    error = %e,
                    "Read error, treating as end of stream"
                );
                None
            }
        }
    }

    /// Discards whatever is left on the stream so the producer can exit.
    pub async fn drain(&mut self) -> io::Result<u64> {
        tokio::io::copy_buf(&mut self.inner, &mut tokio::io::sink()).await
    }
}

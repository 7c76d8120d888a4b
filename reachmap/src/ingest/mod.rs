//! # URL Ingestor
//!
//! Synchronous pre-pass over the candidate URL list. It runs to completion
//! before any external tool is started and produces the [`DomainIndex`] every
//! later stage reads.
//!
//! Per non-blank line:
//! 1. normalise and parse it into a [`UrlEntry`] (failures are counted as
//!    invalid and skipped, never fatal),
//! 2. record the URL under its hostname, keeping first-occurrence order and
//!    dropping exact duplicates.
//!
//! The resolver input is the index's [`DomainIndex::domain_list`], written as a
//! single block once ingestion is done.
use std::{path::Path, sync::Arc, time::Instant};

use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
};
use tracing::{debug, info};

use crate::{
    error::{PipelineError, Result},
    index::DomainIndex,
    metrics::{Counter, Metrics},
};

pub mod url;
pub use self::url::{Scheme, UrlEntry, UrlEntryErrors};

/// Reader over the URL list.
pub type UrlSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Opens the URL list; `None` or `-` selects standard input.
///
/// Failing to open a file is fatal.
pub async fn open_source(path: Option<&Path>) -> Result<UrlSource> {
    match path {
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        Some(p) if p.as_os_str() == "-" => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        Some(p) => {
            let file = File::open(p).await.map_err(|source| PipelineError::Input {
                path: p.to_path_buf(),
                source,
            })?;
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

/// Builds the domain index from a URL list.
#[derive(Debug, Clone)]
pub struct Ingestor {
    metrics: Arc<Metrics>,
}

impl Ingestor {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    /// Consumes every line of `reader` and returns the frozen index.
    ///
    /// A final line without a trailing newline is still ingested.
    pub async fn ingest<R>(&self, mut reader: R) -> Result<DomainIndex>
    where
        R: AsyncBufRead + Unpin,
    {
        let start_time = Instant::now();
        info!(
            action = "start",
            component = "ingestion",
            "Reading candidate URLs"
        );

        let mut builder = DomainIndex::builder();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(PipelineError::InputRead)?;
            if n == 0 {
                break;
            }

            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            match UrlEntry::try_from(line) {
                Ok(entry) => {
                    self.metrics.incr(Counter::ValidUrl);
                    builder.insert(entry.host, entry.raw);
                }
                Err(e) => {
                    self.metrics.incr(Counter::InvalidUrl);
                    debug!(
                        action = "skip",
                        component = "ingestion",
                        line = %String::from_utf8_lossy(line),
                        error = %e,
                        "Invalid url"
                    );
                }
            }
        }

        let index = builder.build();
        self.metrics.set(Counter::UniqueDomain, index.len() as u64);

        info!(
            action = "complete",
            component = "ingestion",
            valid_urls = self.metrics.get(Counter::ValidUrl),
            invalid_urls = self.metrics.get(Counter::InvalidUrl),
            unique_domains = index.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "Ingestion completed"
        );

        Ok(index)
    }
}

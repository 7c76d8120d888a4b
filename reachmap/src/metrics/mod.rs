//! # Run metrics
//!
//! Every stage bumps counters on a shared [`Metrics`] value and marks the
//! [`Milestone`] it finishes. Once the pipeline drains, a [`MetricsReport`]
//! snapshot is rendered by a [`ReportFormatter`] and written to the log
//! destination.
use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{PipelineError, Result};

pub mod formatter;
pub use formatter::{JsonFormatter, PlainFormatter, ReportFormat, ReportFormatter};

/// The eight monotonically increasing run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    ValidUrl,
    InvalidUrl,
    UniqueDomain,
    TotalIp,
    UniqueIp,
    UniqueOpenIp,
    DomainOpen,
    UrlOpen,
}

impl Counter {
    pub const ALL: [Counter; 8] = [
        Counter::ValidUrl,
        Counter::InvalidUrl,
        Counter::UniqueDomain,
        Counter::TotalIp,
        Counter::UniqueIp,
        Counter::UniqueOpenIp,
        Counter::DomainOpen,
        Counter::UrlOpen,
    ];

    /// Key used in the metrics report.
    pub fn key(&self) -> &'static str {
        match self {
            Self::ValidUrl => "validUrlCount",
            Self::InvalidUrl => "invalidUrlCount",
            Self::UniqueDomain => "uniqueDomainCount",
            Self::TotalIp => "totalIpCount",
            Self::UniqueIp => "uniqueIpCount",
            Self::UniqueOpenIp => "uniqueOpenIpCount",
            Self::DomainOpen => "domainOpenCount",
            Self::UrlOpen => "urlOpenCount",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Stage-boundary timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    PipelineStart,
    IngestionComplete,
    ResolverComplete,
    ScannerComplete,
    AllComplete,
}

impl Milestone {
    pub const ALL: [Milestone; 5] = [
        Milestone::PipelineStart,
        Milestone::IngestionComplete,
        Milestone::ResolverComplete,
        Milestone::ScannerComplete,
        Milestone::AllComplete,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::PipelineStart => "pipelineStart",
            Self::IngestionComplete => "ingestionComplete",
            Self::ResolverComplete => "resolverComplete",
            Self::ScannerComplete => "scannerComplete",
            Self::AllComplete => "allComplete",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl Display for Milestone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared counters and timestamps for one pipeline run.
#[derive(Debug)]
pub struct Metrics {
    counters: [AtomicU64; Counter::ALL.len()],
    milestones: Mutex<[Option<DateTime<Utc>>; Milestone::ALL.len()]>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            milestones: Mutex::new([None; Milestone::ALL.len()]),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.slot()].fetch_add(n, Ordering::SeqCst);
    }

    /// Overwrites a counter. Only used for values fixed at a stage boundary,
    /// such as the unique domain count after ingestion.
    pub fn set(&self, counter: Counter, value: u64) {
        self.counters[counter.slot()].store(value, Ordering::SeqCst);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.slot()].load(Ordering::SeqCst)
    }

    /// Records the current time for `milestone`, replacing any earlier mark.
    pub fn mark(&self, milestone: Milestone) {
        self.milestones.lock()[milestone.slot()] = Some(Utc::now());
    }

    pub fn marked_at(&self, milestone: Milestone) -> Option<DateTime<Utc>> {
        self.milestones.lock()[milestone.slot()]
    }

    pub fn snapshot(&self) -> MetricsReport {
        MetricsReport {
            valid_url_count: self.get(Counter::ValidUrl),
            invalid_url_count: self.get(Counter::InvalidUrl),
            unique_domain_count: self.get(Counter::UniqueDomain),
            total_ip_count: self.get(Counter::TotalIp),
            unique_ip_count: self.get(Counter::UniqueIp),
            unique_open_ip_count: self.get(Counter::UniqueOpenIp),
            domain_open_count: self.get(Counter::DomainOpen),
            url_open_count: self.get(Counter::UrlOpen),
            timeline: Timeline {
                pipeline_start: self.marked_at(Milestone::PipelineStart),
                ingestion_complete: self.marked_at(Milestone::IngestionComplete),
                resolver_complete: self.marked_at(Milestone::ResolverComplete),
                scanner_complete: self.marked_at(Milestone::ScannerComplete),
                all_complete: self.marked_at(Milestone::AllComplete),
            },
        }
    }
}

/// Point-in-time copy of a run's [`Metrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub valid_url_count: u64,
    pub invalid_url_count: u64,
    pub unique_domain_count: u64,
    pub total_ip_count: u64,
    pub unique_ip_count: u64,
    pub unique_open_ip_count: u64,
    pub domain_open_count: u64,
    pub url_open_count: u64,
    pub timeline: Timeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub pipeline_start: Option<DateTime<Utc>>,
    pub ingestion_complete: Option<DateTime<Utc>>,
    pub resolver_complete: Option<DateTime<Utc>>,
    pub scanner_complete: Option<DateTime<Utc>>,
    pub all_complete: Option<DateTime<Utc>>,
}

impl MetricsReport {
    /// Counters in report order.
    pub fn counters(&self) -> [(Counter, u64); 8] {
        [
            (Counter::ValidUrl, self.valid_url_count),
            (Counter::InvalidUrl, self.invalid_url_count),
            (Counter::UniqueDomain, self.unique_domain_count),
            (Counter::TotalIp, self.total_ip_count),
            (Counter::UniqueIp, self.unique_ip_count),
            (Counter::UniqueOpenIp, self.unique_open_ip_count),
            (Counter::DomainOpen, self.domain_open_count),
            (Counter::UrlOpen, self.url_open_count),
        ]
    }

    /// Timestamps in report order.
    pub fn milestones(&self) -> [(Milestone, Option<DateTime<Utc>>); 5] {
        let t = &self.timeline;
        [
            (Milestone::PipelineStart, t.pipeline_start),
            (Milestone::IngestionComplete, t.ingestion_complete),
            (Milestone::ResolverComplete, t.resolver_complete),
            (Milestone::ScannerComplete, t.scanner_complete),
            (Milestone::AllComplete, t.all_complete),
        ]
    }

    /// Renders the report with `formatter` and writes it to `sink`.
    pub async fn write_to<W>(&self, formatter: &dyn ReportFormatter, mut sink: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let rendered = formatter.format(self).map_err(PipelineError::Report)?;
        sink.write_all(rendered.as_bytes())
            .await
            .map_err(PipelineError::Report)?;
        sink.flush().await.map_err(PipelineError::Report)
    }
}

//! # ReachMap
//!
//! A streaming correlation engine for internet-scale reconnaissance. Given a list
//! of candidate URLs, it answers for every URL: *was the host behind it reachable
//! on the scanned port, and through which IP address?*
//!
//! ReachMap sits between two external tools, a DNS resolver (e.g. `zdns`) and a
//! port scanner (e.g. `zmap`), consumes their line-oriented output as it arrives
//! and emits one `ip,url` correlation record per reachable URL without waiting for
//! either tool to finish.
//!
//! ## Features
//!
//! - **URL ingestion** - Scheme normalisation, hostname extraction, per-domain URL
//!   deduplication in first-occurrence order
//! - **Resolution correlation** - Incremental IP -> domain reverse index, live
//!   forwarding of every resolved IP to the scanner
//! - **Scan correlation** - Open/closed line protocol, each domain's URL set
//!   emitted at most once per run
//! - **Run metrics** - Eight counters and five stage timestamps, rendered as flat
//!   `key:value` text or JSON
//! - **Cancellation** - A shared token stops every stage and kills both tools on
//!   the first fatal error, a deadline, or an external signal
//!
//! ## Architecture
//!
//! ```text
//! +-------------+   domain list    +----------+   ip,domain   +----------------------+
//! |  Ingestor   | ---------------> | resolver | ------------> | ResolutionCorrelator |
//! +-------------+  (one block)     +----------+               +----------------------+
//!        |                                                       |  writes     | ip (bounded channel)
//!        v                                                       v             v
//!   DomainIndex  <------------- reads -------------  ReverseIndex        +-----------+
//!        ^                                               ^               |  scanner  |
//!        |                                               | reads         +-----------+
//!        +--------------------- ScanCorrelator <---------+---- open / #closed lines
//!                                     |
//!                                     v
//!                                ip,url records
//! ```
//!
//! - **`ingest`** - URL list parsing into a [`DomainIndex`]
//! - **`index`** - The read-only domain index and the synchronised reverse index
//! - **`correlate`** - The two streaming correlators
//! - **`metrics`** - Counters, timestamps and report formatters
//! - **`process`** - External tool commands and their feed tasks
//! - **`pipeline`** - Options, shared context and the orchestrator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use reachmap::{Pipeline, PipelineOptions, ToolCommand};
//!
//! # async fn demo() -> Result<(), reachmap::PipelineError> {
//! let options = PipelineOptions::default()
//!     .with_url_source("urls.txt")
//!     .with_resolver(ToolCommand::resolver("zdns", Path::new("RR.json")))
//!     .with_scanner(ToolCommand::scanner("zmap", Path::new("allowlist.txt"), 443));
//!
//! let report = Pipeline::new(options).run().await?;
//! println!("{} urls reachable", report.url_open_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using the correlators directly
//!
//! The stages are plain values over `AsyncBufRead` / `AsyncWrite`, so they can be
//! driven without subprocesses:
//!
//! ```rust
//! use std::sync::Arc;
//! use reachmap::{DomainIndex, Metrics, ReverseIndex, ScanCorrelator};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut builder = DomainIndex::builder();
//! builder.insert("a.com".into(), "http://a.com/x".into());
//!
//! let reverse = Arc::new(ReverseIndex::new());
//! reverse.record("1.1.1.1".parse().unwrap(), "a.com".into());
//!
//! let scan = ScanCorrelator::new(
//!     Arc::new(builder.build()),
//!     reverse,
//!     Arc::new(Metrics::new()),
//!     CancellationToken::new(),
//! );
//!
//! let mut out = Vec::new();
//! scan.run(&b"1.1.1.1\n"[..], &mut out).await.unwrap();
//! assert_eq!(out, b"1.1.1.1,http://a.com/x\n");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every stage boundary returns [`Result`]. Malformed records (bad URLs, garbled
//! resolver or scanner lines) are skipped and never surface as errors; unreadable
//! input, tool failures and output write failures do:
//!
//! ```rust,no_run
//! use reachmap::{Pipeline, PipelineError, PipelineOptions};
//!
//! # async fn demo() {
//! match Pipeline::new(PipelineOptions::default()).run().await {
//!     Ok(_) => {}
//!     Err(PipelineError::ToolExit { tool, status }) => eprintln!("{tool} failed: {status}"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! # }
//! ```

pub mod correlate;
pub mod error;
pub mod index;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod process;

pub use correlate::{CorrelationRecord, ResolutionCorrelator, ScanCorrelator, ScanReport};
pub use error::{PipelineError, Result, Stage};
pub use index::{DomainIndex, DomainIndexBuilder, ReverseIndex};
pub use ingest::{Ingestor, UrlEntry};
pub use metrics::{Counter, Metrics, MetricsReport, Milestone, ReportFormat};
pub use pipeline::{OutputTarget, Pipeline, PipelineContext, PipelineOptions};
pub use process::{ToolCommand, ToolKind};

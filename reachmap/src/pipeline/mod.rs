//! # Pipeline orchestrator
//!
//! Wires the stages together for one run:
//!
//! 1. **Ingestion** (synchronous pre-pass) builds the [`DomainIndex`].
//! 2. The resolver and scanner are started.
//! 3. Five tasks then run concurrently until every stream reaches EOF:
//!    - domain feed: domain block -> resolver stdin, then close
//!    - [`ResolutionCorrelator`]: resolver stdout -> reverse index + IP channel
//!    - target feed: IP channel -> scanner stdin, closed when the channel closes
//!    - [`ScanCorrelator`]: scanner stdout -> `ip,url` output sink
//!    - the two tool waits, which check exit statuses
//! 4. The metrics report is written once everything has drained.
//!
//! The first stage to fail cancels the shared [`CancellationToken`], which
//! stops the remaining stages and kills both tools. The same token is
//! cancelled by the optional deadline and can be handed to a signal handler
//! through [`Pipeline::cancellation_token`].
use std::{future::Future, sync::Arc, time::Instant};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    correlate::{ResolutionCorrelator, ScanCorrelator},
    error::{PipelineError, Result, Stage},
    index::{DomainIndex, ReverseIndex},
    ingest::{Ingestor, open_source},
    metrics::{Metrics, MetricsReport, Milestone},
    process,
};

pub mod options;
pub use options::{OutputSink, OutputTarget, PipelineOptions};

/// State shared by the stages of one run.
///
/// Each stage receives clones of only the handles it needs.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub reverse: Arc<ReverseIndex>,
    pub metrics: Arc<Metrics>,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One configured correlation run.
#[derive(Debug)]
pub struct Pipeline {
    options: PipelineOptions,
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            ctx: PipelineContext::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.ctx.metrics.clone()
    }

    /// Token that aborts the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Runs the pipeline to completion and writes the metrics report.
    ///
    /// Returns the first fatal error; no report is written in that case.
    pub async fn run(&self) -> Result<MetricsReport> {
        let total_start_time = Instant::now();
        self.ctx.metrics.mark(Milestone::PipelineStart);
        info!(action = "start", component = "pipeline", "Starting correlation run");

        let deadline = self.options.deadline.map(|limit| {
            let cancel = self.ctx.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(
                    action = "deadline",
                    component = "pipeline",
                    limit_secs = limit.as_secs_f64(),
                    "Deadline reached, cancelling run"
                );
                cancel.cancel();
            })
        });

        let outcome = self.correlate().await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        if let Err(e) = &outcome {
            self.ctx.cancel.cancel();
            error!(action = "abort", component = "pipeline", error = %e, "Pipeline failed");
        }
        outcome?;

        self.ctx.metrics.mark(Milestone::AllComplete);
        let report = self.ctx.metrics.snapshot();

        let formatter = self.options.report_format.formatter();
        let sink = self.options.report.open().await?;
        report.write_to(formatter.as_ref(), sink).await?;

        info!(
            action = "complete",
            component = "pipeline",
            records = report.url_open_count,
            duration_ms = total_start_time.elapsed().as_millis(),
            "Correlation run completed"
        );
        Ok(report)
    }

    async fn ingest(&self) -> Result<Arc<DomainIndex>> {
        let source = open_source(self.options.url_source.as_deref()).await?;
        let ingestor = Ingestor::new(self.ctx.metrics.clone());

        let index = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                return Err(PipelineError::Cancelled(Stage::Ingestion));
            }
            index = ingestor.ingest(source) => index?,
        };

        self.ctx.metrics.mark(Milestone::IngestionComplete);
        Ok(Arc::new(index))
    }

    async fn correlate(&self) -> Result<()> {
        let domains = self.ingest().await?;
        let cancel = &self.ctx.cancel;

        let mut resolver = self.options.resolver.spawn()?;
        let mut scanner = self.options.scanner.spawn()?;
        let output = self.options.output.open().await?;

        let resolver_in = resolver.take_stdin()?;
        let resolver_out = resolver.take_stdout()?;
        let scanner_in = scanner.take_stdin()?;
        let scanner_out = scanner.take_stdout()?;

        let (targets_tx, targets_rx) = mpsc::channel(self.options.target_buffer);

        let domain_feed = spawn_stage(
            Stage::DomainFeed,
            process::feed_domains(resolver_in, domains.domain_list(), cancel.clone()),
        );

        let resolution = spawn_stage(
            Stage::Resolution,
            ResolutionCorrelator::new(
                self.ctx.reverse.clone(),
                self.ctx.metrics.clone(),
                cancel.clone(),
            )
            .run(resolver_out, targets_tx),
        );

        let target_feed = spawn_stage(
            Stage::TargetFeed,
            process::feed_targets(targets_rx, scanner_in, cancel.clone()),
        );

        let scan = spawn_stage(
            Stage::Scan,
            ScanCorrelator::new(
                domains,
                self.ctx.reverse.clone(),
                self.ctx.metrics.clone(),
                cancel.clone(),
            )
            .run(scanner_out, output),
        );

        // Dropping a JoinHandle detaches the task, so the token is cancelled
        // before returning early to stop whatever is still running.
        let joined = tokio::try_join!(
            join_stage(Stage::DomainFeed, domain_feed),
            join_stage(Stage::Resolution, resolution),
            join_stage(Stage::TargetFeed, target_feed),
            join_stage(Stage::Scan, scan),
            resolver.wait(Stage::Resolution, cancel.clone()),
            scanner.wait(Stage::Scan, cancel.clone()),
        );

        match joined {
            Ok((_, _, fed, _, _, _)) => {
                info!(
                    action = "drained",
                    component = "pipeline",
                    scan_targets = fed,
                    "All stages finished"
                );
                Ok(())
            }
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    }
}

fn spawn_stage<F, T>(stage: Stage, fut: F) -> JoinHandle<Result<T>>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(async move {
        let res = fut.await;
        match &res {
            Err(e) if !e.is_cancellation() => {
                warn!(
                    action = "fail",
                    component = "pipeline",
                    %stage,
                    error = %e,
                    "Stage failed"
                );
            }
            _ => {}
        }
        res
    })
}

async fn join_stage<T>(stage: Stage, handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .map_err(|source| PipelineError::Join { stage, source })?
}

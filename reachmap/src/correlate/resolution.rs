use std::{net::IpAddr, sync::Arc, time::Instant};

use tokio::{io::AsyncBufRead, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::LineReader;
use crate::{
    error::{PipelineError, Result, Stage},
    index::ReverseIndex,
    metrics::{Counter, Metrics, Milestone},
};

/// Parses one resolver line of the form `ip,domain[,...]`.
///
/// Only the first two fields are used. The domain is lowercased and a trailing
/// root dot removed. Returns `None` when the IP does not parse or the domain is
/// empty.
pub fn parse_resolution(line: &str) -> Option<(IpAddr, String)> {
    let mut fields = line.split(',');
    let ip = fields.next()?.trim().parse::<IpAddr>().ok()?;
    let domain = fields.next()?.trim();
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() {
        return None;
    }
    Some((ip, domain.to_ascii_lowercase()))
}

/// Consumes resolver output, maintains the reverse index and feeds the scanner.
///
/// Every resolved IP is forwarded, repeats included; deduplicating scan
/// targets is left to the scanner.
#[derive(Debug, Clone)]
pub struct ResolutionCorrelator {
    reverse: Arc<ReverseIndex>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl ResolutionCorrelator {
    pub fn new(
        reverse: Arc<ReverseIndex>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reverse,
            metrics,
            cancel,
        }
    }

    /// Runs until the resolver output ends.
    ///
    /// `targets` is dropped on return, which closes the scanner feed and is the
    /// scanner's only signal that no more targets are coming.
    pub async fn run<R>(self, input: R, targets: mpsc::Sender<IpAddr>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let start_time = Instant::now();
        info!(
            action = "start",
            component = "resolution",
            "Correlating resolver output"
        );

        let mut lines = LineReader::new(input, "resolution");
        let mut malformed = 0u64;

        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(PipelineError::Cancelled(Stage::Resolution));
                }
                line = lines.next_line() => line,
            };
            let Some(line) = line else { break };

            let Some((ip, domain)) = parse_resolution(&line) else {
                malformed += 1;
                debug!(
                    action = "skip",
                    component = "resolution",
                    line = %line,
                    "Malformed resolver line"
                );
                continue;
            };

            self.metrics.incr(Counter::TotalIp);
            // The index entry must exist before the IP reaches the scanner.
            if self.reverse.record(ip, domain) {
                self.metrics.incr(Counter::UniqueIp);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(PipelineError::Cancelled(Stage::Resolution));
                }
                sent = targets.send(ip) => {
                    sent.map_err(|_| PipelineError::Disconnected(Stage::Resolution))?;
                }
            }
        }

        drop(targets);
        self.metrics.mark(Milestone::ResolverComplete);

        info!(
            action = "complete",
            component = "resolution",
            total_ips = self.metrics.get(Counter::TotalIp),
            unique_ips = self.reverse.len(),
            malformed,
            duration_ms = start_time.elapsed().as_millis(),
            "Resolver output exhausted"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_resolution_uses_first_two_fields() {
        assert_eq!(
            parse_resolution("1.1.1.1,a.com"),
            Some((ip("1.1.1.1"), "a.com".to_string()))
        );
        assert_eq!(
            parse_resolution(" 2001:db8::1 , B.com. ,A,300"),
            Some((ip("2001:db8::1"), "b.com".to_string()))
        );
    }

    #[test]
    fn test_parse_resolution_rejects_malformed() {
        assert_eq!(parse_resolution(""), None);
        assert_eq!(parse_resolution("1.1.1.1"), None);
        assert_eq!(parse_resolution("1.1.1.1,"), None);
        assert_eq!(parse_resolution("not-an-ip,a.com"), None);
    }

    async fn run(input: &'static [u8]) -> (Arc<ReverseIndex>, Arc<Metrics>, Vec<IpAddr>) {
        let reverse = Arc::new(ReverseIndex::new());
        let metrics = Arc::new(Metrics::new());
        let (tx, mut rx) = mpsc::channel(16);

        let correlator =
            ResolutionCorrelator::new(reverse.clone(), metrics.clone(), CancellationToken::new());
        let task = tokio::spawn(correlator.run(input, tx));

        let mut forwarded = Vec::new();
        while let Some(ip) = rx.recv().await {
            forwarded.push(ip);
        }
        task.await.unwrap().unwrap();

        (reverse, metrics, forwarded)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resolution_forwards_every_ip() {
        let input = b"1.1.1.1,a.com\n2.2.2.2,b.com\n1.1.1.1,c.com\n1.1.1.1,a.com\n";
        let (reverse, metrics, forwarded) = run(input).await;

        assert_eq!(
            forwarded,
            vec![ip("1.1.1.1"), ip("2.2.2.2"), ip("1.1.1.1"), ip("1.1.1.1")]
        );
        assert_eq!(metrics.get(Counter::TotalIp), 4);
        assert_eq!(metrics.get(Counter::UniqueIp), 2);
        assert_eq!(
            reverse.domains(&ip("1.1.1.1")),
            vec!["a.com", "c.com", "a.com"]
        );
        assert!(metrics.marked_at(Milestone::ResolverComplete).is_some());
    }

    #[tokio::test]
    async fn test_resolution_drops_truncated_trailing_line() {
        let (reverse, metrics, forwarded) = run(b"1.1.1.1,a.com\n2.2.2.2,b.c").await;

        assert_eq!(forwarded, vec![ip("1.1.1.1")]);
        assert_eq!(metrics.get(Counter::TotalIp), 1);
        assert!(reverse.domains(&ip("2.2.2.2")).is_empty());
    }

    #[tokio::test]
    async fn test_resolution_skips_malformed_lines() {
        let (_, metrics, forwarded) = run(b"garbage\n\n3.3.3.3,c.com\n,\n").await;
        assert_eq!(forwarded, vec![ip("3.3.3.3")]);
        assert_eq!(metrics.get(Counter::TotalIp), 1);
    }

    #[tokio::test]
    async fn test_resolution_reports_closed_feed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let correlator = ResolutionCorrelator::new(
            Arc::new(ReverseIndex::new()),
            Arc::new(Metrics::new()),
            CancellationToken::new(),
        );
        let res = correlator.run(&b"1.1.1.1,a.com\n"[..], tx).await;
        assert!(matches!(
            res,
            Err(PipelineError::Disconnected(Stage::Resolution))
        ));
    }

    #[tokio::test]
    async fn test_resolution_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(1);

        let correlator = ResolutionCorrelator::new(
            Arc::new(ReverseIndex::new()),
            Arc::new(Metrics::new()),
            cancel,
        );
        let res = correlator.run(&b"1.1.1.1,a.com\n"[..], tx).await;
        assert!(matches!(res, Err(PipelineError::Cancelled(Stage::Resolution))));
    }
}

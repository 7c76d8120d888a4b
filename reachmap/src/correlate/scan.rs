use std::{
    collections::HashSet,
    fmt::Display,
    net::IpAddr,
    sync::Arc,
    time::Instant,
};

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::LineReader;
use crate::{
    error::{PipelineError, Result, Stage},
    index::{DomainIndex, ReverseIndex},
    metrics::{Counter, Metrics, Milestone},
};

/// One line of scanner output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanReport {
    /// Bare IP: the address answered on the scanned port.
    Open(IpAddr),
    /// `#`-prefixed IP: the address is reported closed.
    Closed(IpAddr),
    /// Empty line: end of scanner output.
    End,
    /// Anything that is not one of the above.
    Malformed,
}

impl ScanReport {
    pub fn parse(line: &str) -> ScanReport {
        let line = line.trim();
        if line.is_empty() {
            return ScanReport::End;
        }

        let (closed, addr) = match line.strip_prefix('#') {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };

        match addr.parse::<IpAddr>() {
            Ok(ip) if closed => ScanReport::Closed(ip),
            Ok(ip) => ScanReport::Open(ip),
            Err(_) => ScanReport::Malformed,
        }
    }
}

/// The system's unit of result: a URL reachable through an IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationRecord {
    pub ip: IpAddr,
    pub url: String,
}

impl Display for CorrelationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.ip, self.url)
    }
}

/// Consumes scanner output and emits `ip,url` records.
///
/// Owns the open-IP set and the domain-sent set; neither is shared. A
/// domain's URL list is emitted as a unit the first time any IP resolving to
/// it is reported open, and never again.
#[derive(Debug)]
pub struct ScanCorrelator {
    domains: Arc<DomainIndex>,
    reverse: Arc<ReverseIndex>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    open: HashSet<IpAddr>,
    sent: HashSet<String>,
}

impl ScanCorrelator {
    pub fn new(
        domains: Arc<DomainIndex>,
        reverse: Arc<ReverseIndex>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            domains,
            reverse,
            metrics,
            cancel,
            open: HashSet::new(),
            sent: HashSet::new(),
        }
    }

    pub fn is_open(&self, ip: &IpAddr) -> bool {
        self.open.contains(ip)
    }

    pub fn is_sent(&self, domain: &str) -> bool {
        self.sent.contains(domain)
    }

    /// Handles an "open" report for `ip` and returns the records to emit.
    ///
    /// The IP's domains are looked up on every report, so a domain resolved
    /// to an already-open IP later in the run is still emitted. An IP missing
    /// from the reverse index yields nothing.
    pub fn observe_open(&mut self, ip: IpAddr) -> Vec<CorrelationRecord> {
        if self.open.insert(ip) {
            self.metrics.incr(Counter::UniqueOpenIp);
        }

        let mut records = Vec::new();
        for domain in self.reverse.domains(&ip) {
            if self.sent.contains(&domain) {
                continue;
            }
            let Some(urls) = self.domains.urls(&domain) else {
                debug!(
                    action = "skip",
                    component = "scan",
                    %ip,
                    domain = %domain,
                    "Resolved domain is not in the url list"
                );
                continue;
            };

            self.metrics.incr(Counter::DomainOpen);
            self.metrics.add(Counter::UrlOpen, urls.len() as u64);
            records.extend(urls.iter().map(|url| CorrelationRecord {
                ip,
                url: url.clone(),
            }));
            self.sent.insert(domain);
        }

        records
    }

    /// Handles a "closed" report. Returns `true` when `ip` was previously open;
    /// reports for addresses never seen open are ignored.
    pub fn observe_closed(&mut self, ip: IpAddr) -> bool {
        let was_open = self.open.contains(&ip);
        if was_open {
            trace!(
                action = "closed",
                component = "scan",
                %ip,
                "Open address reported closed"
            );
        }
        was_open
    }

    /// Runs until the scanner output ends (EOF, read error or an empty line),
    /// writing one `ip,url` line per record to `sink`.
    ///
    /// Output is flushed after every open report. Sink errors are fatal.
    pub async fn run<R, W>(mut self, input: R, sink: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let start_time = Instant::now();
        info!(
            action = "start",
            component = "scan",
            "Correlating scanner output"
        );

        let mut lines = LineReader::new(input, "scan");
        let mut sink = BufWriter::new(sink);
        let mut stopped_early = false;
        let mut malformed = 0u64;

        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled(Stage::Scan)),
                line = lines.next_line() => line,
            };
            let Some(line) = line else { break };

            match ScanReport::parse(&line) {
                ScanReport::Open(ip) => {
                    let records = self.observe_open(ip);
                    if records.is_empty() {
                        continue;
                    }
                    for record in &records {
                        sink.write_all(format!("{record}\n").as_bytes())
                            .await
                            .map_err(PipelineError::output(Stage::Scan))?;
                    }
                    sink.flush().await.map_err(PipelineError::output(Stage::Scan))?;
                }
                ScanReport::Closed(ip) => {
                    self.observe_closed(ip);
                }
                ScanReport::End => {
                    stopped_early = true;
                    break;
                }
                ScanReport::Malformed => {
                    malformed += 1;
                    debug!(
                        action = "skip",
                        component = "scan",
                        line = %line,
                        "Malformed scanner line"
                    );
                }
            }
        }

        sink.flush().await.map_err(PipelineError::output(Stage::Scan))?;
        self.metrics.mark(Milestone::ScannerComplete);

        info!(
            action = "complete",
            component = "scan",
            open_ips = self.metrics.get(Counter::UniqueOpenIp),
            open_domains = self.metrics.get(Counter::DomainOpen),
            open_urls = self.metrics.get(Counter::UrlOpen),
            malformed,
            duration_ms = start_time.elapsed().as_millis(),
            "Scanner output exhausted"
        );

        if stopped_early {
            let discarded = tokio::select! {
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled(Stage::Scan)),
                n = lines.drain() => n.unwrap_or(0),
            };
            debug!(
                action = "drain",
                component = "scan",
                bytes = discarded,
                "Discarded scanner output after terminator"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn domain_index(urls: &[&str]) -> Arc<DomainIndex> {
        let mut builder = DomainIndex::builder();
        for raw in urls {
            let entry = crate::ingest::UrlEntry::new(raw).unwrap();
            builder.insert(entry.host, entry.raw);
        }
        Arc::new(builder.build())
    }

    fn correlator(urls: &[&str], resolved: &[(&str, &str)]) -> (ScanCorrelator, Arc<Metrics>) {
        let reverse = Arc::new(ReverseIndex::new());
        for (addr, domain) in resolved {
            reverse.record(ip(addr), domain.to_string());
        }
        let metrics = Arc::new(Metrics::new());
        let scan = ScanCorrelator::new(
            domain_index(urls),
            reverse,
            metrics.clone(),
            CancellationToken::new(),
        );
        (scan, metrics)
    }

    #[test]
    fn test_scan_report_parse() {
        assert_eq!(ScanReport::parse("1.1.1.1"), ScanReport::Open(ip("1.1.1.1")));
        assert_eq!(ScanReport::parse("#1.1.1.1"), ScanReport::Closed(ip("1.1.1.1")));
        assert_eq!(ScanReport::parse("# ::1 "), ScanReport::Closed(ip("::1")));
        assert_eq!(ScanReport::parse(""), ScanReport::End);
        assert_eq!(ScanReport::parse("hello"), ScanReport::Malformed);
        assert_eq!(ScanReport::parse("#"), ScanReport::Malformed);
    }

    #[test]
    fn test_correlation_record_display() {
        let record = CorrelationRecord {
            ip: ip("1.1.1.1"),
            url: "http://a.com/x".into(),
        };
        assert_eq!(record.to_string(), "1.1.1.1,http://a.com/x");
    }

    #[test]
    fn test_observe_open_emits_domain_once() {
        let (mut scan, metrics) = correlator(
            &["http://a.com/x", "http://a.com/y"],
            &[("1.1.1.1", "a.com"), ("2.2.2.2", "a.com")],
        );

        let first = scan.observe_open(ip("1.1.1.1"));
        assert_eq!(
            first.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec!["1.1.1.1,http://a.com/x", "1.1.1.1,http://a.com/y"]
        );
        assert!(scan.observe_open(ip("2.2.2.2")).is_empty());
        assert!(scan.observe_open(ip("1.1.1.1")).is_empty());

        assert_eq!(metrics.get(Counter::UniqueOpenIp), 2);
        assert_eq!(metrics.get(Counter::DomainOpen), 1);
        assert_eq!(metrics.get(Counter::UrlOpen), 2);
    }

    #[test]
    fn test_observe_open_skips_domains_already_sent() {
        let (mut scan, _) = correlator(
            &["d1.com/a", "d2.com/b"],
            &[("9.9.9.9", "d1.com"), ("8.8.8.8", "d1.com"), ("8.8.8.8", "d2.com")],
        );

        assert_eq!(scan.observe_open(ip("9.9.9.9")).len(), 1);
        let second = scan.observe_open(ip("8.8.8.8"));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].url, "http://d2.com/b");
    }

    #[test]
    fn test_observe_open_unknown_ip_is_harmless() {
        let (mut scan, metrics) = correlator(&["a.com"], &[]);
        assert!(scan.observe_open(ip("4.4.4.4")).is_empty());
        assert!(scan.is_open(&ip("4.4.4.4")));
        assert_eq!(metrics.get(Counter::DomainOpen), 0);
    }

    #[test]
    fn test_observe_open_unknown_domain_is_not_marked_sent() {
        let (mut scan, metrics) = correlator(&["a.com"], &[("1.1.1.1", "other.com")]);
        assert!(scan.observe_open(ip("1.1.1.1")).is_empty());
        assert!(!scan.is_sent("other.com"));
        assert_eq!(metrics.get(Counter::DomainOpen), 0);
    }

    #[test]
    fn test_observe_closed_requires_prior_open() {
        let (mut scan, metrics) = correlator(&["a.com"], &[("1.1.1.1", "a.com")]);
        assert!(!scan.observe_closed(ip("1.1.1.1")));
        let before = metrics.snapshot();

        scan.observe_open(ip("1.1.1.1"));
        assert!(scan.observe_closed(ip("1.1.1.1")));
        assert!(!scan.observe_closed(ip("2.2.2.2")));
        assert_eq!(before.unique_open_ip_count, 0);
        assert_eq!(metrics.get(Counter::UniqueOpenIp), 1);
    }

    #[tokio::test]
    async fn test_scan_run_round_trip() {
        let (scan, metrics) = correlator(
            &["http://a.com/x", "http://a.com/y", "http://b.com/z"],
            &[("1.1.1.1", "a.com"), ("2.2.2.2", "b.com")],
        );

        let mut out = Vec::new();
        scan.run(&b"1.1.1.1\n2.2.2.2\n"[..], &mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1.1.1.1,http://a.com/x\n1.1.1.1,http://a.com/y\n2.2.2.2,http://b.com/z\n"
        );
        assert_eq!(metrics.get(Counter::UrlOpen), 3);
        assert!(metrics.marked_at(Milestone::ScannerComplete).is_some());
    }

    #[tokio::test]
    async fn test_scan_run_matches_fully_qualified_hostnames() {
        let (addr, domain) = crate::correlate::parse_resolution("1.1.1.1,a.com.").unwrap();
        let addr = addr.to_string();
        let (scan, metrics) = correlator(
            &["http://a.com./x"],
            &[(addr.as_str(), domain.as_str())],
        );

        let mut out = Vec::new();
        scan.run(&b"1.1.1.1\n"[..], &mut out).await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "1.1.1.1,http://a.com./x\n");
        assert_eq!(metrics.get(Counter::DomainOpen), 1);
    }

    #[tokio::test]
    async fn test_scan_run_closed_for_never_open_changes_nothing() {
        let (scan, metrics) = correlator(&["a.com"], &[("1.1.1.1", "a.com")]);

        let mut out = Vec::new();
        scan.run(&b"#1.1.1.1\n"[..], &mut out).await.unwrap();

        assert!(out.is_empty());
        let report = metrics.snapshot();
        assert_eq!(report.unique_open_ip_count, 0);
        assert_eq!(report.domain_open_count, 0);
        assert_eq!(report.url_open_count, 0);
    }

    #[tokio::test]
    async fn test_scan_run_stops_at_empty_line() {
        let (scan, _) = correlator(
            &["a.com", "b.com"],
            &[("1.1.1.1", "a.com"), ("2.2.2.2", "b.com")],
        );

        let mut out = Vec::new();
        scan.run(&b"1.1.1.1\n\n2.2.2.2\n"[..], &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1.1.1.1,http://a.com\n");
    }

    #[tokio::test]
    async fn test_scan_run_closed_line_uses_its_own_address() {
        let (scan, metrics) = correlator(
            &["a.com", "b.com"],
            &[("1.1.1.1", "a.com"), ("2.2.2.2", "b.com")],
        );

        let mut out = Vec::new();
        scan.run(&b"1.1.1.1\n#2.2.2.2\nbogus\n2.2.2.2\n"[..], &mut out)
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1.1.1.1,http://a.com\n2.2.2.2,http://b.com\n"
        );
        assert_eq!(metrics.get(Counter::UniqueOpenIp), 2);
    }
}

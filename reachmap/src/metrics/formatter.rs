use std::{io, str::FromStr};

use chrono::SecondsFormat;

use super::MetricsReport;

/// Trait for rendering a [`MetricsReport`].
///
/// A `ReportFormatter` turns the end-of-run snapshot into the text written to
/// the log destination.
pub trait ReportFormatter: Send + Sync + 'static {
    fn format(&self, report: &MetricsReport) -> io::Result<String>;
}

/// Flat `key:value` lines: the eight counters, then the five timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFormatter;

/// Pretty-printed JSON with camelCase keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl ReportFormatter for PlainFormatter {
    fn format(&self, report: &MetricsReport) -> io::Result<String> {
        let mut out = String::new();
        for (counter, value) in report.counters() {
            out.push_str(&format!("{}:{}\n", counter.key(), value));
        }
        for (milestone, at) in report.milestones() {
            let stamp = at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_else(|| "unset".to_string());
            out.push_str(&format!("{}:{}\n", milestone.label(), stamp));
        }
        Ok(out)
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &MetricsReport) -> io::Result<String> {
        let mut out = serde_json::to_string_pretty(report)?;
        out.push('\n');
        Ok(out)
    }
}

/// Selects a [`ReportFormatter`] by name (`plain` or `json`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Plain,
    Json,
}

impl ReportFormat {
    pub fn formatter(&self) -> Box<dyn ReportFormatter> {
        match self {
            Self::Plain => Box::new(PlainFormatter),
            Self::Json => Box::new(JsonFormatter),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format '{other}' => plain or json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Counter, Metrics, Milestone};

    fn sample() -> MetricsReport {
        let metrics = Metrics::new();
        metrics.add(Counter::ValidUrl, 3);
        metrics.incr(Counter::InvalidUrl);
        metrics.set(Counter::UniqueDomain, 2);
        metrics.add(Counter::UrlOpen, 3);
        for m in Milestone::ALL {
            metrics.mark(m);
        }
        metrics.snapshot()
    }

    #[test]
    fn test_plain_formatter_layout() {
        let text = PlainFormatter.format(&sample()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0], "validUrlCount:3");
        assert_eq!(lines[1], "invalidUrlCount:1");
        assert_eq!(lines[2], "uniqueDomainCount:2");
        assert_eq!(lines[7], "urlOpenCount:3");
        assert!(lines[8].starts_with("pipelineStart:"));
        assert!(lines[12].starts_with("allComplete:"));
        assert!(lines[12].ends_with('Z'));
    }

    #[test]
    fn test_plain_formatter_unset_timestamp() {
        let text = PlainFormatter.format(&Metrics::new().snapshot()).unwrap();
        assert!(text.contains("resolverComplete:unset\n"));
    }

    #[test]
    fn test_json_formatter_round_trips() {
        let report = sample();
        let text = JsonFormatter.format(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["validUrlCount"], 3);
        assert_eq!(value["urlOpenCount"], 3);
        assert!(value["timeline"]["allComplete"].is_string());

        let back: MetricsReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_report_format_from_str() {
        assert_eq!("JSON".parse::<ReportFormat>(), Ok(ReportFormat::Json));
        assert_eq!("plain".parse::<ReportFormat>(), Ok(ReportFormat::Plain));
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}

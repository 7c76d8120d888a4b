use std::{path::PathBuf, time::Duration};

use clap::{ArgAction, Parser};
use reachmap::{
    OutputTarget, PipelineOptions, ReportFormat, ToolCommand,
    pipeline::options::{
        DEFAULT_ALLOWLIST, DEFAULT_PORT, DEFAULT_RESOLVER, DEFAULT_RESOLVER_ARTIFACT,
        DEFAULT_SCANNER, DEFAULT_TARGET_BUFFER,
    },
};

#[derive(Parser, Debug)]
#[command(
    name = "reachmap",
    about = "Correlate candidate URLs with DNS resolution and port-scan results",
    version,
    long_about = None
)]
pub struct Args {
    /// File containing all urls, one per line (`-` for stdin)
    #[arg(long, env = "REACHMAP_URL_FILE", default_value = "-")]
    pub url_file: PathBuf,

    /// Destination for `ip,url` records (`-` for stdout)
    #[arg(short, long, env = "REACHMAP_OUTPUT", default_value = "-")]
    pub output: String,

    /// File for the metrics report (stderr when omitted)
    #[arg(long, env = "REACHMAP_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Metrics report format (plain or json)
    #[arg(long, env = "REACHMAP_REPORT_FORMAT", default_value = "plain")]
    pub report_format: ReportFormat,

    /// Location of the resolver binary
    #[arg(long, env = "REACHMAP_RESOLVER", default_value = DEFAULT_RESOLVER)]
    pub resolver: PathBuf,

    /// File for the raw output of the resolver
    #[arg(long, env = "REACHMAP_ZDNS_OUTPUT_FILE", default_value = DEFAULT_RESOLVER_ARTIFACT)]
    pub zdns_output_file: PathBuf,

    /// Extra argument passed to the resolver (repeatable)
    #[arg(long = "resolver-arg", allow_hyphen_values = true)]
    pub resolver_args: Vec<String>,

    /// Location of the scanner binary
    #[arg(
        long,
        visible_alias = "zmap-location",
        env = "REACHMAP_SCANNER",
        default_value = DEFAULT_SCANNER
    )]
    pub scanner: PathBuf,

    /// Allow-list file handed to the scanner
    #[arg(long, env = "REACHMAP_ALLOWLIST", default_value = DEFAULT_ALLOWLIST)]
    pub allowlist: PathBuf,

    /// Port to scan
    #[arg(short, long, env = "REACHMAP_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Extra argument passed to the scanner (repeatable)
    #[arg(long = "scanner-arg", allow_hyphen_values = true)]
    pub scanner_args: Vec<String>,

    /// Capacity of the resolver -> scanner target channel
    #[arg(long, default_value_t = DEFAULT_TARGET_BUFFER)]
    pub target_buffer: usize,

    /// Cancel the run after this many seconds
    #[arg(long, env = "REACHMAP_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("--port must be greater than 0");
        }
        if self.target_buffer == 0 {
            anyhow::bail!("--target-buffer must be greater than 0");
        }
        if self.deadline_secs == Some(0) {
            anyhow::bail!("--deadline-secs must be greater than 0");
        }
        Ok(())
    }

    pub fn to_options(&self) -> PipelineOptions {
        let output = self
            .output
            .parse::<OutputTarget>()
            .unwrap_or(OutputTarget::Stdout);
        let report = self
            .log_file
            .clone()
            .map(OutputTarget::File)
            .unwrap_or(OutputTarget::Stderr);

        PipelineOptions::default()
            .with_url_source(&self.url_file)
            .with_output(output)
            .with_report(report, self.report_format)
            .with_resolver(
                ToolCommand::resolver(&self.resolver, &self.zdns_output_file)
                    .args(&self.resolver_args),
            )
            .with_scanner(
                ToolCommand::scanner(&self.scanner, &self.allowlist, self.port)
                    .args(&self.scanner_args),
            )
            .with_target_buffer(self.target_buffer)
            .with_deadline(self.deadline_secs.map(Duration::from_secs))
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

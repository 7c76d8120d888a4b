use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use tokio::{fs::File, io::AsyncWrite};

use crate::{
    error::{PipelineError, Result},
    metrics::ReportFormat,
    process::ToolCommand,
};

/// Default resolver executable.
pub const DEFAULT_RESOLVER: &str = "zdns";
/// Default file where the resolver keeps its raw output.
pub const DEFAULT_RESOLVER_ARTIFACT: &str = "RR.json";
/// Default scanner executable.
pub const DEFAULT_SCANNER: &str = "zmap";
/// Default scanner allow-list.
pub const DEFAULT_ALLOWLIST: &str = "allowlist.txt";
pub const DEFAULT_PORT: u16 = 80;
/// Default capacity of the resolver -> scanner IP channel.
pub const DEFAULT_TARGET_BUFFER: usize = 1024;

/// Destination for correlation records or the metrics report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    Stdout,
    #[default]
    Stderr,
    File(PathBuf),
}

/// Writer handed to a stage.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

impl OutputTarget {
    pub async fn open(&self) -> Result<OutputSink> {
        match self {
            Self::Stdout => Ok(Box::new(tokio::io::stdout())),
            Self::Stderr => Ok(Box::new(tokio::io::stderr())),
            Self::File(path) => {
                let file = File::create(path)
                    .await
                    .map_err(|source| PipelineError::Create {
                        path: path.clone(),
                        source,
                    })?;
                Ok(Box::new(file))
            }
        }
    }
}

impl FromStr for OutputTarget {
    type Err = std::convert::Infallible;

    /// `-` (or an empty string) selects stdout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "-" => Self::Stdout,
            path => Self::File(PathBuf::from(path)),
        })
    }
}

/// Options for a pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// URL list; `None` reads standard input.
    pub url_source: Option<PathBuf>,
    /// Where `ip,url` records go.
    pub output: OutputTarget,
    /// Where the metrics report goes.
    pub report: OutputTarget,
    pub report_format: ReportFormat,
    pub resolver: ToolCommand,
    pub scanner: ToolCommand,
    /// Capacity of the bounded IP channel between the correlators.
    pub target_buffer: usize,
    /// Wall-clock limit after which the run is cancelled.
    pub deadline: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            url_source: None,
            output: OutputTarget::Stdout,
            report: OutputTarget::Stderr,
            report_format: ReportFormat::Plain,
            resolver: ToolCommand::resolver(
                DEFAULT_RESOLVER,
                Path::new(DEFAULT_RESOLVER_ARTIFACT),
            ),
            scanner: ToolCommand::scanner(
                DEFAULT_SCANNER,
                Path::new(DEFAULT_ALLOWLIST),
                DEFAULT_PORT,
            ),
            target_buffer: DEFAULT_TARGET_BUFFER,
            deadline: None,
        }
    }
}

impl PipelineOptions {
    pub fn with_url_source(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.url_source = (path.as_os_str() != "-").then_some(path);
        self
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn with_report(mut self, report: OutputTarget, format: ReportFormat) -> Self {
        self.report = report;
        self.report_format = format;
        self
    }

    pub fn with_resolver(mut self, resolver: ToolCommand) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_scanner(mut self, scanner: ToolCommand) -> Self {
        self.scanner = scanner;
        self
    }

    /// Zero is bumped to one; a bounded channel needs room for one value.
    pub fn with_target_buffer(mut self, capacity: usize) -> Self {
        self.target_buffer = capacity.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ToolKind;

    #[test]
    fn test_build_options_default_and_custom() {
        let options = PipelineOptions::default();
        assert_eq!(options.url_source, None);
        assert_eq!(options.output, OutputTarget::Stdout);
        assert_eq!(options.report, OutputTarget::Stderr);
        assert_eq!(options.resolver.program, PathBuf::from("zdns"));
        assert_eq!(options.scanner.kind, ToolKind::Scanner);
        assert_eq!(options.target_buffer, 1024);

        let custom = PipelineOptions::default()
            .with_url_source("urls.txt")
            .with_target_buffer(0)
            .with_deadline(Some(Duration::from_secs(5)));
        assert_eq!(custom.url_source, Some(PathBuf::from("urls.txt")));
        assert_eq!(custom.target_buffer, 1);
        assert_eq!(custom.deadline, Some(Duration::from_secs(5)));

        assert_eq!(PipelineOptions::default().with_url_source("-").url_source, None);
    }

    #[test]
    fn test_output_target_from_str() {
        assert_eq!("-".parse::<OutputTarget>(), Ok(OutputTarget::Stdout));
        assert_eq!(
            "out.csv".parse::<OutputTarget>(),
            Ok(OutputTarget::File(PathBuf::from("out.csv")))
        );
    }

    #[tokio::test]
    async fn test_output_target_create_failure() {
        let target = OutputTarget::File(PathBuf::from("/nonexistent-dir/out.csv"));
        assert!(matches!(
            target.open().await,
            Err(PipelineError::Create { .. })
        ));
    }
}

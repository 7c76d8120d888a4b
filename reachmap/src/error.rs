//! Error types returned at every stage boundary of the pipeline.
//!
//! Each variant names the stage or external tool that failed together with the
//! underlying I/O error, so the caller can print a single diagnostic line and
//! decide whether the failure is fatal to the whole run.
use std::{fmt::Display, io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

use crate::process::ToolKind;

/// The concurrent stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingestion,
    DomainFeed,
    Resolution,
    TargetFeed,
    Scan,
    Report,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingestion => write!(f, "url ingestion"),
            Self::DomainFeed => write!(f, "resolver input feed"),
            Self::Resolution => write!(f, "resolution correlator"),
            Self::TargetFeed => write!(f, "scanner input feed"),
            Self::Scan => write!(f, "scan correlator"),
            Self::Report => write!(f, "metrics report"),
        }
    }
}

/// Fatal conditions raised by the pipeline.
///
/// Malformed input records never surface here; they are skipped and counted
/// by the stage that reads them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unable to open input file {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read url list: {0}")]
    InputRead(#[source] io::Error),

    #[error("unable to create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: ToolKind,
        #[source]
        source: io::Error,
    },

    #[error("{tool} did not expose a piped {stream}")]
    MissingPipe {
        tool: ToolKind,
        stream: &'static str,
    },

    #[error("{tool} exited with {status}")]
    ToolExit { tool: ToolKind, status: ExitStatus },

    #[error("{stage} failed to write: {source}")]
    Output {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("failed to write metrics report: {0}")]
    Report(#[source] io::Error),

    #[error("{0} lost its downstream channel")]
    Disconnected(Stage),

    #[error("pipeline cancelled during {0}")]
    Cancelled(Stage),

    #[error("{stage} task failed: {source}")]
    Join {
        stage: Stage,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl PipelineError {
    pub(crate) fn output(stage: Stage) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Output { stage, source }
    }

    /// `true` when the error is the consequence of cancellation rather than its cause.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

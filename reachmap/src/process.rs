//! # External tools
//!
//! The resolver and the scanner are separate processes talking line-oriented
//! text over their standard streams. This module starts them, exposes their
//! pipes and turns exit statuses into [`PipelineError`]s.
//!
//! It also holds the two feed tasks that write into those processes:
//! [`feed_domains`] (one block, then close) and [`feed_targets`] (live, from a
//! bounded channel, closed when the channel closes).
use std::{
    ffi::OsString,
    fmt::Display,
    net::IpAddr,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::mpsc,
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result, Stage};

/// Which external tool a command drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Resolver,
    Scanner,
}

impl Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolver => write!(f, "resolver"),
            Self::Scanner => write!(f, "scanner"),
        }
    }
}

/// Program and arguments for one external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub kind: ToolKind,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(kind: ToolKind, program: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The default `zdns` invocation; the raw resolver output is also kept in
    /// `artifact`.
    pub fn resolver(program: impl Into<PathBuf>, artifact: &Path) -> Self {
        let mut output_flag = OsString::from("--output-file=");
        output_flag.push(artifact.as_os_str());

        Self::new(ToolKind::Resolver, program)
            .arg("ALOOKUP")
            .arg("-iterative")
            .arg("-cache-size")
            .arg("500000")
            .arg("--std-out-modules=A")
            .arg(output_flag)
    }

    /// The default `zmap` invocation restricted to `allowlist` on `port`.
    pub fn scanner(program: impl Into<PathBuf>, allowlist: &Path, port: u16) -> Self {
        let mut allowlist_flag = OsString::from("--allowlist-file=");
        allowlist_flag.push(allowlist.as_os_str());

        Self::new(ToolKind::Scanner, program)
            .arg(allowlist_flag)
            .arg(format!("--target-port={port}"))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Starts the tool with piped stdin/stdout and inherited stderr.
    ///
    /// The child is killed if the returned handle is dropped before exit.
    pub fn spawn(&self) -> Result<RunningTool> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                tool: self.kind,
                source,
            })?;

        info!(
            action = "spawn",
            component = "process",
            tool = %self.kind,
            program = ?self.program,
            pid = child.id(),
            "Started external tool"
        );

        Ok(RunningTool {
            kind: self.kind,
            child,
        })
    }
}

/// A started external tool.
#[derive(Debug)]
pub struct RunningTool {
    kind: ToolKind,
    child: Child,
}

impl RunningTool {
    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child.stdin.take().ok_or(PipelineError::MissingPipe {
            tool: self.kind,
            stream: "stdin",
        })
    }

    pub fn take_stdout(&mut self) -> Result<BufReader<ChildStdout>> {
        self.child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or(PipelineError::MissingPipe {
                tool: self.kind,
                stream: "stdout",
            })
    }

    /// Waits for exit; any non-zero status is an error.
    ///
    /// On cancellation the child is killed and [`PipelineError::Cancelled`]
    /// is returned for `stage`.
    pub async fn wait(mut self, stage: Stage, cancel: CancellationToken) -> Result<()> {
        let status = tokio::select! {
            status = self.child.wait() => status.map_err(|source| PipelineError::Spawn {
                tool: self.kind,
                source,
            })?,
            _ = cancel.cancelled() => {
                if let Err(e) = self.child.kill().await {
                    warn!(
                        action = "kill",
                        component = "process",
                        tool = %self.kind,
                        error = %e,
                        "Failed to kill external tool"
                    );
                }
                return Err(PipelineError::Cancelled(stage));
            }
        };

        if !status.success() {
            return Err(PipelineError::ToolExit {
                tool: self.kind,
                status,
            });
        }

        info!(
            action = "exit",
            component = "process",
            tool = %self.kind,
            "External tool finished"
        );
        Ok(())
    }
}

/// Writes the whole domain block to the resolver, then closes its input.
pub async fn feed_domains<W>(mut sink: W, block: String, cancel: CancellationToken) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled(Stage::DomainFeed)),
        written = sink.write_all(block.as_bytes()) => {
            written.map_err(PipelineError::output(Stage::DomainFeed))?
        }
    }
    sink.shutdown()
        .await
        .map_err(PipelineError::output(Stage::DomainFeed))?;

    debug!(
        action = "complete",
        component = "domain_feed",
        bytes = block.len(),
        "Resolver input closed"
    );
    Ok(())
}

/// Forwards IPs from `targets` to the scanner, one per line.
///
/// The sink is shut down once every sender is gone; that is the scanner's
/// signal that no more targets are coming. Returns the number of IPs written.
pub async fn feed_targets<W>(
    targets: mpsc::Receiver<IpAddr>,
    mut sink: W,
    cancel: CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut targets = ReceiverStream::new(targets);
    let mut fed = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled(Stage::TargetFeed)),
            next = targets.next() => next,
        };
        let Some(ip) = next else { break };

        sink.write_all(format!("{ip}\n").as_bytes())
            .await
            .map_err(PipelineError::output(Stage::TargetFeed))?;
        fed += 1;
    }

    sink.shutdown()
        .await
        .map_err(PipelineError::output(Stage::TargetFeed))?;

    debug!(
        action = "complete",
        component = "target_feed",
        targets = fed,
        "Scanner input closed"
    );
    Ok(fed)
}

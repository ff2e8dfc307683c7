//! The collector invoker: one external process per work unit, hard timeout,
//! structured result capture.

use std::process::Stdio;
use std::time::{Duration, Instant};

use noticeharvest_shared::{CandidateItem, WorkUnit};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::output::{self, ParsedOutput, SummaryCounters};
use crate::process::{self, GroupChild};

// ---------------------------------------------------------------------------
// Command template
// ---------------------------------------------------------------------------

/// How to launch the external collector for a unit.
#[derive(Debug, Clone)]
pub struct CollectorCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments prepended before the per-unit arguments.
    pub args: Vec<String>,
}

impl CollectorCommand {
    /// Build the concrete command for one work unit.
    ///
    /// The collector contract: `<program> [args..] --source S --site CODE
    /// --date YYYY-MM-DD --out DIR`, exit 0 on success, structured JSON
    /// block or counter lines on stdout.
    pub fn build(&self, unit: &WorkUnit) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--source")
            .arg(unit.source.dir_name())
            .arg("--site")
            .arg(&unit.site_code)
            .arg("--date")
            .arg(unit.date.format("%Y-%m-%d").to_string())
            .arg("--out")
            .arg(&unit.dir);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal status of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeStatus {
    /// Exit code 0.
    Success,
    /// Non-zero exit — an expected failure mode, reported, never thrown.
    Failed { exit_code: i32 },
    /// Timeout fired; the process group was terminated.
    TimedOut,
    /// Unexpected supervision failure (binary missing, wait error).
    Error { message: String },
}

/// Structured result of one invocation.
#[derive(Debug)]
pub struct InvokeOutcome {
    pub status: InvokeStatus,
    /// Items from the structured block (empty on the fallback path).
    pub items: Vec<CandidateItem>,
    /// Summary counters, when either output path produced them.
    pub counters: Option<SummaryCounters>,
    /// True when counters came from the lossy text-pattern fallback.
    pub parsed_via_fallback: bool,
    /// Raw captured stdout.
    pub stdout: String,
    /// Raw captured stderr.
    pub stderr: String,
    /// Wall-clock duration of the invocation.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Supervises one collector invocation with a hard timeout.
#[derive(Debug, Clone)]
pub struct Invoker {
    /// Hard per-unit timeout.
    pub timeout: Duration,
    /// Grace period between group SIGTERM and SIGKILL.
    pub grace: Duration,
}

impl Invoker {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self { timeout, grace }
    }

    /// Run the collector for `unit`. Expected failures (non-zero exit,
    /// timeout) come back inside the outcome; only the outcome's `Error`
    /// status marks an unexpected supervision problem. This function never
    /// returns `Err`.
    pub async fn run(&self, template: &CollectorCommand, unit: &WorkUnit) -> InvokeOutcome {
        let started = Instant::now();
        let mut cmd = template.build(unit);

        debug!(unit = %unit.unit_name(), program = %template.program, "launching collector");

        let mut child = match process::spawn_group(&mut cmd) {
            Ok(child) => child,
            Err(e) => {
                warn!(unit = %unit.unit_name(), error = %e, "collector failed to launch");
                return InvokeOutcome {
                    status: InvokeStatus::Error {
                        message: format!("failed to launch {}: {e}", template.program),
                    },
                    items: Vec::new(),
                    counters: None,
                    parsed_via_fallback: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    elapsed: started.elapsed(),
                };
            }
        };

        // Drain pipes concurrently so a chatty collector cannot deadlock
        // against a full pipe buffer while we wait on it.
        let stdout_task = tokio::spawn(slurp(child.take_stdout()));
        let stderr_task = tokio::spawn(slurp(child.take_stderr()));

        let status = self.wait_with_timeout(&mut child, unit).await;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let elapsed = started.elapsed();

        let (items, counters, parsed_via_fallback) = match &status {
            InvokeStatus::Success => match output::parse_stdout(&stdout) {
                ParsedOutput::Structured(report) => {
                    let counters = SummaryCounters {
                        new_items: report.new,
                        duplicate_items: report.duplicate,
                    };
                    (report.items, Some(counters), false)
                }
                ParsedOutput::Fallback(counters) => {
                    info!(
                        unit = %unit.unit_name(),
                        "no structured block, counters scraped from text output"
                    );
                    (Vec::new(), Some(counters), true)
                }
                ParsedOutput::Nothing => (Vec::new(), None, false),
            },
            _ => (Vec::new(), None, false),
        };

        InvokeOutcome {
            status,
            items,
            counters,
            parsed_via_fallback,
            stdout,
            stderr,
            elapsed,
        }
    }

    /// Wait for exit or timeout; on timeout, terminate the whole group.
    async fn wait_with_timeout(&self, child: &mut GroupChild, unit: &WorkUnit) -> InvokeStatus {
        tokio::select! {
            result = child.wait() => match result {
                Ok(status) if status.success() => InvokeStatus::Success,
                Ok(status) => InvokeStatus::Failed {
                    exit_code: status.code().unwrap_or(-1),
                },
                Err(e) => InvokeStatus::Error {
                    message: format!("wait failed: {e}"),
                },
            },
            _ = tokio::time::sleep(self.timeout) => {
                warn!(
                    unit = %unit.unit_name(),
                    timeout_secs = self.timeout.as_secs(),
                    "collector timed out, terminating process group"
                );
                child.terminate_group(self.grace).await;
                InvokeStatus::TimedOut
            }
        }
    }
}

/// Read a pipe to the end, lossily.
async fn slurp<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

//! External tool invocation.
//!
//! The pipeline treats Terraform and Ansible as opaque commands: run to
//! completion in a given working directory, capture stdout, stderr and exit
//! status, and hand the result back. Failure is data, not an exception: a
//! non-zero exit, a spawn failure, a timeout and a cancellation all come back
//! as a [`ToolInvocationResult`] so the orchestrator decides per operation
//! what is fatal.

mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use process::ProcessRunner;

/// One external command to run.
///
/// The working directory is an explicit absolute path threaded through the
/// invocation; the process-wide current directory is never touched, so
/// concurrent invocations cannot race on it.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Entries layered over the inherited environment. Values may be empty
    /// strings: a missing credential is passed through as such so the tool's
    /// own missing-credential error stays diagnosable.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The process ran to completion (its exit status may still be non-zero).
    Completed,
    /// The process could not be started or waited on.
    SpawnFailed,
    /// The timeout elapsed and the process was killed.
    TimedOut,
    /// Cancellation was requested and the process was killed.
    Cancelled,
}

impl InvocationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationOutcome::Completed => "completed",
            InvocationOutcome::SpawnFailed => "failed to start",
            InvocationOutcome::TimedOut => "timed out",
            InvocationOutcome::Cancelled => "cancelled",
        }
    }
}

/// Captured outcome of one external command.
#[derive(Debug, Clone)]
pub struct ToolInvocationResult {
    pub outcome: InvocationOutcome,
    /// Exit code, or `None` when the process never exited normally.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

impl ToolInvocationResult {
    /// Whether the command ran to completion with exit status zero.
    pub fn succeeded(&self) -> bool {
        self.outcome == InvocationOutcome::Completed && self.exit_code == Some(0)
    }
}

/// Seam between the orchestrator and real subprocess execution. Tests swap
/// in a recording or scripted implementation.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `invocation` to completion, bounded by its timeout and by
    /// `cancel`. Never returns an error: every failure mode is encoded in
    /// the result.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> ToolInvocationResult;
}

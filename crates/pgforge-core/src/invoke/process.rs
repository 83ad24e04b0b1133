//! Subprocess-backed [`ToolRunner`] implementation.

use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{InvocationOutcome, ToolInvocation, ToolInvocationResult, ToolRunner};

/// Runs invocations as real child processes via [`tokio::process`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

/// Drain a pipe to a lossy UTF-8 string. Runs concurrently with the wait so
/// a chatty child cannot deadlock on a full pipe buffer.
async fn drain_pipe<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

fn failure(outcome: InvocationOutcome, stderr: String, duration_ms: i64) -> ToolInvocationResult {
    ToolInvocationResult {
        outcome,
        exit_code: None,
        stdout: String::new(),
        stderr,
        duration_ms,
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> ToolInvocationResult {
        let start = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        // Overlay entries merge into the inherited environment.
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    program = %invocation.program,
                    error = %e,
                    "failed to spawn external tool"
                );
                return failure(
                    InvocationOutcome::SpawnFailed,
                    format!(
                        "failed to spawn {} in {}: {e}",
                        invocation.program,
                        invocation.working_dir.display()
                    ),
                    elapsed_ms(start),
                );
            }
        };

        let stdout_task = tokio::spawn(drain_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(drain_pipe(child.stderr.take()));

        let waited = tokio::select! {
            waited = tokio::time::timeout(invocation.timeout, child.wait()) => Some(waited),
            _ = cancel.cancelled() => None,
        };

        match waited {
            None => {
                debug!(program = %invocation.program, "invocation cancelled, killing child");
                let _ = child.kill().await;
                failure(
                    InvocationOutcome::Cancelled,
                    format!("{} was cancelled", invocation.program),
                    elapsed_ms(start),
                )
            }
            Some(Err(_elapsed)) => {
                warn!(
                    program = %invocation.program,
                    timeout_secs = invocation.timeout.as_secs(),
                    "invocation timed out, killing child"
                );
                let _ = child.kill().await;
                failure(
                    InvocationOutcome::TimedOut,
                    format!(
                        "{} timed out after {}s",
                        invocation.program,
                        invocation.timeout.as_secs()
                    ),
                    elapsed_ms(start),
                )
            }
            Some(Ok(Err(e))) => failure(
                InvocationOutcome::SpawnFailed,
                format!("failed to wait on {}: {e}", invocation.program),
                elapsed_ms(start),
            ),
            Some(Ok(Ok(status))) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                debug!(
                    program = %invocation.program,
                    exit_code = ?status.code(),
                    "invocation completed"
                );
                ToolInvocationResult {
                    outcome: InvocationOutcome::Completed,
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    duration_ms: elapsed_ms(start),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    fn invocation(program: &str, args: &[&str], working_dir: &Path) -> ToolInvocation {
        ToolInvocation {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            working_dir: working_dir.to_path_buf(),
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let result = ProcessRunner
            .run(
                &invocation("echo", &["hello world"], Path::new("/tmp")),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.succeeded());
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn failing_command_reports_status_and_stderr() {
        let result = ProcessRunner
            .run(
                &invocation("sh", &["-c", "echo boom >&2; exit 3"], Path::new("/tmp")),
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.succeeded());
        assert_eq!(result.outcome, InvocationOutcome::Completed);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn nonexistent_program_is_spawn_failure() {
        let result = ProcessRunner
            .run(
                &invocation("pgforge_no_such_binary", &[], Path::new("/tmp")),
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.succeeded());
        assert_eq!(result.outcome, InvocationOutcome::SpawnFailed);
        assert!(result.stderr.contains("pgforge_no_such_binary"));
    }

    #[tokio::test]
    async fn runs_in_the_given_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let result = ProcessRunner
            .run(
                &invocation("pwd", &[], tmp.path()),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.succeeded());
        let reported = Path::new(result.stdout.trim());
        let expected = tmp.path().canonicalize().unwrap();
        assert_eq!(
            reported.canonicalize().unwrap_or_else(|_| reported.to_path_buf()),
            expected
        );
    }

    #[tokio::test]
    async fn env_overlay_reaches_the_child() {
        let mut spec = invocation("sh", &["-c", "printf %s \"$PGFORGE_TEST_CRED\""], Path::new("/tmp"));
        spec.env
            .insert("PGFORGE_TEST_CRED".to_owned(), "sekrit".to_owned());

        let result = ProcessRunner.run(&spec, &CancellationToken::new()).await;
        assert_eq!(result.stdout, "sekrit");
    }

    #[tokio::test]
    async fn empty_overlay_value_is_passed_through_not_omitted() {
        let mut spec = invocation(
            "sh",
            &["-c", "if [ \"${PGFORGE_EMPTY_CRED+set}\" = set ]; then echo present; fi"],
            Path::new("/tmp"),
        );
        spec.env.insert("PGFORGE_EMPTY_CRED".to_owned(), String::new());

        let result = ProcessRunner.run(&spec, &CancellationToken::new()).await;
        assert!(
            result.stdout.contains("present"),
            "empty credential should still be set in the child env"
        );
    }

    #[tokio::test]
    async fn timeout_kills_slow_command() {
        let mut spec = invocation("sleep", &["60"], Path::new("/tmp"));
        spec.timeout = Duration::from_millis(200);

        let result = ProcessRunner.run(&spec, &CancellationToken::new()).await;
        assert_eq!(result.outcome, InvocationOutcome::TimedOut);
        assert!(result.exit_code.is_none());
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_kills_running_command() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = ProcessRunner
            .run(&invocation("sleep", &["60"], Path::new("/tmp")), &cancel)
            .await;

        assert_eq!(result.outcome, InvocationOutcome::Cancelled);
        assert!(result.exit_code.is_none());
        assert!(
            result.duration_ms < 10_000,
            "cancellation should not wait for the sleep, took {}ms",
            result.duration_ms
        );
    }
}

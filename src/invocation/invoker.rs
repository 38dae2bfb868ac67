//! Process execution for resolved commands.
//!
//! Spawns the command with piped stdio, feeds stdin from a separate task,
//! captures stdout/stderr and enforces the effective timeout. A process that
//! outlives its timeout or its request context is killed before returning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::types::{CancelReason, Error, ExecutionFailure, RequestContext, Result};

/// Everything about a run except the argv itself.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Working directory; `None` inherits the hub's current directory.
    pub working_dir: Option<PathBuf>,
    /// Variables set on top of the inherited environment.
    pub env: HashMap<String, String>,
    pub stdin: Bytes,
    /// Zero disables the timeout.
    pub timeout: Duration,
}

/// Captured output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub duration: Duration,
}

enum Waited {
    Finished {
        status: std::io::Result<std::process::ExitStatus>,
        stdout: Result<Bytes>,
        stderr: Result<Bytes>,
    },
    TimedOut,
    Cancelled(CancelReason),
}

/// Runs resolved commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invoker;

impl Invoker {
    pub fn new() -> Self {
        Self
    }

    /// Run `argv` to completion, timeout, or cancellation of `ctx`.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        argv: &[String],
        options: InvokeOptions,
    ) -> Result<InvocationResult> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::configuration("command is empty"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&options.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = options
            .working_dir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| ExecutionFailure::Spawn {
            program: program.clone(),
            source,
        })?;
        tracing::debug!(program = %program, pid = ?child.id(), "process started");

        spawn_stdin_writer(child.stdin.take(), options.stdin);
        let mut stdout_task = spawn_reader(child.stdout.take());
        let mut stderr_task = spawn_reader(child.stderr.take());

        // The deadline covers draining the pipes as well: a background process
        // that inherited stdout or stderr keeps them open after the child exits.
        let waited = {
            let completion = async {
                let status = child.wait().await;
                let stdout = collect(&mut stdout_task).await;
                let stderr = collect(&mut stderr_task).await;
                Waited::Finished {
                    status,
                    stdout,
                    stderr,
                }
            };
            tokio::select! {
                finished = completion => finished,
                _ = expiry(options.timeout) => Waited::TimedOut,
                reason = ctx.done() => Waited::Cancelled(reason),
            }
        };

        let (status, stdout, stderr) = match waited {
            Waited::Finished {
                status,
                stdout,
                stderr,
            } => (status.map_err(ExecutionFailure::Io)?, stdout?, stderr?),
            Waited::TimedOut => {
                let elapsed = terminate(&mut child, program, start).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionFailure::TimedOut {
                    timeout: options.timeout,
                    elapsed,
                }
                .into());
            }
            Waited::Cancelled(reason) => {
                let elapsed = terminate(&mut child, program, start).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionFailure::Cancelled { reason, elapsed }.into());
            }
        };
        let duration = start.elapsed();

        if !status.success() {
            return Err(ExecutionFailure::Exit {
                status: status.to_string(),
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                elapsed: duration,
            }
            .into());
        }

        tracing::debug!(program = %program, ?duration, bytes = stdout.len(), "process finished");
        Ok(InvocationResult {
            stdout,
            stderr,
            duration,
        })
    }
}

/// Kill the child and wait for it to exit. Returns time since `start`.
///
/// A child that already exited is left alone; only its pipes are still open.
async fn terminate(child: &mut Child, program: &str, start: Instant) -> Duration {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!(program = %program, %status, "process exited, output still open");
        return start.elapsed();
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(program = %program, error = %e, "failed to kill process");
    }
    let elapsed = start.elapsed();
    tracing::debug!(program = %program, ?elapsed, "process killed");
    elapsed
}

async fn expiry(timeout: Duration) {
    if timeout.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(timeout).await;
    }
}

fn spawn_stdin_writer(stdin: Option<ChildStdin>, payload: Bytes) {
    let Some(mut stdin) = stdin else {
        return;
    };
    tokio::spawn(async move {
        if !payload.is_empty() {
            if let Err(e) = stdin.write_all(&payload).await {
                // A process that never reads stdin closes the pipe early.
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    tracing::debug!(error = %e, "failed to write process stdin");
                }
            }
        }
        drop(stdin);
    });
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(task: &mut JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Bytes> {
    let buf = task
        .await
        .map_err(|e| Error::internal(format!("output reader failed: {}", e)))?
        .map_err(ExecutionFailure::Io)?;
    Ok(Bytes::from(buf))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn run(items: &[&str], options: InvokeOptions) -> Result<InvocationResult> {
        Invoker::new()
            .run(&RequestContext::new(), &argv(items), options)
            .await
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let result = run(&["echo", "Hello World"], InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.stdout.as_ref(), b"Hello World\n");
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let options = InvokeOptions {
            stdin: Bytes::from_static(b"this is a test line\nanother line\ntest again"),
            ..Default::default()
        };
        let result = run(&["/bin/sh", "-c", "cat | grep test"], options)
            .await
            .unwrap();
        let output = String::from_utf8_lossy(&result.stdout);
        assert!(output.contains("this is a test line"));
        assert!(output.contains("test again"));
        assert!(!output.contains("another line"));
    }

    #[tokio::test]
    async fn test_environment_applied_over_inherited() {
        let options = InvokeOptions {
            env: HashMap::from([("MY_VAR".to_string(), "custom_value".to_string())]),
            ..Default::default()
        };
        // PATH is inherited, so `echo` still resolves via the shell.
        let result = run(&["/bin/sh", "-c", "echo $MY_VAR"], options).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "custom_value");
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let options = InvokeOptions {
            working_dir: Some(canonical.clone()),
            ..Default::default()
        };
        let result = run(&["pwd"], options).await.unwrap();
        let output = String::from_utf8_lossy(&result.stdout);
        assert_eq!(output.trim(), canonical.to_string_lossy());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let options = InvokeOptions {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let start = std::time::Instant::now();
        let err = run(&["sleep", "5"], options).await.unwrap_err();
        let wall = start.elapsed();

        match err {
            Error::Execution(ExecutionFailure::TimedOut { timeout, elapsed }) => {
                assert_eq!(timeout, Duration::from_millis(100));
                assert!(elapsed > Duration::from_millis(100));
                assert!(elapsed < Duration::from_secs(1), "elapsed {:?}", elapsed);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(wall < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_timeout_covers_inherited_output() {
        for script in ["sleep 3 & echo hi", "sleep 3 & exit 0"] {
            let options = InvokeOptions {
                timeout: Duration::from_millis(100),
                ..Default::default()
            };
            let start = std::time::Instant::now();
            let err = run(&["/bin/sh", "-c", script], options).await.unwrap_err();

            assert!(
                matches!(err, Error::Execution(ExecutionFailure::TimedOut { .. })),
                "{script}: {err:?}"
            );
            assert!(start.elapsed() < Duration::from_secs(2), "{script}");
        }
    }

    #[tokio::test]
    async fn test_cancellation_while_output_held_open() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let err = Invoker::new()
            .run(
                &ctx,
                &argv(&["/bin/sh", "-c", "sleep 3 & echo hi"]),
                InvokeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(ExecutionFailure::Cancelled { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = Invoker::new()
            .run(&ctx, &argv(&["sleep", "5"]), InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(ExecutionFailure::Cancelled {
                reason: CancelReason::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_failure() {
        let err = run(&["/bin/sh", "-c", "echo oops >&2; exit 3"], InvokeOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Execution(ExecutionFailure::Exit { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected exit failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let err = run(&["nonexistent_command_12345"], InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(ExecutionFailure::Spawn { .. })
        ));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_empty_argv_is_configuration_failure() {
        let err = run(&[], InvokeOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

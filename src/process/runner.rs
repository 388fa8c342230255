//! Process runner — spawns and supervises one external command.
//!
//! The command runs through the platform shell under a process group, so a
//! kill reaches launcher children (`npx` spawning node, shells spawning the
//! assistant) and never leaves orphans. Output is streamed line-by-line to a
//! caller-supplied sink; a hard timeout and a cooperative cancellation
//! channel both terminate the whole group.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use command_group::AsyncCommandGroup;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::ProcessError;
use crate::shell::get_shell_command;

/// Everything needed to run one supervised command.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Full shell command string (may be a multi-line generated script).
    pub command: String,
    /// Working directory, normally the attempt's worktree.
    pub cwd: PathBuf,
    /// Extra environment entries on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Payload written to stdin and closed, when the assistant reads its
    /// prompt from stdin.
    pub stdin: Option<String>,
    /// Hard timeout after which the group is force-killed.
    pub timeout: Duration,
}

/// Result of a supervised run.
#[derive(Debug, Clone, Copy)]
pub struct ProcessResult {
    /// Exit code; `None` when the process died from a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// The hard timeout fired and the group was killed.
    pub timed_out: bool,
    /// Cancellation was requested and the group was killed.
    pub cancelled: bool,
}

impl ProcessResult {
    /// Launcher-level failure: the command itself could not run, as opposed
    /// to the assistant failing at its task. Shell convention: 127 = command
    /// not found, 126 = found but not executable.
    pub fn is_launcher_failure(&self) -> bool {
        matches!(self.exit_code, Some(126) | Some(127))
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Spawns and supervises external commands.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a command to completion, streaming each output line (stdout and
    /// stderr interleaved) into `on_line`.
    ///
    /// Cancellation is signalled by sending `true` on the watch channel; the
    /// call returns only once the process group has been confirmed dead, so
    /// the caller can safely release resources afterwards.
    pub async fn run(
        &self,
        spec: ProcessSpec,
        mut cancel: watch::Receiver<bool>,
        mut on_line: impl FnMut(&str) + Send,
    ) -> Result<ProcessResult, ProcessError> {
        let (shell_cmd, shell_arg) = get_shell_command();
        let start = std::time::Instant::now();

        let mut command = Command::new(shell_cmd);
        command
            .kill_on_drop(true)
            .arg(shell_arg)
            .arg(&spec.command)
            .current_dir(&spec.cwd)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.group_spawn().map_err(|e| ProcessError::SpawnFailed {
            command: spec.command.clone(),
            source: e,
        })?;

        if let Some(payload) = &spec.stdin
            && let Some(mut stdin) = child.inner().stdin.take()
        {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(ProcessError::StdinFailed)?;
            stdin.shutdown().await.map_err(ProcessError::StdinFailed)?;
        }

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.inner().stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.inner().stderr.take() {
            spawn_line_reader(stderr, line_tx.clone());
        }
        drop(line_tx);

        let deadline = Instant::now() + spec.timeout;
        let mut readers_done = false;
        let mut cancel_closed = false;

        let outcome = loop {
            tokio::select! {
                maybe_line = line_rx.recv(), if !readers_done => {
                    match maybe_line {
                        Some(line) => on_line(&line),
                        None => readers_done = true,
                    }
                }
                status = child.wait() => break WaitOutcome::Exited(status?),
                _ = tokio::time::sleep_until(deadline) => break WaitOutcome::TimedOut,
                changed = cancel.changed(), if !cancel_closed => {
                    match changed {
                        Ok(()) if *cancel.borrow() => break WaitOutcome::Cancelled,
                        Ok(()) => {}
                        Err(_) => cancel_closed = true,
                    }
                }
            }
        };

        let (status, timed_out, cancelled) = match outcome {
            WaitOutcome::Exited(status) => (Some(status), false, false),
            WaitOutcome::TimedOut => {
                tracing::warn!(command = %spec.command, after = ?spec.timeout, "process timed out, killing group");
                (kill_and_reap(&mut child).await, true, false)
            }
            WaitOutcome::Cancelled => {
                tracing::info!(command = %spec.command, "cancellation requested, killing group");
                (kill_and_reap(&mut child).await, false, true)
            }
        };

        // Drain output the readers buffered before the pipes closed.
        while let Some(line) = line_rx.recv().await {
            on_line(&line);
        }

        Ok(ProcessResult {
            exit_code: status.and_then(|s| s.code()),
            duration: start.elapsed(),
            timed_out,
            cancelled,
        })
    }
}

/// Kill the whole process group and reap the child.
async fn kill_and_reap(child: &mut command_group::AsyncGroupChild) -> Option<ExitStatus> {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill process group");
    }
    child.wait().await.ok()
}

/// Forward lines from a pipe into the shared channel until EOF.
fn spawn_line_reader(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    tx: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str) -> ProcessSpec {
        ProcessSpec {
            command: command.to_string(),
            cwd: std::env::temp_dir(),
            env: Vec::new(),
            stdin: None,
            timeout: Duration::from_secs(10),
        }
    }

    fn no_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let runner = ProcessRunner::new();
        let mut lines = Vec::new();

        let (_cancel, cancel_rx) = no_cancel();
        let result = runner
            .run(spec("echo one; echo two"), cancel_rx, |l| {
                lines.push(l.to_string())
            })
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
        assert!(!result.cancelled);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let runner = ProcessRunner::new();
        let (_cancel, cancel_rx) = no_cancel();
        let result = runner
            .run(spec("exit 3"), cancel_rx, |_| {})
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn stderr_is_streamed_too() {
        let runner = ProcessRunner::new();
        let mut lines = Vec::new();
        let (_cancel, cancel_rx) = no_cancel();
        runner
            .run(spec("echo oops >&2"), cancel_rx, |l| {
                lines.push(l.to_string())
            })
            .await
            .unwrap();
        assert_eq!(lines, vec!["oops"]);
    }

    #[tokio::test]
    async fn stdin_payload_is_delivered() {
        let runner = ProcessRunner::new();
        let mut payload_spec = spec("cat");
        payload_spec.stdin = Some("hello from stdin".to_string());

        let mut lines = Vec::new();
        let (_cancel, cancel_rx) = no_cancel();
        let result = runner
            .run(payload_spec, cancel_rx, |l| lines.push(l.to_string()))
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(lines, vec!["hello from stdin"]);
    }

    #[tokio::test]
    async fn hard_timeout_kills_the_group() {
        let runner = ProcessRunner::new();
        let mut timeout_spec = spec("sleep 30");
        timeout_spec.timeout = Duration::from_millis(200);

        let (_cancel, cancel_rx) = no_cancel();
        let result = runner.run(timeout_spec, cancel_rx, |_| {}).await.unwrap();
        assert!(result.timed_out);
        assert!(result.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_kills_and_confirms_exit() {
        let runner = ProcessRunner::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = cancel_tx.send(true);
        });

        let result = runner
            .run(spec("sleep 30"), cancel_rx, |_| {})
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(!result.timed_out);
        assert!(result.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launcher_failure() {
        let runner = ProcessRunner::new();
        let (_cancel, cancel_rx) = no_cancel();
        let result = runner
            .run(spec("definitely-not-a-real-binary-xyz"), cancel_rx, |_| {})
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(127));
        assert!(result.is_launcher_failure());
    }

    #[tokio::test]
    async fn env_entries_reach_the_child() {
        let runner = ProcessRunner::new();
        let mut env_spec = spec("printf '%s\\n' \"$TASKFORGE_TEST_MARKER\"");
        env_spec.env = vec![("TASKFORGE_TEST_MARKER".to_string(), "present".to_string())];

        let mut lines = Vec::new();
        let (_cancel, cancel_rx) = no_cancel();
        runner
            .run(env_spec, cancel_rx, |l| lines.push(l.to_string()))
            .await
            .unwrap();
        assert_eq!(lines, vec!["present"]);
    }
}

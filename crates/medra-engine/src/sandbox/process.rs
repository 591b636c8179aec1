//! Bounded external process execution.
//!
//! Every analyzer and tool invocation runs through here: hard wall-clock
//! budget, capped captured output, cancellation wired into the wait.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use medra_core::{CancelToken, MedraError, Result};

/// Captured output of a bounded child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stdout and stderr concatenated, for parsers that accept either.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Run `program` with `args` in `cwd`, killing it at `timeout` and capping
/// each captured stream at `output_cap` bytes.
///
/// A missing binary surfaces as `Environmental` so the caller can skip the
/// analyzer rather than fail the run.
pub async fn run_bounded(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
    output_cap: usize,
    cancel: &CancelToken,
) -> Result<ProcessOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MedraError::environmental(program, "not installed")
        } else {
            MedraError::Io(e)
        }
    })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    // Keep draining past the cap so a chatty child never blocks on a full
    // pipe; bytes beyond the cap are discarded.
    async fn drain_capped<R: tokio::io::AsyncRead + Unpin>(
        mut pipe: Option<R>,
        cap: usize,
    ) -> Vec<u8> {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 8192];
        if let Some(p) = pipe.as_mut() {
            loop {
                match p.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if kept.len() < cap {
                            let take = n.min(cap - kept.len());
                            kept.extend_from_slice(&chunk[..take]);
                        }
                    }
                }
            }
        }
        kept
    }

    let stdout_task = tokio::spawn(drain_capped(stdout_pipe.take(), output_cap));
    let stderr_task = tokio::spawn(drain_capped(stderr_pipe.take(), output_cap));

    enum WaitOutcome {
        Exited(std::process::ExitStatus),
        TimedOut,
        Cancelled,
    }

    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status?),
        _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
    };

    let mut timed_out = false;
    let status = match outcome {
        WaitOutcome::Exited(status) => Some(status),
        WaitOutcome::TimedOut => {
            debug!("{program} exceeded {timeout:?}, killing");
            timed_out = true;
            let _ = child.kill().await;
            None
        }
        WaitOutcome::Cancelled => {
            let _ = child.kill().await;
            return Err(MedraError::Cancelled);
        }
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    let exit_code = match status {
        Some(s) => s.code().unwrap_or(-1),
        None => -1,
    };

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code,
        timed_out,
    })
}

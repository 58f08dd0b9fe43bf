//! Action execution
//!
//! Runs one remediation action through a `CommandRunner`, bounded by a
//! timeout, retried on failure and abortable through the shutdown signal.

use super::types::{Action, ActionResult};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Maximum output kept per action
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// External command failure with whatever output was captured
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub message: String,
    pub output: String,
}

impl RunFailure {
    pub fn new(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: output.into(),
        }
    }
}

/// Executes an external program and returns its combined output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, RunFailure>;
}

/// Runs commands as child processes; the child is killed if the call is
/// dropped, which is how both timeouts and cancellation stop it.
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, RunFailure> {
        debug!("Executing: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunFailure::new(format!("Failed to spawn {}: {}", program, e), ""))?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out = Vec::new();
        let mut err = Vec::new();

        // Pipes are drained into buffers owned here, so a timeout keeps
        // whatever the child printed before it was cut off.
        let waited = tokio::time::timeout(timeout, async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                drain(stdout.as_mut(), &mut out),
                drain(stderr.as_mut(), &mut err),
            );
            status
        })
        .await;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(RunFailure::new(
                    format!("Failed to wait for {}: {}", program, e),
                    combine(&out, &err),
                ))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out {}: {}", program, e);
                }
                return Err(RunFailure::new(
                    format!("Timed out after {}s", timeout.as_secs_f64()),
                    combine(&out, &err),
                ));
            }
        };

        let combined = combine(&out, &err);
        if status.success() {
            Ok(combined)
        } else {
            Err(RunFailure::new(format!("Command failed: {}", status), combined))
        }
    }
}

/// Read a pipe to EOF. Bytes past the output cap are read and dropped so
/// the child never blocks on a full pipe.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<&mut R>, buf: &mut Vec<u8>) {
    let Some(pipe) = pipe else {
        return;
    };

    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = (MAX_OUTPUT_BYTES + 1).saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Pipe read failed: {}", e);
                break;
            }
        }
    }
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(stderr));
    truncate(combined)
}

fn truncate(mut output: String) -> String {
    if output.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str("\n[truncated]");
    }
    output
}

pub struct ActionExecutor {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
    default_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ActionExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, default_timeout: Duration) -> Self {
        Self {
            runner,
            dry_run: false,
            default_timeout,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn execute(&self, action: &Action, shutdown: &ShutdownSignal) -> ActionResult {
        let clock = Instant::now();
        let result = ActionResult::new(action, Utc::now());

        if self.dry_run {
            info!("[DRY RUN] {}", action.kind);
            return result
                .succeeded(format!("[DRY RUN] Would execute: {}", action.kind))
                .finish(0, clock.elapsed());
        }

        let (program, args) = action.kind.invocation();
        let timeout = action.timeout.unwrap_or(self.default_timeout);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => None,
                outcome = self.runner.run(&program, &args, timeout) => Some(outcome),
            };

            let failure = match outcome {
                None => {
                    warn!("Action '{}' cancelled", action.kind);
                    return result.cancelled().finish(attempts, clock.elapsed());
                }
                Some(Ok(output)) => {
                    info!("Action '{}' succeeded (attempt {})", action.kind, attempts);
                    return result.succeeded(output).finish(attempts, clock.elapsed());
                }
                Some(Err(failure)) => failure,
            };

            if attempts > self.max_retries {
                error!(
                    "Action '{}' failed after {} attempt(s): {}",
                    action.kind, attempts, failure.message
                );
                return result
                    .failed(failure.message, failure.output)
                    .finish(attempts, clock.elapsed());
            }

            warn!(
                "Action '{}' failed (attempt {}): {}; retrying in {}s",
                action.kind,
                attempts,
                failure.message,
                self.retry_delay.as_secs()
            );

            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    return result.cancelled().finish(attempts, clock.elapsed());
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

//! Command execution boundary
//!
//! [`CommandRunner`] is the single seam between the extraction pipeline and
//! the operating system. [`ShellRunner`] is the production implementation:
//! it launches `<shell> -c <command>`, captures stdout and stderr separately,
//! enforces the deadline and always reaps the child, including when it has
//! to be killed.

use crate::error::CommandError;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one command run: trimmed stdout or a classified failure
pub type CommandResult = std::result::Result<String, CommandError>;

/// Runs one command under one shell with a deadline
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` through `shell -c`.
    ///
    /// A zero `timeout` means no deadline beyond the runner's own
    /// cancellation.
    async fn run(&self, shell: &str, command: &str, timeout: Duration) -> CommandResult;
}

/// Production runner spawning real child processes
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    cancellation_token: CancellationToken,
}

enum Finished {
    Completed((std::io::Result<ExitStatus>, String, String)),
    TimedOut,
    Cancelled,
}

impl ShellRunner {
    /// Runner that is never cancelled from outside
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner whose in-flight commands are killed when `token` is cancelled
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation_token: token,
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, shell: &str, command: &str, timeout: Duration) -> CommandResult {
        let mut child = Command::new(shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::execution(format!("failed to spawn {}: {}", shell, e), ""))?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());
        let readers = [stdout_reader.abort_handle(), stderr_reader.abort_handle()];

        let deadline = async {
            if timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(timeout).await
            }
        };

        // A background grandchild can hold the pipes open after the shell
        // exits, so draining the output has to finish inside the deadline too.
        let completion = async {
            let status = child.wait().await;
            let stdout = collect_output(stdout_reader).await;
            let stderr = collect_output(stderr_reader).await;
            (status, stdout, stderr)
        };

        let finished = tokio::select! {
            done = completion => Finished::Completed(done),
            _ = deadline => Finished::TimedOut,
            _ = self.cancellation_token.cancelled() => Finished::Cancelled,
        };

        let (status, stdout, stderr) = match finished {
            Finished::Completed(done) => done,
            Finished::TimedOut => {
                debug!("Command '{}' timed out after {:?}", command, timeout);
                abandon(&mut child, command, readers).await;
                return Err(CommandError::Timeout { timeout });
            }
            Finished::Cancelled => {
                debug!("Command '{}' cancelled", command);
                abandon(&mut child, command, readers).await;
                return Err(CommandError::Cancelled);
            }
        };

        match status {
            Ok(status) if status.success() => Ok(stdout.trim().to_string()),
            Ok(status) => Err(CommandError::execution(status.to_string(), stderr.trim())),
            Err(e) => Err(CommandError::execution(
                format!("failed to wait for command: {}", e),
                stderr.trim(),
            )),
        }
    }
}

/// Kill and reap a child that overran, dropping whatever it printed
async fn abandon(child: &mut Child, command: &str, readers: [AbortHandle; 2]) {
    // the shell may already be reaped while its output is still held open
    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            // kill() also waits, so the child never lingers as a zombie
            if let Err(e) = child.kill().await {
                warn!("Failed to kill command '{}': {}", command, e);
            }
        }
    }
    for reader in readers {
        reader.abort();
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!("Failed to read command output: {}", e);
            }
        }
        buf
    })
}

async fn collect_output(reader: JoinHandle<Vec<u8>>) -> String {
    match reader.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("Output reader task failed: {}", e);
            String::new()
        }
    }
}

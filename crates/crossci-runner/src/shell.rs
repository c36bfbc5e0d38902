//! Shell-based step execution on the host.

use crate::runner::{
    OutputLine, OutputStream, RunnerConfig, StepContext, StepResult, StepRunner, shell_argv,
    wait_with_limit,
};
use async_trait::async_trait;
use crossci_core::{Error, Result};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Shell runner for executing commands on the host.
pub struct ShellRunner {
    config: RunnerConfig,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ShellRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    async fn execute_command(
        &self,
        command: &str,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = std::time::Instant::now();
        let argv = shell_argv(&ctx.step.shell, command);
        let cwd = ctx.working_dir(&ctx.workspace);

        info!(
            step = %ctx.step.display_name(),
            shell = %ctx.step.shell,
            cwd = %cwd.display(),
            "Executing shell command"
        );

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&cwd)
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", argv[0], e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".to_string()))?;

        let mut streams = [
            stream_lines(stdout, OutputStream::Stdout, output_tx.clone()),
            stream_lines(stderr, OutputStream::Stderr, output_tx),
        ];

        let limit = ctx.timeout.or(self.config.timeout_seconds.map(Duration::from_secs));
        let mut cancel = ctx.cancel.clone();
        let outcome = {
            // The step is done once its output is, and background processes
            // can keep the pipes open after the shell exits.
            let finished = async {
                let status = child.wait().await;
                for handle in streams.iter_mut() {
                    let _ = handle.await;
                }
                status
            };
            tokio::select! {
                status = wait_with_limit(finished, limit) => {
                    status.map_or(Outcome::TimedOut, Outcome::Exited)
                }
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        let status = match outcome {
            Outcome::Exited(status) => status,
            Outcome::Cancelled => {
                abort(&mut child, &streams).await;
                info!(step = %ctx.step.display_name(), "Step cancelled, process killed");
                return Err(Error::RunCancelled {
                    reason: "cancellation requested".to_string(),
                });
            }
            Outcome::TimedOut => {
                abort(&mut child, &streams).await;
                let seconds = limit.map_or(0, |l| l.as_secs());
                warn!(seconds, "Command timed out, process killed");
                return Err(Error::StepTimeout { seconds });
            }
        };

        let status =
            status.map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Command completed");

        Ok(StepResult::from_exit_code(exit_code, duration_ms))
    }
}

async fn abort(child: &mut Child, streams: &[JoinHandle<()>; 2]) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill step process");
    }
    // Grandchildren may still hold the pipes open.
    for handle in streams {
        handle.abort();
    }
}

fn stream_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_num = 0u32;

        while let Ok(Some(line)) = lines.next_line().await {
            line_num += 1;
            if tx
                .send(OutputLine::new(stream, line, line_num))
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let command = ctx
            .step
            .run
            .as_ref()
            .ok_or_else(|| Error::Internal("No command to run".to_string()))?;

        if ctx.cancel.is_cancelled() {
            return Err(Error::RunCancelled {
                reason: "cancelled before start".to_string(),
            });
        }

        self.execute_command(command, ctx, output_tx).await
    }

    fn name(&self) -> &'static str {
        "shell"
    }
}

//! Core runner trait and types.

use crate::cancel::CancelSignal;
use async_trait::async_trait;
use crossci_core::Result;
use crossci_core::workflow::StepDefinition;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl OutputLine {
    pub fn new(stream: OutputStream, content: String, line_number: u32) -> Self {
        Self {
            stream,
            content,
            line_number,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn from_exit_code(exit_code: i32, duration_ms: u64) -> Self {
        Self {
            exit_code,
            success: exit_code == 0,
            duration_ms,
        }
    }
}

/// Context for step execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub workspace: PathBuf,
    /// Fully merged environment for the step.
    pub env: HashMap<String, String>,
    pub step: StepDefinition,
    /// Image to run the step in; `None` runs on the host.
    pub container_image: Option<String>,
    /// Extra bind mounts, `host:container[:ro]`.
    pub volumes: Vec<String>,
    pub timeout: Option<Duration>,
    pub cancel: CancelSignal,
}

impl StepContext {
    /// Working directory for the step relative to `root`.
    pub fn working_dir(&self, root: &std::path::Path) -> PathBuf {
        match &self.step.working_directory {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }
}

/// Trait for step execution.
///
/// Implementations stream output to `output_tx`, honour `ctx.timeout` by
/// returning `Error::StepTimeout`, and abort with `Error::RunCancelled`
/// once `ctx.cancel` fires. A non-zero exit code is not an error.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Configuration for step execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound for any single step.
    pub timeout_seconds: Option<u64>,
    /// Force host execution even for jobs that name a container.
    pub host_only: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: Some(3600), // 1 hour default
            host_only: false,
        }
    }
}

/// Await `fut`, giving up after `limit`. `None` means the limit was hit.
pub(crate) async fn wait_with_limit<F: std::future::Future>(
    fut: F,
    limit: Option<Duration>,
) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Build the argv for running `command` with the given shell.
pub fn shell_argv(shell: &str, command: &str) -> Vec<String> {
    let mut argv: Vec<String> = match shell {
        "bash" => ["bash", "--noprofile", "--norc", "-eo", "pipefail", "-c"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        "sh" => vec!["sh".to_string(), "-e".to_string(), "-c".to_string()],
        other => vec![other.to_string(), "-c".to_string()],
    };
    argv.push(command.to_string());
    argv
}

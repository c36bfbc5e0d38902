//! Container-based step execution using Docker.

use crate::runner::{
    OutputLine, OutputStream, RunnerConfig, StepContext, StepResult, StepRunner, shell_argv,
    wait_with_limit,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use crossci_core::{Error, Result};
use futures::StreamExt;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Mount point of the job workspace inside every step container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Container runner for executing commands in Docker containers.
pub struct ContainerRunner {
    docker: Docker,
    config: RunnerConfig,
}

enum Outcome {
    Exited(Result<i64>),
    TimedOut,
    Cancelled,
}

impl ContainerRunner {
    /// Create a new container runner.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        Ok(Self { docker, config })
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker, config: RunnerConfig) -> Self {
        Self { docker, config }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            update.map_err(|e| Error::Container(format!("Failed to pull {}: {}", image, e)))?;
        }
        Ok(())
    }

    async fn execute_in_container(
        &self,
        image: &str,
        command: &str,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = std::time::Instant::now();
        let container_name = format!("crossci-{}", uuid::Uuid::new_v4());

        self.ensure_image(image).await?;

        info!(
            image = %image,
            container = %container_name,
            step = %ctx.step.display_name(),
            "Starting container execution"
        );

        let container_config = Config {
            image: Some(image.to_string()),
            cmd: Some(shell_argv(&ctx.step.shell, command)),
            env: Some(container_env(ctx)),
            working_dir: Some(
                ctx.working_dir(Path::new(CONTAINER_WORKSPACE))
                    .display()
                    .to_string(),
            ),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(binds(ctx)),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        self.docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove(&container_name).await;
            return Err(Error::Container(format!("Failed to start container: {}", e)));
        }

        let limit = ctx
            .timeout
            .or(self.config.timeout_seconds.map(Duration::from_secs));
        let mut cancel = ctx.cancel.clone();
        let outcome = tokio::select! {
            result = wait_with_limit(self.follow(&container_name, output_tx), limit) => {
                result.map_or(Outcome::TimedOut, Outcome::Exited)
            }
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        // Force removal also kills a container that is still running.
        self.remove(&container_name).await;

        let exit_code = match outcome {
            Outcome::Exited(code) => code? as i32,
            Outcome::Cancelled => {
                info!(container = %container_name, "Container step cancelled");
                return Err(Error::RunCancelled {
                    reason: "cancellation requested".to_string(),
                });
            }
            Outcome::TimedOut => {
                let seconds = limit.map_or(0, |l| l.as_secs());
                warn!(container = %container_name, seconds, "Container execution timed out");
                return Err(Error::StepTimeout { seconds });
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            container = %container_name,
            exit_code,
            duration_ms,
            "Container execution completed"
        );

        Ok(StepResult::from_exit_code(exit_code, duration_ms))
    }

    /// Stream logs until the container stops, then return its exit code.
    async fn follow(&self, container_name: &str, output_tx: mpsc::Sender<OutputLine>) -> Result<i64> {
        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(container_name, Some(log_options));
        let mut stdout_line_num = 0u32;
        let mut stderr_line_num = 0u32;

        while let Some(log_result) = log_stream.next().await {
            let (stream, message, counter) = match log_result {
                Ok(LogOutput::StdOut { message }) => {
                    (OutputStream::Stdout, message, &mut stdout_line_num)
                }
                Ok(LogOutput::StdErr { message }) => {
                    (OutputStream::Stderr, message, &mut stderr_line_num)
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Error reading container logs");
                    break;
                }
            };

            *counter += 1;
            let content = String::from_utf8_lossy(&message).trim_end().to_string();
            if output_tx
                .send(OutputLine::new(stream, content, *counter))
                .await
                .is_err()
            {
                break;
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        match self
            .docker
            .wait_container(container_name, Some(wait_options))
            .next()
            .await
        {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::Container(format!("Container wait failed: {}", e))),
            None => Err(Error::Container(
                "Container wait returned no result".to_string(),
            )),
        }
    }

    async fn remove(&self, container_name: &str) {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        if let Err(e) = self
            .docker
            .remove_container(container_name, Some(remove_options))
            .await
        {
            warn!(container = %container_name, error = %e, "Failed to remove container");
        }
    }
}

/// Step environment with the workspace path rewritten for the container.
fn container_env(ctx: &StepContext) -> Vec<String> {
    let mut env: Vec<String> = ctx
        .env
        .iter()
        .filter(|(k, _)| k.as_str() != "GITHUB_WORKSPACE")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.push(format!("GITHUB_WORKSPACE={}", CONTAINER_WORKSPACE));
    env.sort();
    env
}

fn binds(ctx: &StepContext) -> Vec<String> {
    let mut binds = vec![format!(
        "{}:{}",
        ctx.workspace.display(),
        CONTAINER_WORKSPACE
    )];
    binds.extend(ctx.volumes.iter().cloned());
    binds
}

#[async_trait]
impl StepRunner for ContainerRunner {
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

        let image = ctx
            .container_image
            .as_deref()
            .ok_or_else(|| Error::Container("No container image for step".to_string()))?;

        if ctx.cancel.is_cancelled() {
            return Err(Error::RunCancelled {
                reason: "cancelled before start".to_string(),
            });
        }

        self.execute_in_container(image, command, ctx, output_tx)
            .await
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crossci_core::workflow::StepDefinition;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn ctx() -> StepContext {
        let mut env = HashMap::new();
        env.insert("MESON_CI_JOBNAME".to_string(), "linux-armhf".to_string());
        env.insert("GITHUB_WORKSPACE".to_string(), "/home/ci/src".to_string());
        StepContext {
            workspace: PathBuf::from("/home/ci/src"),
            env,
            step: StepDefinition::shell_command("./run_tests.py"),
            container_image: Some("mesonbuild/eoan:latest".to_string()),
            volumes: vec!["/ci:/ci:ro".to_string()],
            timeout: None,
            cancel: CancelSignal::never(),
        }
    }

    #[test]
    fn test_container_env_rewrites_workspace() {
        assert_eq!(
            container_env(&ctx()),
            vec![
                "GITHUB_WORKSPACE=/workspace".to_string(),
                "MESON_CI_JOBNAME=linux-armhf".to_string(),
            ]
        );
    }

    #[test]
    fn test_binds_include_workspace_and_volumes() {
        assert_eq!(
            binds(&ctx()),
            vec!["/home/ci/src:/workspace".to_string(), "/ci:/ci:ro".to_string()]
        );
    }
}

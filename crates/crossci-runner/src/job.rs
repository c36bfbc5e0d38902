//! Job execution: runs a job's steps in order and reports the outcome.

use crate::cancel::CancelSignal;
use crate::container::ContainerRunner;
use crate::runner::{OutputLine, RunnerConfig, StepContext, StepRunner};
use crate::shell::ShellRunner;
use chrono::Utc;
use crossci_core::event::{Event, EventKind};
use crossci_core::ids::RunId;
use crossci_core::interpolation::InterpolationContext;
use crossci_core::run::{JobReport, RunStatus, StepReport, StepStatus};
use crossci_core::workflow::{ContainerSpec, JobDefinition, StepDefinition, WorkflowDefinition};
use crossci_core::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Everything needed to execute one job of a triggered run.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub run_id: RunId,
    pub workflow: String,
    pub job_id: String,
    pub job: JobDefinition,
    pub event: EventKind,
    pub git_ref: String,
    pub workspace: PathBuf,
    /// Job environment after interpolation, including the `CI` variables.
    pub env: HashMap<String, String>,
    context: InterpolationContext,
}

impl JobPlan {
    pub fn new(
        workflow: &WorkflowDefinition,
        job_id: &str,
        event: &Event,
        run_id: RunId,
        workspace: PathBuf,
    ) -> Result<Self> {
        let job = workflow.job(job_id)?.clone();
        let base = InterpolationContext::for_event(event, &workflow.name, run_id).with_job(job_id);

        // Later layers win and may reference earlier ones through `env.*`.
        let layers = [
            Some(&workflow.env),
            job.container.as_ref().and_then(ContainerSpec::env),
            Some(&job.env),
        ];
        let mut env = HashMap::new();
        for layer in layers.into_iter().flatten() {
            let ctx = base.clone().with_env(&env);
            let resolved: Vec<(String, String)> = layer
                .iter()
                .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
                .collect();
            env.extend(resolved);
        }

        env.insert("CI".to_string(), "true".to_string());
        env.insert("CROSSCI_EVENT".to_string(), event.kind.to_string());
        env.insert("CROSSCI_REF".to_string(), event.git_ref.clone());
        env.insert("CROSSCI_WORKFLOW".to_string(), workflow.name.clone());
        env.insert("CROSSCI_JOB".to_string(), job_id.to_string());
        env.insert("CROSSCI_RUN_ID".to_string(), run_id.to_string());
        env.insert(
            "GITHUB_WORKSPACE".to_string(),
            workspace.display().to_string(),
        );

        let context = base.with_env(&env);

        Ok(Self {
            run_id,
            workflow: workflow.name.clone(),
            job_id: job_id.to_string(),
            job,
            event: event.kind,
            git_ref: event.git_ref.clone(),
            workspace,
            env,
            context,
        })
    }

    /// Environment for one step: job environment plus the step's own `env`.
    pub fn step_env(&self, step: &StepDefinition) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.extend(
            step.env
                .iter()
                .map(|(k, v)| (k.clone(), self.context.interpolate(v))),
        );
        env
    }

    pub fn display_name(&self) -> &str {
        self.job.display_name(&self.job_id)
    }
}

/// Executes jobs with the shell runner or, for jobs naming an image, the container runner.
pub struct JobExecutor {
    shell: Arc<dyn StepRunner>,
    container: Option<Arc<dyn StepRunner>>,
    config: RunnerConfig,
}

impl JobExecutor {
    pub fn new(
        shell: Arc<dyn StepRunner>,
        container: Option<Arc<dyn StepRunner>>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            shell,
            container,
            config,
        }
    }

    /// Executor that only runs on the host.
    pub fn host(config: RunnerConfig) -> Self {
        Self::new(Arc::new(ShellRunner::new(config.clone())), None, config)
    }

    /// Executor that runs containerised jobs through the local Docker daemon.
    pub fn with_docker(config: RunnerConfig) -> Result<Self> {
        let container = ContainerRunner::new(config.clone())?;
        Ok(Self::new(
            Arc::new(ShellRunner::new(config.clone())),
            Some(Arc::new(container)),
            config,
        ))
    }

    fn select_runner(&self, plan: &JobPlan) -> (&Arc<dyn StepRunner>, Option<String>) {
        let Some(image) = plan.job.container_image() else {
            return (&self.shell, None);
        };

        match &self.container {
            Some(container) if !self.config.host_only => (container, Some(image.to_string())),
            _ => {
                warn!(
                    job = %plan.job_id,
                    image = %image,
                    "No container runtime in use, running job on the host"
                );
                (&self.shell, None)
            }
        }
    }

    /// Run every step of the job in order.
    ///
    /// The first failing step fails the job and the remaining steps are
    /// skipped. Cancellation stops the current step and skips the rest.
    pub async fn execute(
        &self,
        plan: &JobPlan,
        cancel: CancelSignal,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> JobReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let job_limit = Duration::from_secs(u64::from(plan.job.timeout_minutes) * 60);
        let (runner, image) = self.select_runner(plan);

        info!(
            run_id = %plan.run_id,
            job = %plan.job_id,
            runner = runner.name(),
            steps = plan.job.steps.len(),
            "Starting job"
        );

        let mut status = RunStatus::Success;
        let mut steps = Vec::with_capacity(plan.job.steps.len());

        if let Err(e) = tokio::fs::create_dir_all(&plan.workspace).await {
            error!(workspace = %plan.workspace.display(), error = %e, "Failed to prepare workspace");
            status = RunStatus::Failure;
        }

        for step in &plan.job.steps {
            let name = step.display_name();

            if status != RunStatus::Success {
                steps.push(report(name, StepStatus::Skipped, None, 0));
                continue;
            }
            if cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                steps.push(report(name, StepStatus::Cancelled, None, 0));
                continue;
            }
            if let Some(action) = &step.uses {
                warn!(step = %name, action = %action, "Skipping external action step");
                steps.push(report(name, StepStatus::Skipped, None, 0));
                continue;
            }

            let remaining = job_limit.saturating_sub(start.elapsed());
            let timeout = [
                step.timeout_minutes
                    .map(|m| Duration::from_secs(u64::from(m) * 60)),
                self.config.timeout_seconds.map(Duration::from_secs),
            ]
            .into_iter()
            .flatten()
            .fold(remaining, Duration::min);

            let ctx = StepContext {
                workspace: plan.workspace.clone(),
                env: plan.step_env(step),
                step: step.clone(),
                container_image: image.clone(),
                volumes: plan
                    .job
                    .container
                    .as_ref()
                    .map(|c| c.volumes().to_vec())
                    .unwrap_or_default(),
                timeout: Some(timeout),
                cancel: cancel.clone(),
            };

            let step_start = Instant::now();
            match runner.execute(&ctx, output_tx.clone()).await {
                Ok(result) if result.success => {
                    info!(step = %name, duration_ms = result.duration_ms, "Step succeeded");
                    steps.push(report(
                        name,
                        StepStatus::Success,
                        Some(result.exit_code),
                        result.duration_ms,
                    ));
                }
                Ok(result) => {
                    error!(step = %name, exit_code = result.exit_code, "Step failed");
                    status = RunStatus::Failure;
                    steps.push(report(
                        name,
                        StepStatus::Failure,
                        Some(result.exit_code),
                        result.duration_ms,
                    ));
                }
                Err(Error::RunCancelled { reason }) => {
                    info!(step = %name, reason = %reason, "Step cancelled");
                    status = RunStatus::Cancelled;
                    steps.push(report(
                        name,
                        StepStatus::Cancelled,
                        None,
                        elapsed_ms(step_start),
                    ));
                }
                Err(Error::StepTimeout { seconds }) => {
                    error!(step = %name, seconds, "Step timed out");
                    status = RunStatus::Failure;
                    steps.push(report(
                        name,
                        StepStatus::TimedOut,
                        None,
                        elapsed_ms(step_start),
                    ));
                }
                Err(e) => {
                    error!(step = %name, error = %e, "Step could not be executed");
                    status = RunStatus::Failure;
                    steps.push(report(
                        name,
                        StepStatus::Failure,
                        None,
                        elapsed_ms(step_start),
                    ));
                }
            }
        }

        let duration_ms = elapsed_ms(start);
        info!(
            run_id = %plan.run_id,
            job = %plan.job_id,
            status = ?status,
            duration_ms,
            "Job finished"
        );

        JobReport {
            run_id: plan.run_id,
            job_id: plan.job_id.clone(),
            job_name: plan.display_name().to_string(),
            status,
            steps,
            started_at,
            completed_at: Utc::now(),
            duration_ms,
        }
    }
}

fn report(name: String, status: StepStatus, exit_code: Option<i32>, duration_ms: u64) -> StepReport {
    StepReport {
        name,
        status,
        exit_code,
        duration_ms,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

//! Main scheduler orchestration.
//!
//! The scheduler owns the registered workflows. For every incoming event it
//! evaluates their triggers, places triggered runs in their concurrency
//! groups and drives each run's jobs on a background task.

use crate::concurrency::ConcurrencyTracker;
use crate::triggers::{TriggerDecision, TriggerMatcher};

use chrono::Utc;
use crossci_core::event::Event;
use crossci_core::ids::RunId;
use crossci_core::interpolation::InterpolationContext;
use crossci_core::run::{JobReport, RunReport, RunStatus};
use crossci_core::workflow::WorkflowDefinition;
use crossci_core::{Error, Result};
use crossci_runner::{CancelHandle, CancelSignal, JobExecutor, JobPlan, OutputLine, cancel_pair};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One line of step output, tagged with the run and job that produced it.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: RunId,
    pub job_id: String,
    pub line: OutputLine,
}

/// A run started by [`Scheduler::handle_event`].
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub workflow: String,
    pub concurrency_group: Option<String>,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<RunReport> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("run task failed: {}", e)))
    }
}

struct RegisteredWorkflow {
    definition: Arc<WorkflowDefinition>,
    matcher: TriggerMatcher,
}

/// Control handles of a run that has not finished yet.
struct ActiveRun {
    cancel: CancelHandle,
    /// Present while the run waits for its concurrency group.
    start: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct SchedulerState {
    tracker: ConcurrencyTracker,
    active: HashMap<RunId, ActiveRun>,
}

/// The main scheduler service.
#[derive(Clone)]
pub struct Scheduler {
    workflows: Arc<RwLock<Vec<RegisteredWorkflow>>>,
    executor: Arc<JobExecutor>,
    workspace: PathBuf,
    output: Option<mpsc::Sender<RunOutput>>,
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    pub fn new(executor: JobExecutor, workspace: impl Into<PathBuf>) -> Self {
        Self {
            workflows: Arc::new(RwLock::new(Vec::new())),
            executor: Arc::new(executor),
            workspace: workspace.into(),
            output: None,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Send step output to `sink` instead of logging it.
    pub fn with_output(mut self, sink: mpsc::Sender<RunOutput>) -> Self {
        self.output = Some(sink);
        self
    }

    /// Validate and register a workflow, replacing any workflow with the same name.
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;
        let matcher = TriggerMatcher::for_workflow(&definition)?;

        let mut workflows = self.workflows.write().await;
        workflows.retain(|w| w.definition.name != definition.name);
        info!(workflow = %definition.name, jobs = definition.jobs.len(), "Registered workflow");
        workflows.push(RegisteredWorkflow {
            definition: Arc::new(definition),
            matcher,
        });
        Ok(())
    }

    /// Trigger decision of every registered workflow for `event`.
    pub async fn evaluate(&self, event: &Event) -> Vec<(String, TriggerDecision)> {
        self.workflows
            .read()
            .await
            .iter()
            .map(|w| (w.definition.name.clone(), w.matcher.evaluate(event)))
            .collect()
    }

    /// Start a run of every workflow the event triggers.
    pub async fn handle_event(&self, event: Event) -> Result<Vec<RunHandle>> {
        let event = Arc::new(event);
        let triggered: Vec<Arc<WorkflowDefinition>> = {
            let workflows = self.workflows.read().await;
            workflows
                .iter()
                .filter(|w| match w.matcher.evaluate(&event) {
                    TriggerDecision::Run => true,
                    TriggerDecision::Skip(reason) => {
                        debug!(workflow = %w.definition.name, reason = ?reason, "Workflow not triggered");
                        false
                    }
                })
                .map(|w| w.definition.clone())
                .collect()
        };

        let mut handles = Vec::with_capacity(triggered.len());
        for workflow in triggered {
            handles.push(self.start_run(workflow, event.clone()).await);
        }
        Ok(handles)
    }

    async fn start_run(&self, workflow: Arc<WorkflowDefinition>, event: Arc<Event>) -> RunHandle {
        let run_id = RunId::new();
        let group = workflow.concurrency.as_ref().map(|c| {
            let key = InterpolationContext::for_event(&event, &workflow.name, run_id)
                .interpolate(&c.group);
            (key, c.cancel_in_progress)
        });
        let (cancel, signal) = cancel_pair();

        let start_rx = {
            let mut state = self.state.lock().await;
            let mut start = None;

            if let Some((key, cancel_in_progress)) = &group {
                let admission = state.tracker.admit(key, run_id, *cancel_in_progress);
                for superseded in &admission.cancelled {
                    if let Some(active) = state.active.get(superseded) {
                        info!(
                            run_id = %superseded,
                            group = %key,
                            by = %run_id,
                            "Cancelling superseded run"
                        );
                        active.cancel.cancel();
                    }
                }
                if !admission.start_now {
                    start = Some(oneshot::channel());
                }
            }

            let (start_tx, start_rx) = match start {
                Some((tx, rx)) => (Some(tx), Some(rx)),
                None => (None, None),
            };
            state.active.insert(
                run_id,
                ActiveRun {
                    cancel,
                    start: start_tx,
                },
            );
            start_rx
        };

        let concurrency_group = group.map(|(key, _)| key);
        info!(
            run_id = %run_id,
            workflow = %workflow.name,
            event = %event.kind,
            git_ref = %event.git_ref,
            group = ?concurrency_group,
            queued = start_rx.is_some(),
            "Workflow triggered"
        );

        let scheduler = self.clone();
        let name = workflow.name.clone();
        let group_key = concurrency_group.clone();
        let join = tokio::spawn(async move {
            scheduler
                .drive_run(workflow, event, run_id, group_key, signal, start_rx)
                .await
        });

        RunHandle {
            run_id,
            workflow: name,
            concurrency_group,
            join,
        }
    }

    async fn drive_run(
        self,
        workflow: Arc<WorkflowDefinition>,
        event: Arc<Event>,
        run_id: RunId,
        group: Option<String>,
        cancel: CancelSignal,
        start: Option<oneshot::Receiver<()>>,
    ) -> RunReport {
        let queued_at = Utc::now();

        let started = match start {
            None => true,
            Some(start) => {
                let mut waiting = cancel.clone();
                tokio::select! {
                    result = start => result.is_ok(),
                    _ = waiting.cancelled() => false,
                }
            }
        };

        let (status, jobs) = if started && !cancel.is_cancelled() {
            let jobs = self.run_jobs(&workflow, &event, run_id, &cancel).await;
            (RunStatus::aggregate(jobs.iter().map(|j| j.status)), jobs)
        } else {
            info!(run_id = %run_id, "Run cancelled before it started");
            (RunStatus::Cancelled, Vec::new())
        };

        self.finish(run_id, group.as_deref()).await;

        info!(run_id = %run_id, workflow = %workflow.name, status = ?status, "Run finished");

        RunReport {
            run_id,
            workflow: workflow.name.clone(),
            event: event.kind,
            git_ref: event.git_ref.clone(),
            concurrency_group: group,
            status,
            jobs,
            queued_at,
            completed_at: Utc::now(),
        }
    }

    /// Run all jobs of the workflow concurrently.
    async fn run_jobs(
        &self,
        workflow: &WorkflowDefinition,
        event: &Event,
        run_id: RunId,
        cancel: &CancelSignal,
    ) -> Vec<JobReport> {
        let (plans, mut reports) = self.plan_jobs(workflow, workflow.jobs.keys(), event, run_id);

        reports.extend(join_all(plans.iter().map(|plan| self.run_job(plan, cancel.clone()))).await);
        reports
    }

    /// Plan each job. A job that cannot be planned is reported as failed.
    fn plan_jobs<'a>(
        &self,
        workflow: &WorkflowDefinition,
        job_ids: impl IntoIterator<Item = &'a String>,
        event: &Event,
        run_id: RunId,
    ) -> (Vec<JobPlan>, Vec<JobReport>) {
        let mut plans = Vec::new();
        let mut failed = Vec::new();
        for job_id in job_ids {
            match JobPlan::new(workflow, job_id, event, run_id, self.workspace.clone()) {
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    warn!(job = %job_id, error = %e, "Could not plan job");
                    failed.push(unplanned(run_id, job_id));
                }
            }
        }
        (plans, failed)
    }

    async fn run_job(&self, plan: &JobPlan, cancel: CancelSignal) -> JobReport {
        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        let sink = self.output.clone();
        let run_id = plan.run_id;
        let job_id = plan.job_id.clone();

        let forward = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                match &sink {
                    Some(sink) => {
                        let output = RunOutput {
                            run_id,
                            job_id: job_id.clone(),
                            line,
                        };
                        if sink.send(output).await.is_err() {
                            break;
                        }
                    }
                    None => info!(job = %job_id, stream = ?line.stream, "{}", line.content),
                }
            }
        });

        let report = self.executor.execute(plan, cancel, tx).await;
        if let Err(e) = forward.await {
            warn!(job = %plan.job_id, error = %e, "Output forwarding failed");
        }
        report
    }

    /// Release the run's concurrency slot and start the group's pending run.
    async fn finish(&self, run_id: RunId, group: Option<&str>) {
        let mut state = self.state.lock().await;
        state.active.remove(&run_id);

        let Some(group) = group else {
            return;
        };
        if let Some(next) = state.tracker.complete(group, run_id) {
            let start = state.active.get_mut(&next).and_then(|a| a.start.take());
            match start.map(|s| s.send(())) {
                Some(Ok(())) => info!(run_id = %next, group = %group, "Starting queued run"),
                _ => warn!(run_id = %next, group = %group, "Queued run is gone"),
            }
        }
    }

    /// Request cancellation of a run. Returns false if the run is not active.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        let state = self.state.lock().await;
        match state.active.get(&run_id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every active run.
    pub async fn cancel_all(&self) {
        let state = self.state.lock().await;
        for active in state.active.values() {
            active.cancel.cancel();
        }
    }

    /// Number of runs that are running or waiting for their group.
    pub async fn active_runs(&self) -> usize {
        self.state.lock().await.active.len()
    }
}

fn unplanned(run_id: RunId, job_id: &str) -> JobReport {
    let now = Utc::now();
    JobReport {
        run_id,
        job_id: job_id.to_string(),
        job_name: job_id.to_string(),
        status: RunStatus::Failure,
        steps: Vec::new(),
        started_at: now,
        completed_at: now,
        duration_ms: 0,
    }
}

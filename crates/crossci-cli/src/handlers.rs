//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{CliConfig, OutputFormat, RunnerKind};
use console::style;
use crossci_core::event::Event;
use crossci_core::ids::RunId;
use crossci_core::interpolation::InterpolationContext;
use crossci_core::run::{RunReport, RunStatus, StepStatus};
use crossci_core::workflow::WorkflowDefinition;
use crossci_runner::{JobExecutor, OutputStream, RunnerConfig};
use crossci_scheduler::{RunHandle, RunOutput, Scheduler, TriggerDecision, TriggerMatcher};
use futures::future::join_all;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub const WORKFLOW_TEMPLATE: &str = r#"name: Cross-only compilation environment

concurrency:
  group: ${{ github.workflow }}-${{ github.head_ref || github.ref }}
  cancel-in-progress: true

on:
  push:
    branches:
      - master
      - '[0-9]+.[0-9]+'
    paths:
      - "mesonbuild/**"
      - "test cases/**"
      - ".github/workflows/cross_only.yml"
      - "run_cross_test.py"
      - "run_tests.py"
  pull_request:
    paths:
      - "mesonbuild/**"
      - "test cases/**"
      - ".github/workflows/cross_only.yml"
      - "run_cross_test.py"
      - "run_tests.py"

permissions:
  contents: read

jobs:
  cross-only-armhf:
    runs-on: ubuntu-latest
    container: mesonbuild/eoan:latest
    env:
      MESON_CI_JOBNAME: linux-${{ github.job }}
    steps:
      - uses: actions/checkout@v4
      - name: Run cross-only tests
        run: bash -c 'source /ci/env_vars.sh; cd $GITHUB_WORKSPACE; ./tools/run_with_cov.py ./run_tests.py $CI_ARGS --cross cross/ubuntu-armhf.json --cross-only'
      - name: Upload coverage
        run: ./ci/combine_cov.sh
"#;

/// A workflow definition and the file it was read from.
#[derive(Debug)]
pub struct LoadedWorkflow {
    pub path: PathBuf,
    pub definition: WorkflowDefinition,
}

/// Trigger decision for one workflow.
#[derive(Debug, Serialize)]
pub struct Evaluation {
    pub workflow: String,
    pub file: PathBuf,
    pub decision: TriggerDecision,
    pub concurrency_group: Option<String>,
}

/// Sorted `.yml`/`.yaml` files among `entries`. The first unreadable entry is an error.
pub(crate) fn workflow_files<I>(entries: I) -> std::io::Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = std::io::Result<PathBuf>>,
{
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read a workflow file, or every `.yml`/`.yaml` file in a directory.
pub fn load_workflows(path: &Path) -> Result<Vec<LoadedWorkflow>, Box<dyn Error>> {
    let files = if path.is_dir() {
        let entries = std::fs::read_dir(path)?.map(|entry| entry.map(|e| e.path()));
        workflow_files(entries)?
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        return Err(format!("No workflow files found in {}", path.display()).into());
    }

    files
        .into_iter()
        .map(|path| -> Result<LoadedWorkflow, Box<dyn Error>> {
            let definition = WorkflowDefinition::from_file(&path)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            Ok(LoadedWorkflow { path, definition })
        })
        .collect()
}

/// Evaluate every workflow against `event`.
pub fn evaluate_workflows(
    workflows: &[LoadedWorkflow],
    event: &Event,
) -> Result<Vec<Evaluation>, Box<dyn Error>> {
    workflows
        .iter()
        .map(|w| -> Result<Evaluation, Box<dyn Error>> {
            let matcher = TriggerMatcher::for_workflow(&w.definition)?;
            let concurrency_group = w.definition.concurrency.as_ref().map(|c| {
                InterpolationContext::for_event(event, &w.definition.name, RunId::new())
                    .interpolate(&c.group)
            });
            Ok(Evaluation {
                workflow: w.definition.name.clone(),
                file: w.path.clone(),
                decision: matcher.evaluate(event),
                concurrency_group,
            })
        })
        .collect()
}

fn print_structured<T: Serialize>(format: OutputFormat, value: &T) -> Result<bool, Box<dyn Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Table => return Ok(false),
    }
    Ok(true)
}

/// Write the workflow template.
pub async fn init(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        println!(
            "{} {} already exists (use --force to overwrite)",
            style("!").yellow(),
            path.display()
        );
        return Ok(());
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, WORKFLOW_TEMPLATE).await?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Validate workflow files. Returns whether all of them are valid.
pub async fn validate(path: &Path) -> Result<bool, Box<dyn Error>> {
    let workflows = load_workflows(path)?;
    let mut all_valid = true;

    for workflow in &workflows {
        let definition = &workflow.definition;
        let issues = definition.issues();
        if !issues.is_empty() {
            all_valid = false;
            println!(
                "{} {} is invalid",
                style("✗").red(),
                workflow.path.display()
            );
            for issue in issues {
                println!("    - {}", issue);
            }
            continue;
        }

        println!(
            "{} Workflow \"{}\" is valid",
            style("✓").green(),
            definition.name
        );
        let events: Vec<&str> = [
            definition.triggers.push.as_ref().map(|_| "push"),
            definition.triggers.pull_request.as_ref().map(|_| "pull_request"),
        ]
        .into_iter()
        .flatten()
        .collect();
        println!("  Triggers: {}", events.join(", "));
        if let Some(concurrency) = &definition.concurrency {
            println!(
                "  Concurrency: {} (cancel in progress: {})",
                concurrency.group, concurrency.cancel_in_progress
            );
        }
        println!("  Jobs: {}", definition.jobs.len());
        for (id, job) in &definition.jobs {
            match job.container_image() {
                Some(image) => println!("    - {} ({} steps, {})", id, job.steps.len(), image),
                None => println!("    - {} ({} steps)", id, job.steps.len()),
            }
        }
    }

    Ok(all_valid)
}

/// Report which workflows the event triggers. Returns whether any did.
pub async fn evaluate(
    config: &CliConfig,
    path: &Path,
    args: &EventArgs,
) -> Result<bool, Box<dyn Error>> {
    let event = args.to_event()?;
    let workflows = load_workflows(path)?;
    let evaluations = evaluate_workflows(&workflows, &event)?;
    let triggered = evaluations.iter().any(|e| e.decision.should_run());

    if print_structured(config.output_format, &evaluations)? {
        return Ok(triggered);
    }

    println!(
        "Evaluating {} on {} ({} changed paths)",
        style(event.kind).bold(),
        style(&event.git_ref).dim(),
        event.changed_paths.len()
    );
    for evaluation in &evaluations {
        match evaluation.decision {
            TriggerDecision::Run => {
                println!(
                    "{} {} triggers",
                    style("▶").cyan(),
                    style(&evaluation.workflow).bold()
                );
                if let Some(group) = &evaluation.concurrency_group {
                    println!("  Concurrency group: {}", group);
                }
            }
            TriggerDecision::Skip(reason) => println!(
                "{} {} skipped ({:?})",
                style("-").dim(),
                evaluation.workflow,
                reason
            ),
        }
    }

    Ok(triggered)
}

/// Run the jobs an event triggers. Returns whether every run succeeded.
pub async fn run(
    config: &CliConfig,
    path: &Path,
    args: &EventArgs,
    job: Option<&str>,
    host: bool,
    workspace: Option<PathBuf>,
) -> Result<bool, Box<dyn Error>> {
    let event = args.to_event()?;
    let mut workflows = load_workflows(path)?;

    if let Some(job) = job {
        for workflow in &mut workflows {
            workflow.definition.jobs.retain(|id, _| id == job);
        }
        workflows.retain(|w| !w.definition.jobs.is_empty());
        if workflows.is_empty() {
            return Err(format!("No workflow defines job {}", job).into());
        }
    }

    let runner_config = RunnerConfig {
        timeout_seconds: Some(u64::from(config.step_timeout_minutes) * 60),
        host_only: host || config.runner == RunnerKind::Host,
    };
    let executor = if runner_config.host_only {
        JobExecutor::host(runner_config)
    } else {
        match JobExecutor::with_docker(runner_config.clone()) {
            Ok(executor) => executor,
            Err(e) => {
                println!(
                    "{} Docker unavailable ({}), running on the host",
                    style("!").yellow(),
                    e
                );
                JobExecutor::host(runner_config)
            }
        }
    };

    let workspace = match workspace.or_else(|| config.workspace.clone()) {
        Some(workspace) => workspace,
        None => std::env::current_dir()?,
    };

    let (output_tx, output_rx) = mpsc::channel(1024);
    let scheduler = Scheduler::new(executor, workspace).with_output(output_tx);
    for workflow in workflows {
        scheduler.register(workflow.definition).await?;
    }

    let handles = scheduler.handle_event(event).await?;
    if handles.is_empty() {
        println!("{} No workflow triggered", style("i").blue());
        return Ok(true);
    }
    for handle in &handles {
        println!(
            "{} Running {} ({})",
            style("▶").cyan(),
            style(&handle.workflow).bold(),
            style(handle.run_id).dim()
        );
    }

    let printer = tokio::spawn(print_output(output_rx, config.output_format));

    let waiting = join_all(handles.into_iter().map(RunHandle::wait));
    tokio::pin!(waiting);
    let results = tokio::select! {
        results = &mut waiting => results,
        _ = tokio::signal::ctrl_c() => {
            println!("{} Cancelling runs", style("!").yellow());
            scheduler.cancel_all().await;
            waiting.await
        }
    };

    drop(scheduler);
    printer.await?;

    let reports = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    let success = reports.iter().all(RunReport::is_success);

    if !print_structured(config.output_format, &reports)? {
        for report in &reports {
            print_report(report);
        }
    }

    Ok(success)
}

async fn print_output(mut rx: mpsc::Receiver<RunOutput>, format: OutputFormat) {
    while let Some(output) = rx.recv().await {
        let prefix = style(format!("[{}]", output.job_id)).dim();
        // Keep stdout clean for structured reports.
        match (format, output.line.stream) {
            (OutputFormat::Table, OutputStream::Stdout) => {
                println!("{} {}", prefix, output.line.content)
            }
            _ => eprintln!("{} {}", prefix, output.line.content),
        }
    }
}

fn print_report(report: &RunReport) {
    let marker = match report.status {
        RunStatus::Success | RunStatus::Skipped => style("✓").green(),
        RunStatus::Cancelled => style("!").yellow(),
        _ => style("✗").red(),
    };
    println!(
        "{} {} {:?}",
        marker,
        style(&report.workflow).bold(),
        report.status
    );

    for job in &report.jobs {
        println!(
            "  {} {:?} ({:.1}s)",
            job.job_name,
            job.status,
            job.duration_ms as f64 / 1000.0
        );
        for step in &job.steps {
            let symbol = match step.status {
                StepStatus::Success => style("✓").green(),
                StepStatus::Skipped => style("-").dim(),
                StepStatus::Cancelled => style("!").yellow(),
                StepStatus::Failure | StepStatus::TimedOut => style("✗").red(),
            };
            match step.exit_code {
                Some(code) => println!("    {} {} (exit {})", symbol, step.name, code),
                None => println!("    {} {}", symbol, step.name),
            }
        }
    }
}

/// Print the workflow JSON Schema.
pub fn schema() -> Result<(), Box<dyn Error>> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<(), Box<dyn Error>> {
    println!("Current configuration:");
    println!("  runner: {:?}", config.runner);
    println!(
        "  workspace: {}",
        config
            .workspace
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(current directory)".to_string())
    );
    println!("  step_timeout_minutes: {}", config.step_timeout_minutes);
    println!("  output_format: {:?}", config.output_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

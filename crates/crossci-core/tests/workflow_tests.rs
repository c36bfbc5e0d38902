//! Parsing and validation of a complete cross-compilation workflow.

use crossci_core::event::{Event, EventKind};
use crossci_core::ids::RunId;
use crossci_core::interpolation::InterpolationContext;
use crossci_core::workflow::{PermissionLevel, WorkflowDefinition};
use pretty_assertions::assert_eq;

const CROSS_ONLY: &str = include_str!("fixtures/cross_only.yml");

fn workflow() -> WorkflowDefinition {
    WorkflowDefinition::from_yaml(CROSS_ONLY).expect("fixture parses")
}

#[test]
fn test_cross_workflow_is_valid() {
    let wf = workflow();
    assert_eq!(wf.validate().map_err(|e| e.to_string()), Ok(()));
}

#[test]
fn test_cross_workflow_triggers() {
    let wf = workflow();

    let push = wf.filter_for(EventKind::Push).expect("push trigger");
    assert_eq!(push.branches, vec!["master", "[0-9]+.[0-9]+"]);
    assert_eq!(push.paths.len(), 5);

    let pr = wf.filter_for(EventKind::PullRequest).expect("pr trigger");
    assert!(pr.branches.is_empty());
    assert_eq!(pr.paths, push.paths);
}

#[test]
fn test_cross_workflow_job() {
    let wf = workflow();
    assert_eq!(wf.permissions.get("contents"), Some(&PermissionLevel::Read));

    let job = wf.job("cross-only-armhf").expect("job exists");
    assert_eq!(job.container_image(), Some("mesonbuild/eoan:latest"));
    assert_eq!(job.steps.len(), 3);
    assert!(job.steps[0].uses.is_some());

    let run = job.steps[1].run.as_deref().expect("run step");
    let args: Vec<&str> = run.trim_end_matches('\'').split_whitespace().collect();
    let harness = args.iter().position(|a| *a == "./run_tests.py").expect("run_tests.py");
    assert!(args[..harness].contains(&"./tools/run_with_cov.py"));
    let cross = args.iter().position(|a| *a == "--cross").expect("--cross");
    assert!(cross > harness);
    assert!(args[cross + 1].ends_with(".json"));
    assert_eq!(args[cross + 2..], ["--cross-only"]);
}

#[test]
fn test_cross_workflow_group_key_and_job_name() {
    let wf = workflow();
    let concurrency = wf.concurrency.as_ref().expect("concurrency block");
    assert!(concurrency.cancel_in_progress);

    let event = Event::push("1.4", ["mesonbuild/compilers/c.py"]);
    let ctx = InterpolationContext::for_event(&event, &wf.name, RunId::new())
        .with_job("cross-only-armhf");

    assert_eq!(
        ctx.interpolate(&concurrency.group),
        "Cross-only compilation environment-refs/heads/1.4"
    );

    let job = wf.job("cross-only-armhf").unwrap();
    assert_eq!(
        ctx.interpolate(&job.env["MESON_CI_JOBNAME"]),
        "linux-cross-only-armhf"
    );
}

#[test]
fn test_definition_survives_yaml_roundtrip() {
    let wf = workflow();
    let yaml = serde_yaml::to_string(&wf).unwrap();
    let again = WorkflowDefinition::from_yaml(&yaml).unwrap();

    assert_eq!(again.triggers.push, wf.triggers.push);
    assert_eq!(again.triggers.pull_request, wf.triggers.pull_request);
    assert_eq!(again.jobs.len(), wf.jobs.len());
}

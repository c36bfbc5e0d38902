//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML file.

use crate::event::EventKind;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(rename = "on", default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default)]
    pub permissions: BTreeMap<String, PermissionLevel>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub jobs: BTreeMap<String, JobDefinition>,
}

impl WorkflowDefinition {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Filter declared for an event kind, if the workflow listens to it.
    pub fn filter_for(&self, kind: EventKind) -> Option<&EventFilter> {
        match kind {
            EventKind::Push => self.triggers.push.as_ref(),
            EventKind::PullRequest => self.triggers.pull_request.as_ref(),
        }
    }

    pub fn job(&self, id: &str) -> Result<&JobDefinition> {
        self.jobs
            .get(id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }
}

/// The `on:` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct TriggerConfig {
    #[serde(
        default,
        deserialize_with = "declared_filter",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<EventFilter>")]
    pub push: Option<EventFilter>,
    #[serde(
        default,
        deserialize_with = "declared_filter",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<EventFilter>")]
    pub pull_request: Option<EventFilter>,
}

/// A bare `push:` key still declares the trigger, just without filters.
fn declared_filter<'de, D>(deserializer: D) -> std::result::Result<Option<EventFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(
        Option::<EventFilter>::deserialize(deserializer)?.unwrap_or_default(),
    ))
}

/// Branch and path filters for one event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct EventFilter {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub branches_ignore: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyConfig {
    /// Group key, usually an expression over the ref.
    pub group: String,
    #[serde(default)]
    pub cancel_in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub runs_on: Option<String>,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default = "default_job_timeout")]
    pub timeout_minutes: u32,
}

fn default_job_timeout() -> u32 {
    360
}

impl JobDefinition {
    /// Human-facing name, falling back to the job id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(id)
    }

    pub fn container_image(&self) -> Option<&str> {
        self.container.as_ref().map(ContainerSpec::image)
    }
}

/// `container:` accepts either an image reference or a detailed block.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ContainerSpec {
    Image(String),
    Detailed {
        image: String,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        volumes: Vec<String>,
        #[serde(default)]
        options: Option<String>,
    },
}

impl ContainerSpec {
    pub fn image(&self) -> &str {
        match self {
            ContainerSpec::Image(image) => image,
            ContainerSpec::Detailed { image, .. } => image,
        }
    }

    /// Extra environment set on the container itself.
    pub fn env(&self) -> Option<&HashMap<String, String>> {
        match self {
            ContainerSpec::Image(_) => None,
            ContainerSpec::Detailed { env, .. } => Some(env),
        }
    }

    pub fn volumes(&self) -> &[String] {
        match self {
            ContainerSpec::Image(_) => &[],
            ContainerSpec::Detailed { volumes, .. } => volumes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    /// Reference to an external action; these are not executed locally.
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl StepDefinition {
    pub fn shell_command(run: impl Into<String>) -> Self {
        Self {
            name: None,
            run: Some(run.into()),
            uses: None,
            shell: default_shell(),
            working_directory: None,
            env: HashMap::new(),
            timeout_minutes: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name shown in logs: explicit name, else the action, else the first command line.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        self.run
            .as_deref()
            .and_then(|run| run.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("step")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bare_trigger_key_is_declared() {
        let yaml = r#"
name: bare
on:
  push:
jobs:
  build:
    steps:
      - run: make
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.triggers.push, Some(EventFilter::default()));
        assert!(wf.triggers.pull_request.is_none());
        assert!(wf.filter_for(EventKind::Push).is_some());
        assert!(wf.filter_for(EventKind::PullRequest).is_none());
    }

    #[test]
    fn test_kebab_case_filters() {
        let yaml = r#"
name: filters
on:
  pull_request:
    branches-ignore: ["wip/**"]
    paths-ignore: ["docs/**"]
jobs:
  build:
    steps:
      - run: make
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        let pr = wf.triggers.pull_request.unwrap();
        assert_eq!(pr.branches_ignore, vec!["wip/**".to_string()]);
        assert_eq!(pr.paths_ignore, vec!["docs/**".to_string()]);
        assert!(pr.branches.is_empty());
    }

    #[test]
    fn test_container_forms() {
        let yaml = r#"
name: containers
on:
  push:
jobs:
  short:
    container: mesonbuild/eoan:latest
    steps:
      - run: "true"
  long:
    container:
      image: mesonbuild/focal:latest
      env:
        CC: clang
    steps:
      - run: "true"
  none:
    steps:
      - run: "true"
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(
            wf.job("short").unwrap().container_image(),
            Some("mesonbuild/eoan:latest")
        );
        let long = wf.job("long").unwrap();
        assert_eq!(long.container_image(), Some("mesonbuild/focal:latest"));
        assert_eq!(
            long.container.as_ref().unwrap().env().unwrap().get("CC"),
            Some(&"clang".to_string())
        );
        assert_eq!(wf.job("none").unwrap().container_image(), None);
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
name: defaults
jobs:
  build:
    steps:
      - run: make
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        let job = wf.job("build").unwrap();
        assert_eq!(job.timeout_minutes, 360);
        assert_eq!(job.steps[0].shell, "bash");
        assert!(wf.concurrency.is_none());
        assert!(wf.permissions.is_empty());
    }

    #[test]
    fn test_missing_job() {
        let wf = WorkflowDefinition::from_yaml("name: x\njobs: {}\n").unwrap();
        assert!(matches!(wf.job("nope"), Err(Error::JobNotFound(_))));
    }

    #[test]
    fn test_malformed_yaml_is_invalid_workflow() {
        let err = WorkflowDefinition::from_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidWorkflow(_)));
    }

    #[test]
    fn test_step_display_name() {
        let step = StepDefinition::shell_command("\n  ./run_tests.py --cross-only\n  echo done\n");
        assert_eq!(step.display_name(), "./run_tests.py --cross-only");
        assert_eq!(step.clone().named("Run tests").display_name(), "Run tests");

        let action = StepDefinition {
            uses: Some("actions/checkout@v4".to_string()),
            run: None,
            ..step
        };
        assert_eq!(action.display_name(), "actions/checkout@v4");
    }
}

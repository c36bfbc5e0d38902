//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};
use crossci_core::event::Event;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a cross-compilation workflow template
    Init {
        /// Where to write the workflow
        #[arg(long, default_value = ".github/workflows/cross_only.yml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate workflow files
    Validate {
        /// Workflow file or directory of workflows
        #[arg(default_value = ".github/workflows")]
        path: PathBuf,
    },

    /// Check which workflows an event triggers
    Evaluate {
        /// Workflow file or directory of workflows
        #[arg(default_value = ".github/workflows")]
        path: PathBuf,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Evaluate an event and run the triggered jobs locally
    Run {
        /// Workflow file or directory of workflows
        #[arg(default_value = ".github/workflows")]
        path: PathBuf,

        #[command(flatten)]
        event: EventArgs,

        /// Only run this job
        #[arg(short, long)]
        job: Option<String>,

        /// Run container jobs on the host
        #[arg(long)]
        host: bool,

        /// Checkout to run the steps in
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Print the JSON Schema of the workflow format
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventType {
    Push,
    #[value(name = "pull_request", alias = "pr")]
    PullRequest,
}

/// Description of the repository event to evaluate.
#[derive(Debug, Args)]
pub struct EventArgs {
    /// Event type
    #[arg(long, value_enum, default_value_t = EventType::Push)]
    pub event: EventType,

    /// Pushed ref, or the head branch of a pull request
    #[arg(long = "ref", default_value = "master")]
    pub git_ref: String,

    /// Target branch of a pull request
    #[arg(long)]
    pub base: Option<String>,

    /// Commit SHA
    #[arg(long)]
    pub sha: Option<String>,

    /// Changed file paths, relative to the repository root
    #[arg(short, long = "changed", num_args = 1..)]
    pub changed: Vec<String>,
}

impl EventArgs {
    pub fn to_event(&self) -> Result<Event, String> {
        let event = match self.event {
            EventType::Push => Event::push(self.git_ref.as_str(), self.changed.iter().cloned()),
            EventType::PullRequest => {
                let base = self
                    .base
                    .as_deref()
                    .ok_or("--base is required for pull_request events")?;
                Event::pull_request(base, self.git_ref.as_str(), self.changed.iter().cloned())
            }
        };

        Ok(match &self.sha {
            Some(sha) => event.with_sha(sha.as_str()),
            None => event,
        })
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossci_core::event::EventKind;

    fn args(event: EventType, git_ref: &str, base: Option<&str>) -> EventArgs {
        EventArgs {
            event,
            git_ref: git_ref.to_string(),
            base: base.map(str::to_string),
            sha: Some("0123abc".to_string()),
            changed: vec!["mesonbuild/mesonlib.py".to_string()],
        }
    }

    #[test]
    fn test_push_event() {
        let event = args(EventType::Push, "1.4", None).to_event().unwrap();
        assert_eq!(event.kind, EventKind::Push);
        assert_eq!(event.git_ref, "refs/heads/1.4");
        assert_eq!(event.sha.as_deref(), Some("0123abc"));
        assert!(event.changed_paths.contains("mesonbuild/mesonlib.py"));
    }

    #[test]
    fn test_pull_request_needs_base() {
        assert!(args(EventType::PullRequest, "feature", None).to_event().is_err());

        let event = args(EventType::PullRequest, "feature", Some("master"))
            .to_event()
            .unwrap();
        assert_eq!(event.filter_branch(), Some("master"));
        assert_eq!(event.head_ref.as_deref(), Some("feature"));
    }
}

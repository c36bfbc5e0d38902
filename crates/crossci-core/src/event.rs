//! Source-control events that may trigger a workflow.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming push or pull-request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub kind: EventKind,
    /// Full ref that was pushed, or the pull request head ref.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Branch a pull request targets.
    #[serde(default)]
    pub base_ref: Option<String>,
    /// Branch a pull request comes from.
    #[serde(default)]
    pub head_ref: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub changed_paths: BTreeSet<String>,
}

impl Event {
    pub fn push<I, S>(git_ref: impl Into<String>, changed_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: EventKind::Push,
            git_ref: qualify(git_ref.into()),
            base_ref: None,
            head_ref: None,
            sha: None,
            changed_paths: changed_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pull_request<I, S>(
        base_ref: impl Into<String>,
        head_ref: impl Into<String>,
        changed_paths: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let base_ref = short_name(&base_ref.into()).to_string();
        let head_ref = short_name(&head_ref.into()).to_string();
        Self {
            kind: EventKind::PullRequest,
            git_ref: qualify(head_ref.clone()),
            base_ref: Some(base_ref),
            head_ref: Some(head_ref),
            sha: None,
            changed_paths: changed_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// The branch that branch filters are evaluated against.
    ///
    /// Pushes use the pushed branch, pull requests the base branch.
    /// Tag pushes have no branch.
    pub fn filter_branch(&self) -> Option<&str> {
        match self.kind {
            EventKind::Push => self
                .git_ref
                .strip_prefix(HEADS_PREFIX)
                .or_else(|| (!self.git_ref.starts_with("refs/")).then_some(self.git_ref.as_str())),
            EventKind::PullRequest => self.base_ref.as_deref(),
        }
    }

    /// Short name of the ref: branch or tag name without the `refs/...` prefix.
    pub fn ref_name(&self) -> &str {
        short_name(&self.git_ref)
    }

    pub fn is_tag(&self) -> bool {
        self.git_ref.starts_with(TAGS_PREFIX)
    }
}

/// Branch names given without a `refs/` prefix are taken as heads.
fn qualify(git_ref: String) -> String {
    if git_ref.starts_with("refs/") {
        git_ref
    } else {
        format!("{HEADS_PREFIX}{git_ref}")
    }
}

fn short_name(git_ref: &str) -> &str {
    git_ref
        .strip_prefix(HEADS_PREFIX)
        .or_else(|| git_ref.strip_prefix(TAGS_PREFIX))
        .unwrap_or(git_ref)
}

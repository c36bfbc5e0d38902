//! Trigger matching and evaluation.

use crossci_core::Result;
use crossci_core::event::{Event, EventKind};
use crossci_core::pattern::{PatternKind, PatternList};
use crossci_core::workflow::{EventFilter, WorkflowDefinition};
use serde::Serialize;

/// Why an event did not trigger a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The workflow does not listen to this kind of event.
    EventNotDeclared,
    /// Branch filters are declared but the ref is not a branch.
    NotABranch,
    BranchNotMatched,
    BranchIgnored,
    /// Path filters are declared but the event changed nothing.
    NoChangedPaths,
    PathsNotMatched,
    AllPathsIgnored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum TriggerDecision {
    Run,
    Skip(SkipReason),
}

impl TriggerDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, TriggerDecision::Run)
    }
}

/// Compiled branch and path filters for one event kind.
#[derive(Debug, Clone, Default)]
pub struct TriggerRule {
    branches: PatternList,
    branches_ignore: PatternList,
    paths: PatternList,
    paths_ignore: PatternList,
}

impl TriggerRule {
    /// Rule from include patterns only.
    pub fn new(branch_patterns: &[String], path_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            branches: PatternList::compile(branch_patterns, PatternKind::Branch)?,
            paths: PatternList::compile(path_patterns, PatternKind::Path)?,
            ..Self::default()
        })
    }

    pub fn compile(filter: &EventFilter) -> Result<Self> {
        Ok(Self {
            branches: PatternList::compile(&filter.branches, PatternKind::Branch)?,
            branches_ignore: PatternList::compile(&filter.branches_ignore, PatternKind::Branch)?,
            paths: PatternList::compile(&filter.paths, PatternKind::Path)?,
            paths_ignore: PatternList::compile(&filter.paths_ignore, PatternKind::Path)?,
        })
    }

    /// Decide whether `event` passes the branch and path filters.
    pub fn evaluate(&self, event: &Event) -> TriggerDecision {
        match event.filter_branch() {
            Some(branch) => {
                if !self.branches.is_empty() && !self.branches.includes(branch) {
                    return TriggerDecision::Skip(SkipReason::BranchNotMatched);
                }
                if !self.branches_ignore.is_empty() && self.branches_ignore.includes(branch) {
                    return TriggerDecision::Skip(SkipReason::BranchIgnored);
                }
            }
            None => {
                if !self.branches.is_empty() || !self.branches_ignore.is_empty() {
                    return TriggerDecision::Skip(SkipReason::NotABranch);
                }
            }
        }

        let changed = &event.changed_paths;
        if !self.paths.is_empty() {
            if changed.is_empty() {
                return TriggerDecision::Skip(SkipReason::NoChangedPaths);
            }
            if !changed.iter().any(|path| self.paths.includes(path)) {
                return TriggerDecision::Skip(SkipReason::PathsNotMatched);
            }
        }

        if !self.paths_ignore.is_empty()
            && !changed.is_empty()
            && changed.iter().all(|path| self.paths_ignore.includes(path))
        {
            return TriggerDecision::Skip(SkipReason::AllPathsIgnored);
        }

        TriggerDecision::Run
    }

    pub fn should_run(&self, event: &Event) -> bool {
        self.evaluate(event).should_run()
    }
}

/// Matcher for determining if a workflow should be triggered.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    push: Option<TriggerRule>,
    pull_request: Option<TriggerRule>,
}

impl TriggerMatcher {
    pub fn for_workflow(workflow: &WorkflowDefinition) -> Result<Self> {
        Ok(Self {
            push: workflow
                .triggers
                .push
                .as_ref()
                .map(TriggerRule::compile)
                .transpose()?,
            pull_request: workflow
                .triggers
                .pull_request
                .as_ref()
                .map(TriggerRule::compile)
                .transpose()?,
        })
    }

    pub fn evaluate(&self, event: &Event) -> TriggerDecision {
        let rule = match event.kind {
            EventKind::Push => self.push.as_ref(),
            EventKind::PullRequest => self.pull_request.as_ref(),
        };
        match rule {
            Some(rule) => rule.evaluate(event),
            None => TriggerDecision::Skip(SkipReason::EventNotDeclared),
        }
    }

    /// Check if a workflow should be triggered by an event.
    pub fn matches(&self, event: &Event) -> bool {
        self.evaluate(event).should_run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn cross_rule() -> TriggerRule {
        TriggerRule::new(
            &strings(&["master", "[0-9]+.[0-9]+"]),
            &strings(&[
                "mesonbuild/**",
                "test cases/**",
                ".github/workflows/cross_only.yml",
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_branch_and_path_match() {
        let rule = cross_rule();
        assert!(rule.should_run(&Event::push("master", ["mesonbuild/mesonlib.py"])));
        assert!(rule.should_run(&Event::push("0.61", ["test cases/common/1 trivial/meson.build"])));
        assert!(rule.should_run(&Event::push(
            "refs/heads/1.4",
            [".github/workflows/cross_only.yml"]
        )));
    }

    #[test]
    fn test_branch_mismatch() {
        let rule = cross_rule();
        assert_eq!(
            rule.evaluate(&Event::push("feature/x", ["mesonbuild/mesonlib.py"])),
            TriggerDecision::Skip(SkipReason::BranchNotMatched)
        );
        assert!(!rule.should_run(&Event::push("1.4.1", ["mesonbuild/a.py"])));
    }

    #[test]
    fn test_path_mismatch() {
        let rule = cross_rule();
        assert_eq!(
            rule.evaluate(&Event::push("master", ["docs/markdown/Cross-compilation.md"])),
            TriggerDecision::Skip(SkipReason::PathsNotMatched)
        );
        assert_eq!(
            rule.evaluate(&Event::push("master", Vec::<String>::new())),
            TriggerDecision::Skip(SkipReason::NoChangedPaths)
        );
    }

    #[test]
    fn test_one_matching_path_is_enough() {
        let rule = cross_rule();
        assert!(rule.should_run(&Event::push(
            "master",
            ["README.md", "docs/x.md", "mesonbuild/build.py"]
        )));
    }

    #[test]
    fn test_empty_patterns_match_all() {
        let rule = TriggerRule::default();
        assert!(rule.should_run(&Event::push("any-branch", ["anything"])));
        assert!(rule.should_run(&Event::push("any-branch", Vec::<String>::new())));
        assert!(rule.should_run(&Event::push("refs/tags/1.0.0", ["a"])));
    }

    #[test]
    fn test_tag_push_with_branch_filter() {
        let rule = cross_rule();
        assert_eq!(
            rule.evaluate(&Event::push("refs/tags/1.4.0", ["mesonbuild/a.py"])),
            TriggerDecision::Skip(SkipReason::NotABranch)
        );
    }

    #[test]
    fn test_pull_request_uses_base_branch() {
        let rule = cross_rule();
        assert!(rule.should_run(&Event::pull_request(
            "master",
            "feature/x",
            ["mesonbuild/a.py"]
        )));
        assert!(!rule.should_run(&Event::pull_request(
            "feature/y",
            "master",
            ["mesonbuild/a.py"]
        )));
    }

    #[test]
    fn test_ignore_lists() {
        let filter = EventFilter {
            branches_ignore: strings(&["wip/**"]),
            paths_ignore: strings(&["docs/**", "*.md"]),
            ..EventFilter::default()
        };
        let rule = TriggerRule::compile(&filter).unwrap();

        assert_eq!(
            rule.evaluate(&Event::push("wip/cross", ["mesonbuild/a.py"])),
            TriggerDecision::Skip(SkipReason::BranchIgnored)
        );
        assert_eq!(
            rule.evaluate(&Event::push("master", ["docs/a.md", "README.md"])),
            TriggerDecision::Skip(SkipReason::AllPathsIgnored)
        );
        // A single non-ignored path is enough to run.
        assert!(rule.should_run(&Event::push("master", ["docs/a.md", "mesonbuild/a.py"])));
        assert!(rule.should_run(&Event::push("master", Vec::<String>::new())));
    }

    #[test]
    fn test_negated_path_pattern() {
        let rule = TriggerRule::new(&[], &strings(&["mesonbuild/**", "!mesonbuild/**/*.md"]))
            .unwrap();
        assert!(!rule.should_run(&Event::push("master", ["mesonbuild/README.md"])));
        assert!(rule.should_run(&Event::push("master", ["mesonbuild/README.md", "mesonbuild/a.py"])));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(TriggerRule::new(&strings(&["[0-9"]), &[]).is_err());
    }

    #[test]
    fn test_matcher_requires_declared_event() {
        let wf = WorkflowDefinition::from_yaml(
            r#"
name: push-only
on:
  push:
    branches: [master]
jobs:
  build:
    steps:
      - run: make
"#,
        )
        .unwrap();
        let matcher = TriggerMatcher::for_workflow(&wf).unwrap();

        assert!(matcher.matches(&Event::push("master", ["a"])));
        assert_eq!(
            matcher.evaluate(&Event::pull_request("master", "x", ["a"])),
            TriggerDecision::Skip(SkipReason::EventNotDeclared)
        );
    }

    #[test]
    fn test_decision_serializes_with_reason() {
        let json = serde_json::to_value(TriggerDecision::Skip(SkipReason::PathsNotMatched)).unwrap();
        assert_eq!(json["decision"], "skip");
        assert_eq!(json["reason"], "paths_not_matched");
    }
}

//! Static validation of workflow definitions.

use crate::pattern::{PatternKind, PatternList};
use crate::workflow::{EventFilter, PermissionLevel, WorkflowDefinition};
use crate::{Error, Result};

impl WorkflowDefinition {
    /// Validate the definition, reporting every problem found.
    pub fn validate(&self) -> Result<()> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::WorkflowValidation(issues))
        }
    }

    /// All validation problems, empty when the workflow is valid.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push("workflow name is empty".to_string());
        }

        if self.triggers.push.is_none() && self.triggers.pull_request.is_none() {
            issues.push("no triggers declared under `on`".to_string());
        }
        if let Some(filter) = &self.triggers.push {
            check_filter("push", filter, &mut issues);
        }
        if let Some(filter) = &self.triggers.pull_request {
            check_filter("pull_request", filter, &mut issues);
        }

        if let Some(concurrency) = &self.concurrency
            && concurrency.group.trim().is_empty()
        {
            issues.push("concurrency group is empty".to_string());
        }

        for (scope, level) in &self.permissions {
            if *level == PermissionLevel::Write {
                issues.push(format!(
                    "permission `{scope}: write` is not allowed, jobs only get read access"
                ));
            }
        }

        if self.jobs.is_empty() {
            issues.push("workflow has no jobs".to_string());
        }
        for (id, job) in &self.jobs {
            if job.steps.is_empty() {
                issues.push(format!("job `{id}` has no steps"));
            }
            if job.timeout_minutes == 0 {
                issues.push(format!("job `{id}` has a zero timeout"));
            }
            if let Some(image) = job.container_image()
                && image.trim().is_empty()
            {
                issues.push(format!("job `{id}` has an empty container image"));
            }
            for (index, step) in job.steps.iter().enumerate() {
                match (&step.run, &step.uses) {
                    (None, None) => issues.push(format!(
                        "job `{id}` step {} has neither `run` nor `uses`",
                        index + 1
                    )),
                    (Some(_), Some(_)) => issues.push(format!(
                        "job `{id}` step {} has both `run` and `uses`",
                        index + 1
                    )),
                    (Some(run), None) if run.trim().is_empty() => issues.push(format!(
                        "job `{id}` step {} has an empty `run` command",
                        index + 1
                    )),
                    _ => {}
                }
            }
        }

        issues
    }
}

fn check_filter(event: &str, filter: &EventFilter, issues: &mut Vec<String>) {
    if !filter.branches.is_empty() && !filter.branches_ignore.is_empty() {
        issues.push(format!(
            "{event}: `branches` and `branches-ignore` cannot both be set"
        ));
    }
    if !filter.paths.is_empty() && !filter.paths_ignore.is_empty() {
        issues.push(format!(
            "{event}: `paths` and `paths-ignore` cannot both be set"
        ));
    }

    let lists = [
        ("branches", &filter.branches, PatternKind::Branch),
        ("branches-ignore", &filter.branches_ignore, PatternKind::Branch),
        ("paths", &filter.paths, PatternKind::Path),
        ("paths-ignore", &filter.paths_ignore, PatternKind::Path),
    ];
    for (key, sources, kind) in lists {
        match PatternList::compile(sources, kind) {
            Ok(list) if list.only_negations() => issues.push(format!(
                "{event}: `{key}` needs at least one pattern that is not negated"
            )),
            Ok(_) => {}
            Err(e) => issues.push(format!("{event}: {e}")),
        }
    }
}

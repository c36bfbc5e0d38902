//! Run and execution types.

use crate::event::EventKind;
use crate::ids::RunId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Cancelled | RunStatus::Skipped
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Skipped)
    }

    /// Combine job statuses into a run status: any cancellation wins, then any failure.
    pub fn aggregate<I: IntoIterator<Item = RunStatus>>(statuses: I) -> RunStatus {
        let mut any = false;
        let mut failed = false;
        for status in statuses {
            any = true;
            match status {
                RunStatus::Cancelled => return RunStatus::Cancelled,
                RunStatus::Failure => failed = true,
                _ => {}
            }
        }
        match (any, failed) {
            (false, _) => RunStatus::Skipped,
            (true, true) => RunStatus::Failure,
            (true, false) => RunStatus::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    TimedOut,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Outcome of one job within a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub run_id: RunId,
    pub job_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub steps: Vec<StepReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl JobReport {
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failure | StepStatus::TimedOut))
    }
}

/// Outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub event: EventKind,
    pub git_ref: String,
    pub concurrency_group: Option<String>,
    pub status: RunStatus,
    pub jobs: Vec<JobReport>,
    pub queued_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

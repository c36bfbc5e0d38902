//! Concurrency group bookkeeping.
//!
//! Each group has at most one running run and at most one pending run.
//! The tracker is pure state; the scheduler acts on the decisions it returns.

use crossci_core::RunId;
use std::collections::HashMap;
use tracing::debug;

/// What the scheduler should do with a newly admitted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Start the run immediately. Otherwise it waits as the group's pending run.
    pub start_now: bool,
    /// Runs superseded by this admission, to be cancelled.
    pub cancelled: Vec<RunId>,
}

#[derive(Debug, Default)]
struct GroupState {
    running: Option<RunId>,
    pending: Option<RunId>,
}

#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    groups: HashMap<String, GroupState>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `run_id` into `group`.
    ///
    /// With `cancel_in_progress` the newest run replaces everything in the
    /// group and starts at once. Without it the newest run replaces only the
    /// pending one and waits for the running one to complete.
    pub fn admit(&mut self, group: &str, run_id: RunId, cancel_in_progress: bool) -> Admission {
        let state = self.groups.entry(group.to_string()).or_default();
        let mut cancelled = Vec::new();

        if let Some(pending) = state.pending.take() {
            cancelled.push(pending);
        }

        let start_now = if cancel_in_progress {
            if let Some(running) = state.running.replace(run_id) {
                cancelled.push(running);
            }
            true
        } else if state.running.is_none() {
            state.running = Some(run_id);
            true
        } else {
            state.pending = Some(run_id);
            false
        };

        debug!(
            group = %group,
            run_id = %run_id,
            start_now,
            superseded = cancelled.len(),
            "Admitted run to concurrency group"
        );

        Admission {
            start_now,
            cancelled,
        }
    }

    /// Mark `run_id` as finished and return the pending run to start next, if any.
    ///
    /// Completing a run that is no longer the group's running run (because it
    /// was superseded) leaves the group untouched.
    pub fn complete(&mut self, group: &str, run_id: RunId) -> Option<RunId> {
        let state = self.groups.get_mut(group)?;

        if state.pending == Some(run_id) {
            state.pending = None;
        }
        if state.running != Some(run_id) {
            return None;
        }

        state.running = state.pending.take();
        let next = state.running;
        if next.is_none() {
            self.groups.remove(group);
        }
        next
    }

    pub fn running(&self, group: &str) -> Option<RunId> {
        self.groups.get(group).and_then(|s| s.running)
    }

    pub fn pending(&self, group: &str) -> Option<RunId> {
        self.groups.get(group).and_then(|s| s.pending)
    }

    /// Number of groups with a running or pending run.
    pub fn active_groups(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "Cross-only compilation environment-refs/heads/master";

    #[test]
    fn test_first_run_starts_immediately() {
        let mut tracker = ConcurrencyTracker::new();
        let run = RunId::new();

        let admission = tracker.admit(GROUP, run, true);

        assert!(admission.start_now);
        assert!(admission.cancelled.is_empty());
        assert_eq!(tracker.running(GROUP), Some(run));
    }

    #[test]
    fn test_cancel_in_progress_supersedes_running() {
        let mut tracker = ConcurrencyTracker::new();
        let first = RunId::new();
        let second = RunId::new();

        tracker.admit(GROUP, first, true);
        let admission = tracker.admit(GROUP, second, true);

        assert!(admission.start_now);
        assert_eq!(admission.cancelled, vec![first]);
        assert_eq!(tracker.running(GROUP), Some(second));

        // The superseded run finishing must not disturb the new one.
        assert_eq!(tracker.complete(GROUP, first), None);
        assert_eq!(tracker.running(GROUP), Some(second));

        assert_eq!(tracker.complete(GROUP, second), None);
        assert_eq!(tracker.active_groups(), 0);
    }

    #[test]
    fn test_queue_without_cancel_in_progress() {
        let mut tracker = ConcurrencyTracker::new();
        let first = RunId::new();
        let second = RunId::new();
        let third = RunId::new();

        assert!(tracker.admit(GROUP, first, false).start_now);

        let admission = tracker.admit(GROUP, second, false);
        assert!(!admission.start_now);
        assert!(admission.cancelled.is_empty());
        assert_eq!(tracker.pending(GROUP), Some(second));

        // A newer pending run replaces the older pending one.
        let admission = tracker.admit(GROUP, third, false);
        assert!(!admission.start_now);
        assert_eq!(admission.cancelled, vec![second]);

        assert_eq!(tracker.complete(GROUP, first), Some(third));
        assert_eq!(tracker.running(GROUP), Some(third));
        assert_eq!(tracker.pending(GROUP), None);
    }

    #[test]
    fn test_cancel_in_progress_clears_pending() {
        let mut tracker = ConcurrencyTracker::new();
        let first = RunId::new();
        let second = RunId::new();
        let third = RunId::new();

        tracker.admit(GROUP, first, false);
        tracker.admit(GROUP, second, false);
        let admission = tracker.admit(GROUP, third, true);

        assert!(admission.start_now);
        assert_eq!(admission.cancelled, vec![second, first]);
        assert_eq!(tracker.running(GROUP), Some(third));
        assert_eq!(tracker.pending(GROUP), None);
    }

    #[test]
    fn test_groups_are_independent() {
        let mut tracker = ConcurrencyTracker::new();
        let master = RunId::new();
        let release = RunId::new();

        tracker.admit("wf-refs/heads/master", master, true);
        let admission = tracker.admit("wf-refs/heads/1.4", release, true);

        assert!(admission.start_now);
        assert!(admission.cancelled.is_empty());
        assert_eq!(tracker.active_groups(), 2);
    }

    #[test]
    fn test_complete_unknown_group() {
        let mut tracker = ConcurrencyTracker::new();
        assert_eq!(tracker.complete("nope", RunId::new()), None);
    }
}

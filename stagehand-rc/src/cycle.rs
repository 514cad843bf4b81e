//! Reconciliation cycle
//!
//! Explicit per-navigation state owned by the orchestrator and shared with
//! the task runners it spawns. Replaces any module-level "is processing"
//! flag: everything a runner needs to know about its cycle lives here.

use stagehand_common::events::CycleState;
use stagehand_common::PageType;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How a task's run within a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Applied,
    Satisfied,
    Exhausted,
    /// Discarded because the page moved on
    Stale,
}

/// Per-cycle counts of task outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTally {
    pub applied: usize,
    pub satisfied: usize,
    pub exhausted: usize,
    pub stale: usize,
}

#[derive(Debug, Default)]
struct CycleProgress {
    state: Option<CycleState>,
    attempts: HashMap<String, u32>,
    exhausted: HashSet<String>,
    tally: CycleTally,
}

/// State of one reconciliation cycle
#[derive(Debug)]
pub struct ReconciliationCycle {
    pub id: u64,
    /// Navigation generation the cycle was started for
    pub generation: u64,
    pub page_type: PageType,
    pub location: String,
    pub started_at: DateTime<Utc>,
    /// Entered from a DOM-settled rescan rather than a navigation
    pub rescan: bool,
    outstanding: AtomicUsize,
    progress: Mutex<CycleProgress>,
}

impl ReconciliationCycle {
    pub fn new(id: u64, generation: u64, page_type: PageType, location: &str, rescan: bool) -> Self {
        Self {
            id,
            generation,
            page_type,
            location: location.to_string(),
            started_at: stagehand_common::time::now(),
            rescan,
            outstanding: AtomicUsize::new(0),
            progress: Mutex::new(CycleProgress {
                state: Some(CycleState::Classifying),
                ..CycleProgress::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CycleProgress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CycleState {
        self.lock().state.unwrap_or(CycleState::Idle)
    }

    pub fn set_state(&self, state: CycleState) {
        self.lock().state = Some(state);
    }

    /// Still scheduling or running tasks
    pub fn is_processing(&self) -> bool {
        matches!(
            self.state(),
            CycleState::Classifying | CycleState::Scheduling | CycleState::Running
        )
    }

    pub fn is_settled(&self) -> bool {
        self.state() == CycleState::Settled
    }

    /// Count one more attempt for `task`; returns the new total
    pub fn record_attempt(&self, task: &str) -> u32 {
        let mut progress = self.lock();
        let count = progress.attempts.entry(task.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, task: &str) -> u32 {
        self.lock().attempts.get(task).copied().unwrap_or(0)
    }

    /// Exhausted tasks are not rescheduled within the same cycle
    pub fn is_exhausted(&self, task: &str) -> bool {
        self.lock().exhausted.contains(task)
    }

    /// Keep tasks exhausted in an earlier cycle of the same generation
    /// from running again in this one
    pub fn carry_exhausted_from(&self, earlier: &ReconciliationCycle) {
        let carried = earlier.lock().exhausted.clone();
        self.lock().exhausted.extend(carried);
    }

    /// Register `count` more tasks that must finish before the cycle settles
    pub fn begin_tasks(&self, count: usize) {
        self.outstanding.fetch_add(count, Ordering::SeqCst);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Record a finished task; returns true if it was the last outstanding one
    pub fn finish_task(&self, task: &str, outcome: TaskOutcome) -> bool {
        {
            let mut progress = self.lock();
            match outcome {
                TaskOutcome::Applied => progress.tally.applied += 1,
                TaskOutcome::Satisfied => progress.tally.satisfied += 1,
                TaskOutcome::Exhausted => {
                    progress.tally.exhausted += 1;
                    progress.exhausted.insert(task.to_string());
                }
                TaskOutcome::Stale => progress.tally.stale += 1,
            }
        }
        let previous = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous == 1
    }

    pub fn tally(&self) -> CycleTally {
        self.lock().tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_counters_are_per_task() {
        let cycle = ReconciliationCycle::new(1, 1, PageType::Edit, "/x/edit", false);
        assert_eq!(cycle.record_attempt("a"), 1);
        assert_eq!(cycle.record_attempt("a"), 2);
        assert_eq!(cycle.record_attempt("b"), 1);
        assert_eq!(cycle.attempts("a"), 2);
        assert_eq!(cycle.attempts("c"), 0);
    }

    #[test]
    fn test_settles_when_last_task_finishes() {
        let cycle = ReconciliationCycle::new(1, 1, PageType::Track, "/track/1", false);
        assert!(cycle.is_processing());
        cycle.begin_tasks(2);
        assert!(!cycle.finish_task("a", TaskOutcome::Applied));
        cycle.begin_tasks(1);
        assert!(!cycle.finish_task("b", TaskOutcome::Exhausted));
        assert!(cycle.finish_task("c", TaskOutcome::Satisfied));

        assert!(cycle.is_exhausted("b"));
        assert!(!cycle.is_exhausted("a"));
        assert_eq!(
            cycle.tally(),
            CycleTally {
                applied: 1,
                satisfied: 1,
                exhausted: 1,
                stale: 0
            }
        );
        let rescan = ReconciliationCycle::new(2, 1, PageType::Track, "/track/1", true);
        rescan.carry_exhausted_from(&cycle);
        assert!(rescan.is_exhausted("b"));
        assert_eq!(rescan.tally(), CycleTally::default());

        // Extra finishes never underflow
        assert!(!cycle.finish_task("d", TaskOutcome::Stale));
        assert_eq!(cycle.outstanding(), 0);
    }
}

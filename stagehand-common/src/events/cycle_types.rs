//! Reconciliation cycle and task outcome types

use serde::{Deserialize, Serialize};

/// Orchestrator state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Waiting for navigation or DOM changes
    Idle,
    /// Computing the page type of a new location
    Classifying,
    /// Selecting tasks for the page type
    Scheduling,
    /// Tasks are being attempted
    Running,
    /// Every scheduled task succeeded or exhausted its attempts
    Settled,
}

/// Why a task stopped trying within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum ExhaustionReason {
    /// `prerequisites_ready` never returned true
    PrerequisitesNotReady,
    /// `apply` (or committing its patch) kept failing
    ApplyFailed(String),
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::JobCategory;

/// Phases of a single run.
///
/// `Idle -> LockAcquired -> PreflightRunning -> {PreflightFailed | PreflightPassed}
/// -> {DryRunReturned | Executing} -> {Succeeded | Failed}`, and every state
/// after `Idle` ends in `LockReleased`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    LockAcquired,
    PreflightRunning,
    PreflightFailed,
    PreflightPassed,
    DryRunReturned,
    Executing,
    Succeeded,
    Failed,
    LockReleased,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, LockAcquired) => true,
            (LockAcquired, PreflightRunning) => true,
            (PreflightRunning, PreflightFailed | PreflightPassed) => true,
            (PreflightPassed, DryRunReturned | Executing) => true,
            (Executing, Succeeded | Failed) => true,
            (Idle | LockReleased, _) => false,
            (_, LockReleased) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::PreflightFailed
                | RunState::DryRunReturned
                | RunState::Succeeded
                | RunState::Failed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "IDLE",
            RunState::LockAcquired => "LOCK_ACQUIRED",
            RunState::PreflightRunning => "PREFLIGHT_RUNNING",
            RunState::PreflightFailed => "PREFLIGHT_FAILED",
            RunState::PreflightPassed => "PREFLIGHT_PASSED",
            RunState::DryRunReturned => "DRY_RUN_RETURNED",
            RunState::Executing => "EXECUTING",
            RunState::Succeeded => "SUCCEEDED",
            RunState::Failed => "FAILED",
            RunState::LockReleased => "LOCK_RELEASED",
        };
        f.write_str(name)
    }
}

/// Per-run bookkeeping threaded through the runner instead of globals.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub category: JobCategory,
    pub state: RunState,
    pub history: Vec<RunState>,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(category: JobCategory) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            category,
            state: RunState::Idle,
            history: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Move to `next`, recording the state being left.
    pub fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal run transition {} -> {next}",
            self.state
        );
        self.history.push(self.state);
        self.state = next;
    }

    /// Every state visited so far, current one included.
    pub fn transitions(&self) -> Vec<RunState> {
        let mut all = self.history.clone();
        all.push(self.state);
        all
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

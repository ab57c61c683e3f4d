//! Per-run shared state threaded through both orchestrators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::{ExecutionResult, Task, Termination, UsageTotals};

/// A task that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub id: u64,
    pub title: String,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Default)]
struct Ledger {
    totals: UsageTotals,
    completed: Vec<String>,
    failed: Vec<FailedTask>,
    branches: Vec<String>,
    notes: Vec<String>,
}

pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    max_iterations: u32,
    iteration: AtomicU32,
    clock: Instant,
    ledger: Mutex<Ledger>,
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub termination: Termination,
    pub iterations: u32,
    pub elapsed_secs: u64,
    pub totals: UsageTotals,
    pub completed: Vec<String>,
    pub failed: Vec<FailedTask>,
    pub branches: Vec<String>,
    pub notes: Vec<String>,
}

impl RunContext {
    /// `max_iterations == 0` means unlimited.
    pub fn new(max_iterations: u32, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            cancel,
            max_iterations,
            iteration: AtomicU32::new(0),
            clock: Instant::now(),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn iterations(&self) -> u32 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// Iterations still allowed, `None` when unlimited.
    pub fn remaining_iterations(&self) -> Option<u32> {
        (self.max_iterations > 0).then(|| self.max_iterations.saturating_sub(self.iterations()))
    }

    pub fn limit_reached(&self) -> bool {
        self.remaining_iterations() == Some(0)
    }

    /// Claim the next iteration number (1-based), or `None` once the limit
    /// is spent.
    pub fn next_iteration(&self) -> Option<u32> {
        self.iteration
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (self.max_iterations == 0 || n < self.max_iterations).then_some(n + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    pub fn record_success(&self, task: &Task, result: &ExecutionResult, branch: Option<String>) {
        let mut ledger = self.ledger();
        ledger.totals.add(result);
        ledger.completed.push(task.title.clone());
        if let Some(branch) = branch {
            ledger.branches.push(branch);
        }
    }

    pub fn record_failure(&self, task: &Task, attempts: u32, error: impl Into<String>) {
        self.ledger().failed.push(FailedTask {
            id: task.id,
            title: task.title.clone(),
            attempts,
            error: error.into(),
        });
    }

    /// Branch that outlived its task (failed runs keep theirs).
    pub fn record_branch(&self, branch: impl Into<String>) {
        self.ledger().branches.push(branch.into());
    }

    pub fn add_note(&self, note: impl Into<String>) {
        self.ledger().notes.push(note.into());
    }

    pub fn totals(&self) -> UsageTotals {
        self.ledger().totals
    }

    pub fn summary(&self, termination: Termination) -> RunSummary {
        let ledger = self.ledger();
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            termination,
            iterations: self.iterations(),
            elapsed_secs: self.clock.elapsed().as_secs(),
            totals: ledger.totals,
            completed: ledger.completed.clone(),
            failed: ledger.failed.clone(),
            branches: ledger.branches.clone(),
            notes: ledger.notes.clone(),
        }
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::enums::{RunStatus, Step};
use super::task::Task;

/// Structured outcome of one agent invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub response_text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Running token and cost totals for a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn add(&mut self, result: &ExecutionResult) {
        self.input_tokens += result.input_tokens;
        self.output_tokens += result.output_tokens;
        self.cost += result.cost;
    }
}

/// Per-slot state of one task's execution in the parallel scheduler
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub agent_index: usize,
    pub task: Task,
    pub worktree: Option<PathBuf>,
    pub branch_name: Option<String>,
    status: RunStatus,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub log_buffer: Vec<String>,
    pub step: Step,
    pub attempts: u32,
    pub error: Option<String>,
}

impl AgentRun {
    pub fn new(agent_index: usize, task: Task) -> Self {
        Self {
            agent_index,
            task,
            worktree: None,
            branch_name: None,
            status: RunStatus::Waiting,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            log_buffer: Vec::new(),
            step: Step::default(),
            attempts: 0,
            error: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Move to `next`. Back-transitions and changes out of a terminal state
    /// are rejected and leave the status untouched.
    pub fn advance(&mut self, next: RunStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            warn!(
                agent = self.agent_index,
                from = %self.status,
                to = %next,
                "Rejected run status transition"
            );
            false
        }
    }

    pub fn record_usage(&mut self, result: &ExecutionResult) {
        self.input_tokens = result.input_tokens;
        self.output_tokens = result.output_tokens;
        self.cost = result.cost;
    }
}

//! Parallel batch scheduler.
//!
//! Pending tasks are split into positional batches of at most
//! `max_parallel`. Each task in a batch runs in its own worktree on its own
//! branch; workers report progress over an mpsc channel and the scheduler
//! folds those events into a status map. Task completion is recorded only
//! after the whole batch has settled.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::is_interrupted;
use crate::git;
use crate::invoker::{AgentInvoker, LineCallback};
use crate::output_parser::next_step;
use crate::progress::ProgressDisplay;
use crate::prompt::PromptBuilder;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::run_context::RunContext;
use crate::task_source::TaskSource;
use crate::types::{plan_batches, AgentRun, ExecutionResult, RunStatus, Step, Task, Termination};
use crate::worktree::WorktreeManager;

/// Lines of agent output kept per slot for failure reports.
const LOG_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub max_parallel: usize,
    pub base_branch: String,
    pub create_pr: bool,
    pub draft_pr: bool,
    pub poll_interval: Duration,
    pub prompt: PromptBuilder,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            base_branch: "main".to_string(),
            create_pr: false,
            draft_pr: false,
            poll_interval: Duration::from_millis(300),
            prompt: PromptBuilder::default(),
        }
    }
}

/// How a slot's task ended
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Completed {
        result: ExecutionResult,
        attempts: u32,
        pr_url: Option<String>,
    },
    Failed {
        attempts: u32,
        error: String,
    },
    DryRun {
        prompt: String,
    },
    Interrupted,
}

impl SlotOutcome {
    fn status(&self) -> RunStatus {
        match self {
            SlotOutcome::Completed { .. } | SlotOutcome::DryRun { .. } => RunStatus::Done,
            SlotOutcome::Failed { .. } | SlotOutcome::Interrupted => RunStatus::Failed,
        }
    }
}

/// Worker → scheduler messages
#[derive(Debug)]
pub enum SlotEvent {
    Status {
        slot: usize,
        status: RunStatus,
    },
    Workspace {
        slot: usize,
        directory: PathBuf,
        branch: String,
    },
    Step {
        slot: usize,
        step: Step,
    },
    Output {
        slot: usize,
        line: String,
    },
    Finished {
        slot: usize,
        outcome: SlotOutcome,
    },
}

/// Settled state of one batch
#[derive(Debug)]
pub struct BatchReport {
    pub runs: Vec<AgentRun>,
    pub outcomes: Vec<SlotOutcome>,
    /// Highest number of simultaneously active slots observed.
    pub peak_active: usize,
}

struct Shared {
    invoker: Arc<dyn AgentInvoker>,
    worktrees: Arc<WorktreeManager>,
    policy: RetryPolicy,
    options: ParallelOptions,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

pub struct ParallelScheduler {
    shared: Arc<Shared>,
}

impl ParallelScheduler {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        worktrees: Arc<WorktreeManager>,
        policy: RetryPolicy,
        options: ParallelOptions,
        cancel: CancellationToken,
    ) -> Self {
        let max_parallel = options.max_parallel.max(1);
        Self {
            shared: Arc::new(Shared {
                invoker,
                worktrees,
                policy,
                options,
                cancel,
                permits: Arc::new(Semaphore::new(max_parallel)),
            }),
        }
    }

    /// Run batches until nothing launchable remains. Worktrees under the
    /// run's base directory are swept before returning, whatever the outcome.
    pub async fn run(
        &self,
        source: &mut dyn TaskSource,
        ctx: &RunContext,
        display: &ProgressDisplay,
    ) -> Result<Termination> {
        let termination = self.schedule(source, ctx, display).await;
        self.shared.worktrees.cleanup_all().await;
        termination
    }

    async fn schedule(
        &self,
        source: &mut dyn TaskSource,
        ctx: &RunContext,
        display: &ProgressDisplay,
    ) -> Result<Termination> {
        let max_parallel = self.shared.options.max_parallel.max(1);
        let mut tried: HashSet<u64> = HashSet::new();
        let mut next_agent = 1usize;
        let mut first = true;

        loop {
            if ctx.is_cancelled() {
                return Ok(Termination::Interrupted);
            }

            let mut pending: Vec<Task> = source
                .all_pending()?
                .into_iter()
                .filter(|t| !tried.contains(&t.id))
                .collect();
            if pending.is_empty() {
                return Ok(if first {
                    Termination::NoTasks
                } else {
                    Termination::AllComplete
                });
            }
            first = false;

            if let Some(remaining) = ctx.remaining_iterations() {
                if remaining == 0 {
                    return Ok(Termination::MaxIterations);
                }
                pending.truncate(remaining as usize);
            }

            let plan = plan_batches(&pending, max_parallel);
            info!(
                tasks = pending.len(),
                batches = plan.len(),
                sizes = ?plan.sizes(),
                "Planned batches"
            );

            let total = plan.len();
            for (number, batch) in plan.batches.into_iter().enumerate() {
                if ctx.is_cancelled() {
                    return Ok(Termination::Interrupted);
                }
                for _ in &batch {
                    ctx.next_iteration();
                }
                display.println(
                    format!("Batch {}/{}: {} task(s)", number + 1, total, batch.len())
                        .bold()
                        .to_string(),
                );

                let first_index = next_agent;
                next_agent += batch.len();
                let report = self.run_batch(batch, first_index, number + 1, total, display).await;

                self.settle(source, ctx, display, report, &mut tried)?;
            }
        }
    }

    /// Post-batch bookkeeping: mark each completed task exactly once and
    /// record usage, branches and failures.
    fn settle(
        &self,
        source: &mut dyn TaskSource,
        ctx: &RunContext,
        display: &ProgressDisplay,
        report: BatchReport,
        tried: &mut HashSet<u64>,
    ) -> Result<()> {
        let mut marked: HashSet<u64> = HashSet::new();
        for (run, outcome) in report.runs.iter().zip(report.outcomes) {
            tried.insert(run.task.id);
            match outcome {
                SlotOutcome::Completed {
                    result,
                    attempts,
                    pr_url,
                } => {
                    if marked.insert(run.task.id) {
                        source.mark_complete(run.task.id).with_context(|| {
                            format!("failed to mark task {} complete", run.task.id)
                        })?;
                        ctx.record_success(&run.task, &result, run.branch_name.clone());
                    }
                    debug!(agent = run.agent_index, attempts, "Slot done");
                    display.println(format!("  ✓ {}", run.task.title).green().to_string());
                    if let Some(url) = pr_url {
                        display.println(format!("    PR: {url}"));
                    }
                }
                SlotOutcome::Failed { attempts, error } => {
                    warn!(
                        agent = run.agent_index,
                        task_id = run.task.id,
                        attempts,
                        error = %error,
                        "Task failed"
                    );
                    display.println(
                        format!("  ✗ {} ({attempts} attempts): {error}", run.task.title)
                            .red()
                            .to_string(),
                    );
                    if let Some(tail) = run.log_buffer.last() {
                        display.println(format!("    last output: {tail}").dimmed().to_string());
                    }
                    ctx.record_failure(&run.task, attempts, error);
                    if let Some(ref branch) = run.branch_name {
                        ctx.record_branch(branch.clone());
                    }
                }
                SlotOutcome::DryRun { prompt } => {
                    display.println(
                        format!("  (dry run) agent {}:", run.agent_index)
                            .dimmed()
                            .to_string(),
                    );
                    display.println(prompt);
                }
                SlotOutcome::Interrupted => {
                    debug!(agent = run.agent_index, "Slot interrupted");
                }
            }
        }
        Ok(())
    }

    /// Launch every task of `batch` concurrently and wait until all slots
    /// are terminal.
    pub async fn run_batch(
        &self,
        batch: Vec<Task>,
        first_index: usize,
        number: usize,
        total: usize,
        display: &ProgressDisplay,
    ) -> BatchReport {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runs: Vec<AgentRun> = batch
            .into_iter()
            .enumerate()
            .map(|(i, task)| AgentRun::new(first_index + i, task))
            .collect();
        let mut outcomes: Vec<Option<SlotOutcome>> = vec![None; runs.len()];

        let mut workers = JoinSet::new();
        for run in &runs {
            workers.spawn(run_slot(
                Arc::clone(&self.shared),
                run.agent_index,
                run.task.clone(),
                tx.clone(),
            ));
        }
        drop(tx);

        let mut ticker = tokio::time::interval(self.shared.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut peak_active = 0usize;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        apply_event(&mut runs, &mut outcomes, first_index, event);
                        let active = runs.iter().filter(|r| r.status().is_active()).count();
                        peak_active = peak_active.max(active);
                    }
                    None => break,
                },
                _ = ticker.tick() => display.set_batch(number, total, &runs),
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        let outcomes = runs
            .iter_mut()
            .zip(outcomes)
            .map(|(run, outcome)| {
                outcome.unwrap_or_else(|| {
                    let outcome = SlotOutcome::Failed {
                        attempts: run.attempts,
                        error: "worker exited without reporting".to_string(),
                    };
                    run.advance(outcome.status());
                    outcome
                })
            })
            .collect();
        display.set_batch(number, total, &runs);

        BatchReport {
            runs,
            outcomes,
            peak_active,
        }
    }
}

fn apply_event(
    runs: &mut [AgentRun],
    outcomes: &mut [Option<SlotOutcome>],
    first_index: usize,
    event: SlotEvent,
) {
    let slot = match &event {
        SlotEvent::Status { slot, .. }
        | SlotEvent::Workspace { slot, .. }
        | SlotEvent::Step { slot, .. }
        | SlotEvent::Output { slot, .. }
        | SlotEvent::Finished { slot, .. } => *slot,
    };
    let Some(position) = slot.checked_sub(first_index).filter(|p| *p < runs.len()) else {
        warn!(slot, "Event for unknown slot");
        return;
    };
    let run = &mut runs[position];

    match event {
        SlotEvent::Status { status, .. } => {
            run.advance(status);
        }
        SlotEvent::Workspace {
            directory, branch, ..
        } => {
            run.worktree = Some(directory);
            run.branch_name = Some(branch);
        }
        SlotEvent::Step { step, .. } => run.step = step,
        SlotEvent::Output { line, .. } => {
            if run.log_buffer.len() >= LOG_TAIL {
                run.log_buffer.remove(0);
            }
            run.log_buffer.push(line);
        }
        SlotEvent::Finished { outcome, .. } => {
            match &outcome {
                SlotOutcome::Completed {
                    result, attempts, ..
                } => {
                    run.record_usage(result);
                    run.attempts = *attempts;
                }
                SlotOutcome::Failed { attempts, error } => {
                    run.attempts = *attempts;
                    run.error = Some(error.clone());
                }
                SlotOutcome::DryRun { .. } | SlotOutcome::Interrupted => {}
            }
            run.advance(outcome.status());
            outcomes[position] = Some(outcome);
        }
    }
}

fn slot_callback(slot: usize, events: mpsc::UnboundedSender<SlotEvent>) -> LineCallback {
    let step = Mutex::new(Step::default());
    Arc::new(move |line: &str| {
        let mut current = step.lock().unwrap_or_else(|e| e.into_inner());
        let next = next_step(*current, line);
        if next != *current {
            *current = next;
            let _ = events.send(SlotEvent::Step { slot, step: next });
        }
        let _ = events.send(SlotEvent::Output {
            slot,
            line: line.to_string(),
        });
    })
}

/// One worker: acquire a permit, set up the worktree, run the agent with
/// retries, optionally publish, release, report.
async fn run_slot(
    shared: Arc<Shared>,
    slot: usize,
    task: Task,
    events: mpsc::UnboundedSender<SlotEvent>,
) {
    let outcome = match Arc::clone(&shared.permits).acquire_owned().await {
        Ok(_permit) => {
            let _ = events.send(SlotEvent::Status {
                slot,
                status: RunStatus::SettingUp,
            });
            execute_slot(&shared, slot, &task, &events).await
        }
        Err(e) => SlotOutcome::Failed {
            attempts: 0,
            error: format!("scheduler closed: {e}"),
        },
    };
    let _ = events.send(SlotEvent::Finished { slot, outcome });
}

async fn execute_slot(
    shared: &Shared,
    slot: usize,
    task: &Task,
    events: &mpsc::UnboundedSender<SlotEvent>,
) -> SlotOutcome {
    let options = &shared.options;
    // Dry runs touch neither branches nor the worktree registry.
    if shared.policy.dry_run {
        return SlotOutcome::DryRun {
            prompt: options.prompt.build(task),
        };
    }

    let worked = shared
        .worktrees
        .with_worktree(task, slot, &options.base_branch, |handle| async move {
            let _ = events.send(SlotEvent::Workspace {
                slot,
                directory: handle.directory.clone(),
                branch: handle.branch_name.clone(),
            });
            let _ = events.send(SlotEvent::Status {
                slot,
                status: RunStatus::Running,
            });

            let prompt = options.prompt.build(task);
            let outcome = shared
                .policy
                .controller(shared.invoker.as_ref())
                .run(
                    &prompt,
                    &handle.directory,
                    Some(slot_callback(slot, events.clone())),
                    &shared.cancel,
                )
                .await;

            match outcome {
                Ok(RetryOutcome::Succeeded { result, attempts }) => {
                    let pr_url = if options.create_pr {
                        match git::publish_branch(
                            &handle.directory,
                            &handle.branch_name,
                            &handle.base_branch,
                            &task.title,
                            true,
                            options.draft_pr,
                        )
                        .await
                        {
                            Ok(url) => url,
                            Err(e) => {
                                warn!(agent = slot, error = %e, "Failed to publish branch");
                                None
                            }
                        }
                    } else {
                        None
                    };
                    SlotOutcome::Completed {
                        result,
                        attempts,
                        pr_url,
                    }
                }
                Ok(RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                }) => SlotOutcome::Failed {
                    attempts,
                    error: last_error,
                },
                Ok(RetryOutcome::DryRun { prompt }) => SlotOutcome::DryRun { prompt },
                Err(e) if is_interrupted(&e) => SlotOutcome::Interrupted,
                Err(e) => SlotOutcome::Failed {
                    attempts: 0,
                    error: format!("{e:#}"),
                },
            }
        })
        .await;

    match worked {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(agent = slot, task_id = task.id, error = %e, "Workspace setup failed");
            SlotOutcome::Failed {
                attempts: 0,
                error: format!("{e:#}"),
            }
        }
    }
}

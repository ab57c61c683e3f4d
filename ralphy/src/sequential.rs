//! Sequential orchestrator: one task at a time in the main checkout.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{info, warn};

use crate::error::{is_interrupted, OrchestratorError};
use crate::git::{self, slugify};
use crate::invoker::LineCallback;
use crate::output_parser::{has_completion_marker, next_step};
use crate::progress::ProgressDisplay;
use crate::prompt::PromptBuilder;
use crate::retry::{RetryController, RetryOutcome};
use crate::run_context::RunContext;
use crate::task_source::TaskSource;
use crate::types::{Step, Task, Termination};
use crate::worktree::BRANCH_PREFIX;

#[derive(Debug, Clone, Default)]
pub struct SequentialOptions {
    pub repo_dir: PathBuf,
    pub base_branch: String,
    pub branch_per_task: bool,
    pub create_pr: bool,
    pub draft_pr: bool,
    pub delay: Duration,
    pub prompt: PromptBuilder,
}

/// `ralphy/{slug}`
pub fn task_branch_name(task: &Task) -> String {
    let slug = slugify(&task.title);
    if slug.is_empty() {
        format!("{BRANCH_PREFIX}/task-{}", task.id)
    } else {
        format!("{BRANCH_PREFIX}/{slug}")
    }
}

/// First pending task that has not already been tried in this run.
fn next_launchable(source: &dyn TaskSource, tried: &HashSet<u64>) -> Result<Option<Task>> {
    if tried.is_empty() {
        return source.next_task();
    }
    Ok(source
        .all_pending()?
        .into_iter()
        .find(|t| !tried.contains(&t.id)))
}

fn step_callback(display: &ProgressDisplay, title: &str) -> LineCallback {
    let display = display.clone();
    let title = title.to_string();
    let step = Mutex::new(Step::default());
    Arc::new(move |line: &str| {
        let mut current = step.lock().unwrap_or_else(|e| e.into_inner());
        let next = next_step(*current, line);
        if next != *current {
            *current = next;
            display.set_step(&title, next);
        }
    })
}

async fn return_to_base(dir: &Path, base: &str) {
    if let Err(e) = git::checkout(dir, base).await {
        warn!(base = %base, error = %e, "Failed to return to base branch");
    }
}

/// Run tasks one after another until the source is drained, the iteration
/// cap is hit, the agent signals completion, or the run is cancelled.
///
/// A task that exhausts its retries stays pending but is not picked again
/// in the same run.
pub async fn run_sequential(
    source: &mut dyn TaskSource,
    retry: &RetryController<'_>,
    ctx: &RunContext,
    opts: &SequentialOptions,
    display: &ProgressDisplay,
) -> Result<Termination> {
    let mut tried: HashSet<u64> = HashSet::new();
    let mut first = true;

    loop {
        if ctx.is_cancelled() {
            return Ok(Termination::Interrupted);
        }

        let Some(task) = next_launchable(&*source, &tried)? else {
            return Ok(if first {
                Termination::NoTasks
            } else {
                Termination::AllComplete
            });
        };
        first = false;

        let Some(iteration) = ctx.next_iteration() else {
            return Ok(Termination::MaxIterations);
        };
        tried.insert(task.id);
        info!(iteration, task_id = task.id, title = %task.title, "Starting task");
        display.println(format!("[{iteration}] {}", task.title).bold().to_string());

        // Dry runs never create or reset task branches.
        let branch = if opts.branch_per_task && !retry.is_dry_run() {
            let name = task_branch_name(&task);
            if let Err(e) =
                git::switch_to_task_branch(&opts.repo_dir, &name, &opts.base_branch).await
            {
                let error =
                    OrchestratorError::workspace(&opts.repo_dir, format!("{e:#}")).to_string();
                warn!(task_id = task.id, branch = %name, error = %error, "Branch setup failed");
                display.println(
                    format!("  ✗ {} (branch setup): {error}", task.title)
                        .red()
                        .to_string(),
                );
                ctx.record_failure(&task, 0, error);
                continue;
            }
            Some(name)
        } else {
            None
        };

        let prompt = opts.prompt.build(&task);
        let outcome = match retry
            .run(
                &prompt,
                &opts.repo_dir,
                Some(step_callback(display, &task.title)),
                &ctx.cancel,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if is_interrupted(&e) => {
                if branch.is_some() {
                    return_to_base(&opts.repo_dir, &opts.base_branch).await;
                }
                return Ok(Termination::Interrupted);
            }
            Err(e) => return Err(e),
        };

        let mut finished = false;
        match outcome {
            RetryOutcome::Succeeded { result, attempts } => {
                source
                    .mark_complete(task.id)
                    .with_context(|| format!("failed to mark task {} complete", task.id))?;
                ctx.record_success(&task, &result, branch.clone());
                info!(task_id = task.id, attempts, "Task completed");
                display.println(format!("  ✓ {}", task.title).green().to_string());

                if let Some(ref name) = branch {
                    if opts.create_pr {
                        match git::publish_branch(
                            &opts.repo_dir,
                            name,
                            &opts.base_branch,
                            &task.title,
                            true,
                            opts.draft_pr,
                        )
                        .await
                        {
                            Ok(Some(url)) => display.println(format!("  PR: {url}")),
                            Ok(None) => {}
                            Err(e) => {
                                warn!(branch = %name, error = %e, "Failed to publish branch");
                                display.println(
                                    format!("  ⚠ PR creation failed: {e}").yellow().to_string(),
                                );
                            }
                        }
                    }
                }

                if has_completion_marker(&result.response_text) {
                    let remaining = source.count_remaining()?;
                    if remaining > 0 {
                        warn!(remaining, "Completion marker seen with tasks still pending");
                        ctx.add_note(format!(
                            "agent signalled completion with {remaining} task(s) still pending"
                        ));
                    }
                    finished = true;
                }
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(task_id = task.id, attempts, error = %last_error, "Task failed");
                display.println(
                    format!("  ✗ {} ({attempts} attempts): {last_error}", task.title)
                        .red()
                        .to_string(),
                );
                ctx.record_failure(&task, attempts, last_error);
                if let Some(ref name) = branch {
                    ctx.record_branch(name.clone());
                }
            }
            RetryOutcome::DryRun { prompt } => {
                display.println("  (dry run) prompt:".dimmed().to_string());
                display.println(prompt);
            }
        }

        if branch.is_some() {
            return_to_base(&opts.repo_dir, &opts.base_branch).await;
        }
        if finished {
            return Ok(Termination::AllComplete);
        }

        if !opts.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(Termination::Interrupted),
                _ = tokio::time::sleep(opts.delay) => {}
            }
        }
    }
}

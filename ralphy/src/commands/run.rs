//! Run command - drive the task queue to completion

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{load_config, validate_config};
use crate::error::OrchestratorError;
use crate::git;
use crate::invoker::CliAgentInvoker;
use crate::parallel::{ParallelOptions, ParallelScheduler};
use crate::progress::{print_summary, ProgressDisplay};
use crate::prompt::PromptBuilder;
use crate::retry::RetryPolicy;
use crate::run_context::RunContext;
use crate::sequential::{run_sequential, SequentialOptions};
use crate::task_source::open_source;
use crate::types::{AgentRuntime, RalphyConfig, SourceKind, Termination};
use crate::worktree::WorktreeManager;

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Run tasks in parallel, each in its own worktree
    #[arg(long)]
    pub parallel: bool,

    /// Max concurrent agents in parallel mode
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<u32>,

    /// Stop after N tasks (0 = unlimited)
    #[arg(short = 'n', long, value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Attempts per task before giving up
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long, value_name = "SECONDS")]
    pub retry_delay: Option<u64>,

    /// Seconds to wait between sequential iterations
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<u64>,

    /// Markdown checkbox task file
    #[arg(long, value_name = "FILE", conflicts_with_all = ["yaml", "github"])]
    pub prd: Option<String>,

    /// YAML task file
    #[arg(long, value_name = "FILE", conflicts_with = "github")]
    pub yaml: Option<String>,

    /// Take tasks from open GitHub issues
    #[arg(long, value_name = "OWNER/REPO")]
    pub github: Option<String>,

    /// Only issues carrying this label
    #[arg(long, value_name = "LABEL")]
    pub github_label: Option<String>,

    /// Give every task its own branch
    #[arg(long)]
    pub branch_per_task: bool,

    /// Branch that task branches start from
    #[arg(long, value_name = "BRANCH")]
    pub base_branch: Option<String>,

    /// Push task branches and open pull requests
    #[arg(long)]
    pub create_pr: bool,

    /// Open pull requests as drafts
    #[arg(long)]
    pub draft_pr: bool,

    /// Print prompts without invoking the agent
    #[arg(long)]
    pub dry_run: bool,

    /// Agent engine: claude, opencode, cursor or codex
    #[arg(long, value_name = "ENGINE")]
    pub engine: Option<AgentRuntime>,

    /// Model passed to the agent
    #[arg(short, long)]
    pub model: Option<String>,

    /// Tell the agent not to write tests
    #[arg(long)]
    pub skip_tests: bool,

    /// Tell the agent not to run the linter
    #[arg(long)]
    pub skip_lint: bool,
}

impl RunArgs {
    /// Layer command-line flags over file and environment configuration.
    pub fn apply(&self, config: &mut RalphyConfig) {
        let exec = &mut config.execution;
        exec.parallel |= self.parallel;
        exec.branch_per_task |= self.branch_per_task;
        exec.create_pr |= self.create_pr;
        exec.draft_pr |= self.draft_pr;
        exec.dry_run |= self.dry_run;
        exec.skip_tests |= self.skip_tests;
        exec.skip_lint |= self.skip_lint;

        if let Some(n) = self.max_parallel {
            exec.max_parallel = n;
        }
        if let Some(n) = self.max_iterations {
            exec.max_iterations = n;
        }
        if let Some(n) = self.max_retries {
            exec.max_retries = n;
        }
        if let Some(s) = self.retry_delay {
            exec.retry_delay_seconds = s;
        }
        if let Some(s) = self.delay {
            exec.delay_seconds = s;
        }
        if let Some(ref b) = self.base_branch {
            exec.base_branch = Some(b.clone());
        }
        if let Some(ref m) = self.model {
            exec.model = Some(m.clone());
        }
        if let Some(engine) = self.engine {
            config.runtime = engine;
        }

        let source = &mut config.source;
        if let Some(ref file) = self.prd {
            source.kind = SourceKind::Markdown;
            source.path = Some(file.clone());
        } else if let Some(ref file) = self.yaml {
            source.kind = SourceKind::Yaml;
            source.path = Some(file.clone());
        } else if let Some(ref repo) = self.github {
            source.kind = SourceKind::Github;
            source.github_repo = Some(repo.clone());
        }
        if let Some(ref label) = self.github_label {
            source.github_label = Some(label.clone());
        }
    }
}

/// Tools the configured run cannot start without.
pub fn required_tools(config: &RalphyConfig) -> Vec<(&'static str, &'static str)> {
    let mut tools = vec![("git", "Install git for your platform")];
    if !config.execution.dry_run {
        tools.push((config.runtime.binary(), install_hint(config.runtime)));
    }
    if config.source.kind == SourceKind::Github || config.execution.create_pr {
        tools.push(("gh", "Install the GitHub CLI: https://cli.github.com"));
    }
    tools
}

pub fn install_hint(runtime: AgentRuntime) -> &'static str {
    match runtime {
        AgentRuntime::Claude => "Install: npm install -g @anthropic-ai/claude-code",
        AgentRuntime::Opencode => "Install opencode and ensure it is available in PATH",
        AgentRuntime::Cursor => "Install the Cursor agent CLI (cursor-agent)",
        AgentRuntime::Codex => "Install: npm install -g @openai/codex",
    }
}

fn check_environment(config: &RalphyConfig) -> Result<(), OrchestratorError> {
    for (tool, hint) in required_tools(config) {
        if which::which(tool).is_err() {
            return Err(OrchestratorError::Environment {
                tool: tool.to_string(),
                hint: hint.to_string(),
            });
        }
    }
    Ok(())
}

/// Entry point. Returns the process exit code for the run's termination.
pub fn run(args: &RunArgs, interactive: bool) -> Result<i32> {
    let rt = tokio::runtime::Runtime::new()?;
    let termination = rt.block_on(execute(args, interactive))?;
    Ok(termination.exit_code())
}

async fn execute(args: &RunArgs, interactive: bool) -> Result<Termination> {
    let cwd = std::env::current_dir()?;
    let mut config = load_config(Some(&cwd))?;
    args.apply(&mut config);
    validate_config(&config)?;
    check_environment(&config)?;

    let repo_root = git::get_git_repo_root(&cwd)
        .await
        .map_err(|e| OrchestratorError::workspace(&cwd, format!("not a git repository: {e:#}")))?;
    let mut source = open_source(&config.source, &repo_root)?;

    let base_branch = match config.execution.base_branch.clone() {
        Some(b) => b,
        None => git::current_branch(&repo_root).await?,
    };
    let needs_base = config.execution.parallel || config.execution.branch_per_task;
    if needs_base && !git::resolves_to_commit(&repo_root, &base_branch).await {
        return Err(OrchestratorError::workspace(
            &repo_root,
            format!("base branch '{base_branch}' does not resolve to a commit"),
        )
        .into());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "\nReceived interrupt, cleaning up...".yellow());
            on_signal.cancel();
        }
    });

    let exec = &config.execution;
    let ctx = RunContext::new(exec.max_iterations, cancel.clone());
    let invoker = Arc::new(CliAgentInvoker::new(config.runtime, exec.model.clone()));
    let policy = RetryPolicy {
        decoder: config.decoder(),
        max_retries: exec.max_retries,
        delay: Duration::from_secs(exec.retry_delay_seconds),
        dry_run: exec.dry_run,
    };
    let prompt = PromptBuilder {
        task_file: source.artifact_path().map(|p| display_name(p, &repo_root)),
        skip_tests: exec.skip_tests,
        skip_lint: exec.skip_lint,
        allow_completion_marker: !exec.parallel,
    };

    println!("{}", "\nRalphy".bold());
    println!("{}", format!("Engine: {}", config.runtime).dimmed());
    println!("{}", format!("Tasks: {}", source.describe()).dimmed());
    println!("{}", format!("Base branch: {base_branch}").dimmed());
    if exec.dry_run {
        println!("{}", "Dry run: no agent will be invoked".yellow());
    }
    info!(
        run_id = %ctx.run_id,
        engine = %config.runtime,
        parallel = exec.parallel,
        max_parallel = exec.max_parallel,
        "Run starting"
    );

    let display = ProgressDisplay::new(interactive && std::io::stderr().is_terminal());
    let termination = if exec.parallel {
        let seeds: Vec<PathBuf> = source.artifact_path().map(Path::to_path_buf).into_iter().collect();
        let worktrees = Arc::new(WorktreeManager::new(&repo_root, seeds)?);
        let scheduler = ParallelScheduler::new(
            invoker,
            worktrees,
            policy,
            ParallelOptions {
                max_parallel: exec.max_parallel as usize,
                base_branch,
                create_pr: exec.create_pr,
                draft_pr: exec.draft_pr,
                poll_interval: Duration::from_millis(exec.poll_interval_ms),
                prompt,
            },
            cancel,
        );
        scheduler.run(source.as_mut(), &ctx, &display).await
    } else {
        if exec.create_pr && !exec.branch_per_task {
            warn!("--create-pr has no effect without --branch-per-task in sequential mode");
        }
        let opts = SequentialOptions {
            repo_dir: repo_root.clone(),
            base_branch,
            branch_per_task: exec.branch_per_task,
            create_pr: exec.create_pr,
            draft_pr: exec.draft_pr,
            delay: Duration::from_secs(exec.delay_seconds),
            prompt,
        };
        let retry = policy.controller(invoker.as_ref());
        run_sequential(source.as_mut(), &retry, &ctx, &opts, &display).await
    };
    display.finish();

    let termination = termination?;
    info!(run_id = %ctx.run_id, %termination, "Run finished");
    print_summary(&ctx.summary(termination));
    Ok(termination)
}

/// Path relative to the repository when possible.
fn display_name(path: &Path, repo_root: &Path) -> String {
    path.strip_prefix(repo_root)
        .unwrap_or(path)
        .display()
        .to_string()
}

pub mod commands;
pub mod config;
pub mod error;
pub mod git;
pub mod invoker;
pub mod logging;
pub mod output_parser;
pub mod parallel;
pub mod progress;
pub mod prompt;
pub mod retry;
pub mod run_context;
pub mod sequential;
pub mod task_source;
pub mod types;
pub mod worktree;

use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "ralphy",
    version,
    about = "Autonomous coding-agent task orchestrator",
    long_about = "Ralphy feeds a queue of tasks to a coding agent, one at a time or in parallel worktrees, until the queue is empty.",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Work through the task queue (default)
    Run(RunArgs),

    /// Check system requirements and configuration
    Doctor,

    /// Show current configuration
    Config,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.json_logs);

    let interactive = !cli.json_logs;
    let outcome = match cli.command {
        Some(Command::Run(args)) => commands::run::run(&args, interactive),
        None => commands::run::run(&cli.run, interactive),
        Some(Command::Doctor) => commands::doctor::run(),
        Some(Command::Config) => commands::config::run().map(|()| 0),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", format!("Error: {e:#}").red());
            std::process::exit(error::exit_code_for(&e));
        }
    }
}

//! Terminal output: live slot spinner and the end-of-run summary.

use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::run_context::RunSummary;
use crate::types::{AgentRun, RunStatus, Step, Termination};

pub fn format_elapsed(seconds: u64) -> String {
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

/// One compact line per batch: `#0 running Implementing | #1 done | ...`
pub fn render_slots(runs: &[AgentRun]) -> String {
    runs.iter()
        .map(|run| match run.status() {
            RunStatus::Running => format!("#{} {} {}", run.agent_index, run.status(), run.step),
            status => format!("#{} {}", run.agent_index, status),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Spinner showing live slot state. Hidden when output is not interactive.
#[derive(Clone)]
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self::new(false)
    }

    pub fn set_batch(&self, batch: usize, total: usize, runs: &[AgentRun]) {
        self.bar
            .set_message(format!("Batch {}/{}  {}", batch, total, render_slots(runs)));
    }

    pub fn set_step(&self, title: &str, step: Step) {
        self.bar.set_message(format!("{title}  {step}"));
    }

    /// Print above the spinner without tearing it.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.bar.is_hidden() {
            println!("{}", line.as_ref());
        } else {
            self.bar.println(line.as_ref());
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run completed:".bold());
    let termination = summary.termination.to_string();
    let termination = match summary.termination {
        Termination::AllComplete => termination.green(),
        Termination::Interrupted => termination.red(),
        Termination::MaxIterations | Termination::NoTasks => termination.yellow(),
    };
    println!("  Result: {termination}");
    println!("  Iterations: {}", summary.iterations);
    println!(
        "  Tasks: {} completed, {} failed",
        summary.completed.len(),
        summary.failed.len()
    );
    println!(
        "  Tokens: {} in / {} out",
        summary.totals.input_tokens, summary.totals.output_tokens
    );
    println!("  Cost: ${:.4}", summary.totals.cost);
    println!("  Time: {}", format_elapsed(summary.elapsed_secs));

    for failed in &summary.failed {
        println!(
            "{}",
            format!(
                "  ✗ {} ({} attempts): {}",
                failed.title, failed.attempts, failed.error
            )
            .red()
        );
    }
    if !summary.branches.is_empty() {
        println!("{}", "  Branches:".dimmed());
        for branch in &summary.branches {
            println!("    {}", branch.dimmed());
        }
    }
    for note in &summary.notes {
        println!("{}", format!("  ⚠ {note}").yellow());
    }
}

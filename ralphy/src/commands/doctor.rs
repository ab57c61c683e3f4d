//! Doctor command - Check that a run could start from here

use colored::Colorize;
use std::path::Path;
use std::process::Command;

use crate::commands::run::install_hint;
use crate::config::{load_config, read_config, resolve_config_path, validate_config, ConfigLocation};
use crate::types::{AgentRuntime, RalphyConfig, SourceKind};

/// Width of the label column in doctor output.
const LABEL_WIDTH: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ready,
    /// A run would refuse to start.
    Blocking,
    /// Worth knowing, but a run can start.
    Advisory,
}

/// Outcome of one doctor check
#[derive(Debug)]
struct Check {
    label: String,
    verdict: Verdict,
    summary: String,
    hint: Option<String>,
}

impl Check {
    fn ready(label: &str, summary: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            verdict: Verdict::Ready,
            summary: summary.into(),
            hint: None,
        }
    }

    fn problem(label: &str, verdict: Verdict, summary: impl Into<String>, hint: &str) -> Self {
        Self {
            label: label.into(),
            verdict,
            summary: summary.into(),
            hint: Some(hint.into()),
        }
    }

    fn render(&self) -> String {
        let (icon, summary) = match self.verdict {
            Verdict::Ready => ("✓".green(), self.summary.normal()),
            Verdict::Blocking => ("✗".red(), self.summary.red()),
            Verdict::Advisory => ("!".yellow(), self.summary.yellow()),
        };
        let mut out = format!("  {icon} {:<width$} {summary}", self.label, width = LABEL_WIDTH);
        if let Some(ref hint) = self.hint {
            out.push_str(&format!("\n    {} {}", "→".dimmed(), hint.dimmed()));
        }
        out
    }
}

fn on_path(name: &str) -> bool {
    which::which(name).is_ok()
}

/// First line of `<name> --version`, whichever stream it lands on.
fn version_of(name: &str) -> Option<String> {
    let output = Command::new(name).arg("--version").output().ok()?;
    [output.stdout, output.stderr]
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .find(|text| !text.is_empty())
        .and_then(|text| text.lines().next().map(str::to_string))
}

fn runtime_display_name(runtime: AgentRuntime) -> &'static str {
    match runtime {
        AgentRuntime::Claude => "Claude CLI",
        AgentRuntime::Opencode => "OpenCode CLI",
        AgentRuntime::Cursor => "Cursor agent CLI",
        AgentRuntime::Codex => "Codex CLI",
    }
}

/// Look up a binary. A missing binary blocks only when the run needs it.
fn check_tool(
    label: &str,
    binary: &str,
    needed: bool,
    hint: &str,
    found: impl Fn(&str) -> bool,
    version: impl Fn(&str) -> Option<String>,
) -> Check {
    if found(binary) {
        let version = version(binary).unwrap_or_else(|| "version unknown".into());
        return Check::ready(label, version);
    }
    let verdict = if needed {
        Verdict::Blocking
    } else {
        Verdict::Advisory
    };
    Check::problem(label, verdict, format!("{binary} not on PATH"), hint)
}

/// The GitHub CLI is only required for issue sources and pull requests.
fn needs_gh(config: &RalphyConfig) -> bool {
    config.source.kind == SourceKind::Github || config.execution.create_pr
}

fn tool_checks(config: &RalphyConfig) -> Vec<Check> {
    let runtime = config.runtime;
    vec![
        check_tool("Git", "git", true, "Install git for your platform", on_path, version_of),
        check_tool(
            runtime_display_name(runtime),
            runtime.binary(),
            true,
            install_hint(runtime),
            on_path,
            version_of,
        ),
        check_tool(
            "GitHub CLI",
            "gh",
            needs_gh(config),
            "Install: https://cli.github.com (used by --github and --create-pr)",
            on_path,
            version_of,
        ),
    ]
}

fn check_config(config_path: &Path, location: ConfigLocation) -> Check {
    if !config_path.exists() {
        return Check::problem(
            "Config",
            Verdict::Advisory,
            format!("none at {}, using defaults", config_path.display()),
            "Run 'ralphy config' to see the settings in effect",
        );
    }
    match read_config(config_path).and_then(|c| validate_config(&c)) {
        Ok(()) => Check::ready(
            "Config",
            format!("{} ({:?})", config_path.display(), location),
        ),
        Err(e) => Check::problem(
            "Config",
            Verdict::Blocking,
            format!("{} is invalid", config_path.display()),
            &e.to_string(),
        ),
    }
}

fn check_task_source(config: &RalphyConfig, root: &Path) -> Check {
    let Some(file) = config.source.resolved_path() else {
        let repo = config.source.github_repo.as_deref().unwrap_or("(unset)");
        return Check::ready("Tasks", format!("GitHub issues from {repo}"));
    };
    if root.join(&file).exists() {
        Check::ready("Tasks", file)
    } else {
        Check::problem(
            "Tasks",
            Verdict::Blocking,
            format!("{file} not found"),
            "Create it or point at another file with --prd / --yaml",
        )
    }
}

/// Exit code for a set of checks: 1 if anything blocks a run.
fn exit_code(checks: &[Check]) -> i32 {
    if checks.iter().any(|c| c.verdict == Verdict::Blocking) {
        1
    } else {
        0
    }
}

pub fn run() -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;
    let (config_path, location) = resolve_config_path(Some(&cwd));
    let config = load_config(Some(&cwd)).unwrap_or_default();

    println!("{}", "\nRalphy Doctor".bold());

    let mut checks = Vec::new();
    println!("{}", "\nTools".bold());
    for check in tool_checks(&config) {
        println!("{}", check.render());
        checks.push(check);
    }

    println!("{}", "\nProject".bold());
    for check in [
        check_config(&config_path, location),
        check_task_source(&config, &cwd),
    ] {
        println!("{}", check.render());
        checks.push(check);
    }

    let blocking = checks.iter().filter(|c| c.verdict == Verdict::Blocking).count();
    let advisory = checks.iter().filter(|c| c.verdict == Verdict::Advisory).count();
    println!();
    if blocking > 0 {
        eprintln!("{}", format!("{blocking} problem(s) would stop a run\n").red());
    } else if advisory > 0 {
        println!("{}", format!("Ready, with {advisory} note(s)\n").yellow());
    } else {
        println!("{}", "Ready to run.\n".green());
    }

    Ok(exit_code(&checks))
}

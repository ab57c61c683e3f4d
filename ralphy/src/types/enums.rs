use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// External coding-agent CLI that executes each task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRuntime {
    #[default]
    Claude,
    Opencode,
    Cursor,
    Codex,
}

impl AgentRuntime {
    /// Binary that must be on `PATH` for this runtime.
    pub fn binary(&self) -> &'static str {
        match self {
            AgentRuntime::Claude => "claude",
            AgentRuntime::Opencode => "opencode",
            AgentRuntime::Cursor => "cursor-agent",
            AgentRuntime::Codex => "codex",
        }
    }

    /// Decoder profile matching the runtime's streaming output format.
    pub fn default_decoder(&self) -> DecoderProfile {
        match self {
            AgentRuntime::Claude | AgentRuntime::Cursor => DecoderProfile::StreamJson,
            AgentRuntime::Opencode => DecoderProfile::TextParts,
            AgentRuntime::Codex => DecoderProfile::Auto,
        }
    }
}

impl fmt::Display for AgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRuntime::Claude => write!(f, "claude"),
            AgentRuntime::Opencode => write!(f, "opencode"),
            AgentRuntime::Cursor => write!(f, "cursor"),
            AgentRuntime::Codex => write!(f, "codex"),
        }
    }
}

impl FromStr for AgentRuntime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(AgentRuntime::Claude),
            "opencode" => Ok(AgentRuntime::Opencode),
            "cursor" | "cursor-agent" => Ok(AgentRuntime::Cursor),
            "codex" => Ok(AgentRuntime::Codex),
            _ => Err(format!(
                "Unknown engine: '{s}'. Expected: claude, opencode, cursor, codex"
            )),
        }
    }
}

/// Kind of backing store tasks are read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Markdown,
    Yaml,
    Github,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Markdown => write!(f, "markdown"),
            SourceKind::Yaml => write!(f, "yaml"),
            SourceKind::Github => write!(f, "github"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(SourceKind::Markdown),
            "yaml" | "yml" => Ok(SourceKind::Yaml),
            "github" | "gh" => Ok(SourceKind::Github),
            _ => Err(format!(
                "Unknown task source: '{s}'. Expected: markdown, yaml, github"
            )),
        }
    }
}

/// Named decoder for an agent's newline-delimited JSON output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderProfile {
    /// A single terminal `result` record carrying text and usage.
    StreamJson,
    /// Incremental `text` fragments plus a terminal `step_finish` record.
    TextParts,
    /// Accept both record families.
    #[default]
    Auto,
}

/// Lifecycle status of one agent run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Waiting,
    SettingUp,
    Running,
    Done,
    Failed,
}

impl RunStatus {
    fn rank(&self) -> u8 {
        match self {
            RunStatus::Waiting => 0,
            RunStatus::SettingUp => 1,
            RunStatus::Running => 2,
            RunStatus::Done | RunStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }

    /// Holding a worktree or a child process.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::SettingUp | RunStatus::Running)
    }

    /// `true` if moving from `self` to `next` is a forward transition.
    ///
    /// Terminal states never change; `failed` is reachable from any
    /// non-terminal state.
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == RunStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Waiting => write!(f, "waiting"),
            RunStatus::SettingUp => write!(f, "setting_up"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Done => write!(f, "done"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Live classification of what an agent is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Step {
    #[default]
    Thinking,
    ReadingCode,
    Implementing,
    WritingTests,
    Testing,
    Linting,
    UpdatingTracker,
    Staging,
    Committing,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::Thinking => "Thinking",
            Step::ReadingCode => "Reading code",
            Step::Implementing => "Implementing",
            Step::WritingTests => "Writing tests",
            Step::Testing => "Testing",
            Step::Linting => "Linting",
            Step::UpdatingTracker => "Updating tracker",
            Step::Staging => "Staging",
            Step::Committing => "Committing",
        };
        f.write_str(label)
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Task source exhausted, or the agent emitted the completion marker.
    AllComplete,
    /// Configured iteration cap reached with work remaining.
    MaxIterations,
    /// External interrupt (Ctrl-C).
    Interrupted,
    /// Nothing was pending when the run started.
    NoTasks,
}

impl Termination {
    /// Process exit code reported for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Interrupted => 130,
            _ => 0,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::AllComplete => write!(f, "all tasks complete"),
            Termination::MaxIterations => write!(f, "max iterations reached"),
            Termination::Interrupted => write!(f, "interrupted"),
            Termination::NoTasks => write!(f, "no tasks"),
        }
    }
}

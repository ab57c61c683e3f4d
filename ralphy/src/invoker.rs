//! Agent invoker - runs one external coding-agent process per attempt.
//!
//! The invoker only captures stdout; interpreting it is the output parser's
//! job. Exit status is logged, never interpreted.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::types::AgentRuntime;

/// Receives each stdout line as it is produced.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub trait AgentInvoker: Send + Sync {
    /// Run the agent on `prompt` inside `work_dir` and return its raw stdout.
    ///
    /// Cancelling `cancel` kills the child and yields
    /// [`OrchestratorError::Interrupted`].
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        work_dir: &'a Path,
        on_line: Option<LineCallback>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Invoker that shells out to an agent CLI
#[derive(Debug, Clone)]
pub struct CliAgentInvoker {
    runtime: AgentRuntime,
    model: Option<String>,
}

impl CliAgentInvoker {
    pub fn new(runtime: AgentRuntime, model: Option<String>) -> Self {
        Self { runtime, model }
    }

    /// Program and arguments for one invocation. The prompt is always last.
    pub fn command_line(&self, prompt: &str) -> (String, Vec<String>) {
        let mut args: Vec<String> = match self.runtime {
            AgentRuntime::Claude => vec![
                "-p".into(),
                "--dangerously-skip-permissions".into(),
                "--verbose".into(),
                "--output-format".into(),
                "stream-json".into(),
            ],
            AgentRuntime::Opencode => vec!["run".into(), "--format".into(), "json".into()],
            AgentRuntime::Cursor => vec![
                "-p".into(),
                "--force".into(),
                "--output-format".into(),
                "stream-json".into(),
            ],
            AgentRuntime::Codex => vec!["exec".into(), "--json".into(), "--full-auto".into()],
        };
        if let Some(ref model) = self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        args.push(prompt.to_string());
        (self.runtime.binary().to_string(), args)
    }

    fn build_command(&self, prompt: &str, work_dir: &Path) -> Command {
        let (program, args) = self.command_line(prompt);
        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(work_dir)
            // Let the agent CLI run when ralphy itself runs inside an agent session
            .env_remove("CLAUDECODE");
        command
    }
}

/// Spawn `command`, stream its stdout line by line and return everything it
/// printed. Stderr is forwarded to debug logs.
pub async fn run_streaming(
    mut command: Command,
    on_line: Option<LineCallback>,
    cancel: &CancellationToken,
) -> Result<String> {
    let program = command.as_std().get_program().to_string_lossy().to_string();
    debug!(%program, "spawning agent");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdout = child.stdout.take().context("failed to capture stdout")?;
    let stderr = child.stderr.take().context("failed to capture stderr")?;

    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "ralphy::agent_stderr", "{line}");
        }
    });

    let mut reader = BufReader::new(stdout).lines();
    let mut buffer = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                stderr_task.abort();
                return Err(OrchestratorError::Interrupted.into());
            }
            line = reader.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(ref callback) = on_line {
                        callback(&line);
                    }
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "error reading agent stdout");
                    break;
                }
            },
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            stderr_task.abort();
            return Err(OrchestratorError::Interrupted.into());
        }
        status = child.wait() => status.context("failed to wait for agent")?,
    };
    let _ = stderr_task.await;

    debug!(
        %program,
        exit_code = status.code().unwrap_or(-1),
        stdout_len = buffer.len(),
        "agent exited"
    );
    Ok(buffer)
}

/// SIGTERM first so the agent can clean up, then a hard kill.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: signalling a child pid we spawned and have not yet reaped
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(std::time::Duration::from_secs(2), child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill agent process");
    }
}

impl AgentInvoker for CliAgentInvoker {
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        work_dir: &'a Path,
        on_line: Option<LineCallback>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        run_streaming(self.build_command(prompt, work_dir), on_line, cancel).boxed()
    }
}

//! Bounded retries around one (invoke, parse, validate) cycle.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{is_interrupted, OrchestratorError};
use crate::invoker::{AgentInvoker, LineCallback};
use crate::types::{DecoderProfile, ExecutionResult};

/// Attempt bookkeeping scoped to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub max: u32,
    pub delay: Duration,
}

impl RetryState {
    pub fn new(max: u32, delay: Duration) -> Self {
        Self {
            attempt: 0,
            max: max.max(1),
            delay,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max
    }
}

/// How one task attempt resolved
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Succeeded {
        result: ExecutionResult,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_error: String,
    },
    /// Nothing was invoked; `prompt` is what would have been sent.
    DryRun { prompt: String },
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RetryOutcome::Exhausted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
            RetryOutcome::DryRun { .. } => 0,
        }
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            RetryOutcome::Succeeded { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Retry settings shared by every task of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub decoder: DecoderProfile,
    pub max_retries: u32,
    pub delay: Duration,
    pub dry_run: bool,
}

impl RetryPolicy {
    pub fn controller<'a>(&self, invoker: &'a dyn AgentInvoker) -> RetryController<'a> {
        RetryController::new(invoker, self.decoder, self.max_retries, self.delay)
            .dry_run(self.dry_run)
    }
}

pub struct RetryController<'a> {
    invoker: &'a dyn AgentInvoker,
    decoder: DecoderProfile,
    max_retries: u32,
    delay: Duration,
    dry_run: bool,
}

impl<'a> RetryController<'a> {
    pub fn new(
        invoker: &'a dyn AgentInvoker,
        decoder: DecoderProfile,
        max_retries: u32,
        delay: Duration,
    ) -> Self {
        Self {
            invoker,
            decoder,
            max_retries,
            delay,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run the agent until it yields a usable result or the budget is spent.
    ///
    /// Only interruption escapes as an `Err`; every other failure is folded
    /// into [`RetryOutcome::Exhausted`].
    pub async fn run(
        &self,
        prompt: &str,
        work_dir: &Path,
        on_line: Option<LineCallback>,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome> {
        if self.dry_run {
            return Ok(RetryOutcome::DryRun {
                prompt: prompt.to_string(),
            });
        }

        let mut state = RetryState::new(self.max_retries, self.delay);
        let mut last_error = String::new();

        while !state.exhausted() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Interrupted.into());
            }
            state.attempt += 1;

            match self
                .invoker
                .invoke(prompt, work_dir, on_line.clone(), cancel)
                .await
            {
                Ok(raw) => {
                    let result = self.decoder.decode(&raw);
                    if result.success {
                        debug!(attempt = state.attempt, "agent attempt succeeded");
                        return Ok(RetryOutcome::Succeeded {
                            result,
                            attempts: state.attempt,
                        });
                    }
                    last_error = result
                        .error_message
                        .unwrap_or_else(|| "agent reported failure".to_string());
                }
                Err(e) if is_interrupted(&e) => return Err(e),
                Err(e) => last_error = format!("{e:#}"),
            }

            warn!(
                attempt = state.attempt,
                max = state.max,
                error = %last_error,
                "agent attempt failed"
            );

            if !state.exhausted() && !state.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestratorError::Interrupted.into()),
                    _ = tokio::time::sleep(state.delay) => {}
                }
            }
        }

        Ok(RetryOutcome::Exhausted {
            attempts: state.attempt,
            last_error: OrchestratorError::Invocation(last_error).to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use futures::FutureExt;

    use super::*;

    /// Invoker that replays canned outputs, repeating the last one.
    pub struct ScriptedInvoker {
        outputs: Mutex<VecDeque<Result<String, String>>>,
        last: Mutex<Option<Result<String, String>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedInvoker {
        pub fn new(outputs: Vec<Result<&str, &str>>) -> Self {
            Self {
                outputs: Mutex::new(
                    outputs
                        .into_iter()
                        .map(|o| o.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }

        pub fn always(output: &str) -> Self {
            Self::new(vec![Ok(output)])
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AgentInvoker for ScriptedInvoker {
        fn invoke<'a>(
            &'a self,
            _prompt: &'a str,
            _work_dir: &'a Path,
            on_line: Option<LineCallback>,
            cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<String>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if cancel.is_cancelled() {
                    return Err(OrchestratorError::Interrupted.into());
                }
                let next = self.outputs.lock().unwrap().pop_front();
                let output = match next {
                    Some(o) => {
                        *self.last.lock().unwrap() = Some(o.clone());
                        o
                    }
                    None => self
                        .last
                        .lock()
                        .unwrap()
                        .clone()
                        .unwrap_or_else(|| Ok(String::new())),
                };
                let raw = output.map_err(|e| anyhow::anyhow!(e))?;
                if let Some(callback) = on_line {
                    for line in raw.lines() {
                        callback(line);
                    }
                }
                Ok(raw)
            }
            .boxed()
        }
    }
}

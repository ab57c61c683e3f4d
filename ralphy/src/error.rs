use std::path::PathBuf;

/// Errors surfaced by the orchestration core
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Required external tooling is missing or unusable. Fatal at startup.
    #[error("{tool} not found on PATH. {hint}")]
    Environment { tool: String, hint: String },

    /// Creating or tearing down an isolated workspace failed. Not retried.
    #[error("Workspace error at {}: {message}", path.display())]
    Workspace { path: PathBuf, message: String },

    /// The agent produced no usable output.
    #[error("Agent invocation failed: {0}")]
    Invocation(String),

    /// External interrupt received.
    #[error("Interrupted")]
    Interrupted,
}

impl OrchestratorError {
    pub fn workspace(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        OrchestratorError::Workspace {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Process exit code for errors that end the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Interrupted => 130,
            _ => 1,
        }
    }
}

/// `true` if `err` (or anything in its chain) is an interruption.
pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::Interrupted)
        )
    })
}

/// Process exit code for an error that ends the program.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if is_interrupted(err) {
        130
    } else {
        1
    }
}

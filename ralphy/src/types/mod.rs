pub mod config;
pub mod enums;
pub mod run;
pub mod task;

// Re-export commonly used types for convenience
pub use config::{ExecutionConfig, RalphyConfig, SourceConfig};
pub use enums::{AgentRuntime, DecoderProfile, RunStatus, SourceKind, Step, Termination};
pub use run::{AgentRun, ExecutionResult, UsageTotals};
pub use task::{plan_batches, BatchPlan, Task};

//! Scheduling and execution of workflows.
//!
//! The [`WorkflowScheduler`] decides which activities run next and groups them into
//! submissions. A submission either runs a single activity imperatively, fuses a chain of
//! activities into one plan, or pipes tuples through a chain of activities running
//! concurrently. The [`WorkflowRunner`] drives scheduler and executor on worker threads.

mod context;
mod executor;
mod optimizer;
mod pipe;
mod runner;
mod scheduler;

pub use context::{ActivityLog, ExecutionContext, FuseContext, LogEntry, LogLevel, PipeContext};
pub use optimizer::{StrategyOptions, SubmissionPlan};
pub use pipe::{InputPipe, OutputPipe};
pub use runner::{ExecutionSummary, InterruptHandle, SubmissionReport, WorkflowRunner};
pub use scheduler::WorkflowScheduler;

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a submission is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStrategy {
    /// A single activity reads and writes checkpoints.
    Default,
    /// A chain of fusable activities runs as a single plan.
    Fusion,
    /// A chain of pipeable activities streams tuples without intermediate checkpoints.
    Pipe,
    /// A single activity that may write variables.
    VariableWriter,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStrategy::Default => "DEFAULT",
            ExecutionStrategy::Fusion => "FUSION",
            ExecutionStrategy::Pipe => "PIPE",
            ExecutionStrategy::VariableWriter => "VARIABLE_WRITER",
        };
        write!(f, "{}", name)
    }
}

//! Error taxonomy
//!
//! Typed errors for the planner and execution engine. Collaborator plumbing
//! (HTTP transports, tool services) uses anyhow internally; causes cross into
//! this taxonomy as strings so callers always see a structured error instead
//! of a raw transport trace.

use thiserror::Error;

/// Structural rejection of a plan by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("dependency cycle among tasks: {}", tasks.join(", "))]
    CycleDetected { tasks: Vec<String> },

    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {task} uses unknown tool: {tool}")]
    UnknownTool { task: String, tool: String },
}

/// The language model could not be coerced into a valid plan within the
/// retry budget. No partial plan is returned.
#[derive(Debug, Clone, Error)]
#[error("no valid plan after {attempts} attempts: {last_error}")]
pub struct PlanGenerationError {
    pub attempts: usize,
    pub last_error: String,
}

/// Fatal failure of a single `run` invocation.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// A task on the critical path to the synthesis step failed.
    #[error("task {task_id} failed: {cause}")]
    TaskFailed { task_id: String, cause: String },

    /// The run was cancelled by the caller; in-flight tool invocations were
    /// abandoned and partial outputs discarded.
    #[error("execution cancelled")]
    Cancelled,

    /// The plan contains no synthesis task, so no final answer can exist.
    #[error("plan has no synthesis task")]
    MissingSynthesis,
}

/// Discriminated result of `run_query`: either planning or execution broke.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("planning failed: {0}")]
    Plan(#[from] PlanGenerationError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

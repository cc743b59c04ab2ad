//! Insight Agent
//!
//! Multi-source analytical query planner and execution engine. One
//! natural-language request becomes a validated, dependency-ordered graph of
//! retrieval sub-tasks; the graph executes concurrently and a terminal
//! synthesis step turns the collected partial results into one answer.
//!
//! # Architecture
//!
//! ```text
//! Front end ──► AnalysisAgent ──► Planner ──► Chat API
//!                     │              │
//!                     │        ExecutionPlan (validated DAG)
//!                     │              │
//!                     └──► ExecutionEngine ──► ToolRegistry
//!                                                 ├── DocumentRetrieval ──► doc service
//!                                                 ├── StructuredQuery ────► sql service
//!                                                 └── FinalSynthesis ─────► Chat API
//! ```
//!
//! Retrieval and SQL execution stay in the collaborator services; the core
//! only plans, schedules, and aggregates.

pub mod agent;
pub mod backends;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod plan;
pub mod planner;
pub mod tools;

pub use agent::{AnalysisAgent, QueryOutcome};
pub use backends::{HttpToolBackend, StaticToolBackend, ToolBackend};
pub use config::Config;
pub use engine::{EngineConfig, ExecutionEngine, ExecutionReport, TaskRecord, TaskStatus};
pub use error::{AgentError, ExecutionError, PlanError, PlanGenerationError};
pub use llm::{ChatClient, LanguageModel};
pub use plan::{AnalysisTask, ExecutionPlan, PlanGraph, ToolKind};
pub use planner::{Planner, PlannerConfig};
pub use tools::{ContextEntry, TaskContext, ToolAdapter, ToolRegistry};

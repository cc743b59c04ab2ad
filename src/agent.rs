//! Analysis Agent
//!
//! The single entry point front ends call: plan the query, execute the
//! plan, return the answer together with the plan for inspection.

use crate::config::Config;
use crate::engine::{EngineConfig, ExecutionEngine};
use crate::error::AgentError;
use crate::llm::LanguageModel;
use crate::plan::ExecutionPlan;
use crate::planner::{Planner, PlannerConfig};
use crate::tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of one query: the validated plan and the synthesized answer.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub plan: ExecutionPlan,
    pub final_answer: String,
}

/// Planner and engine wired together over shared collaborators.
pub struct AnalysisAgent {
    planner: Planner,
    engine: ExecutionEngine,
}

impl AnalysisAgent {
    pub fn new(model: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            planner: Planner::new(model),
            engine: ExecutionEngine::new(registry),
        }
    }

    /// Wire planner and engine limits from config.
    pub fn with_config(
        model: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            planner: Planner::with_config(
                model,
                PlannerConfig {
                    max_retries: config.max_plan_retries,
                },
            ),
            engine: ExecutionEngine::with_config(
                registry,
                EngineConfig {
                    max_concurrency: config.max_concurrency,
                    task_timeout: Duration::from_secs(config.task_timeout_secs),
                },
            ),
        }
    }

    /// Answer one analytical query end to end.
    pub async fn run_query(&self, user_query: &str) -> Result<QueryOutcome, AgentError> {
        self.run_query_cancellable(user_query, CancellationToken::new())
            .await
    }

    /// `run_query` with caller-initiated cancellation of the execution
    /// phase. Task records are discarded once the outcome is built.
    pub async fn run_query_cancellable(
        &self,
        user_query: &str,
        cancel: CancellationToken,
    ) -> Result<QueryOutcome, AgentError> {
        info!("Planning query: {}", user_query);
        let plan = self.planner.create_plan(user_query).await?;
        info!("Plan ready:\n{}", plan.format());

        let final_answer = self.engine.run_cancellable(&plan, cancel).await?;
        info!("Query answered ({} chars)", final_answer.len());

        Ok(QueryOutcome { plan, final_answer })
    }
}

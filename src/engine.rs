//! Execution Engine
//!
//! Schedules a validated plan over the tool registry:
//! - per-task state machine: Pending -> Ready -> Running -> Completed | Failed
//! - a task is Ready exactly when every dependency is Completed
//! - Ready tasks run concurrently, bounded by a semaphore
//! - completions fan in over a channel, so the scheduler loop is the only
//!   writer of the record map; dependents observe outputs only after the
//!   write lands
//! - a failure fails every transitive dependent without running it; if the
//!   failed task sits in the synthesis task's dependency closure the run is
//!   fatal, otherwise the failure is absorbed and reported to synthesis as
//!   an unavailable branch

use crate::error::ExecutionError;
use crate::plan::{AnalysisTask, ExecutionPlan, PlanGraph, ToolKind};
use crate::tools::{ContextEntry, TaskContext, ToolRegistry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Execution state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
}

/// Per-task execution record. Owned by the engine for one run; the plan
/// itself is never mutated.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub status: TaskStatus,
    /// Present once Completed.
    pub output: Option<String>,
    /// Present only when Failed.
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl TaskRecord {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            output: None,
            error: None,
            duration_ms: None,
        }
    }
}

/// Outcome of one run, with the record map for callers that render
/// execution detail. Records are not retained across runs.
#[derive(Debug)]
pub struct ExecutionReport {
    pub records: HashMap<String, TaskRecord>,
    pub result: Result<String, ExecutionError>,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent tool invocations. Tool collaborators are network-bound,
    /// so a small pool is enough.
    pub max_concurrency: usize,
    /// Per-invocation timeout.
    pub task_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout: Duration::from_secs(120),
        }
    }
}

/// Completion message sent back by a spawned invocation.
enum Outcome {
    Completed {
        task_id: String,
        output: String,
        elapsed: Duration,
    },
    Failed {
        task_id: String,
        error: String,
        elapsed: Duration,
    },
    Cancelled {
        task_id: String,
    },
}

/// Dependency-ordered plan executor.
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Execute a validated plan and return the synthesis output.
    pub async fn run(&self, plan: &ExecutionPlan) -> Result<String, ExecutionError> {
        self.run_cancellable(plan, CancellationToken::new()).await
    }

    /// Execute with caller-initiated cancellation. On cancellation,
    /// in-flight invocations are abandoned, partial outputs discarded, and
    /// the run fails with `ExecutionError::Cancelled`.
    pub async fn run_cancellable(
        &self,
        plan: &ExecutionPlan,
        cancel: CancellationToken,
    ) -> Result<String, ExecutionError> {
        self.run_detailed(plan, cancel).await.result
    }

    /// Execute and return per-task records alongside the result.
    pub async fn run_detailed(
        &self,
        plan: &ExecutionPlan,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let mut records: HashMap<String, TaskRecord> = plan
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskRecord::pending()))
            .collect();

        let synthesis_id = match plan.synthesis_task() {
            Some(task) => task.id.clone(),
            None => {
                return ExecutionReport {
                    records,
                    result: Err(ExecutionError::MissingSynthesis),
                }
            }
        };

        let graph = PlanGraph::build(plan);
        let critical = graph.dependency_closure(&synthesis_id);

        // Child token: caller cancellation propagates in, and a fatal task
        // failure cancels in-flight work without touching the caller's token.
        let run_token = cancel.child_token();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel::<Outcome>(plan.tasks.len().max(1));

        for task in &plan.tasks {
            if task.dependencies.is_empty() {
                if let Some(record) = records.get_mut(&task.id) {
                    record.status = TaskStatus::Ready;
                }
            }
        }

        info!(
            "Executing plan {}: {} tasks, {} on the critical path",
            plan.plan_id,
            plan.tasks.len(),
            critical.len()
        );

        let mut fatal: Option<ExecutionError> = None;

        loop {
            if fatal.is_none() && !run_token.is_cancelled() {
                self.dispatch_ready(plan, &mut records, &semaphore, &tx, &run_token);
            }

            let running = records
                .values()
                .filter(|r| r.status == TaskStatus::Running)
                .count();
            if running == 0 {
                break;
            }

            let outcome = tokio::select! {
                _ = run_token.cancelled(), if fatal.is_none() => {
                    info!("Run cancelled with {} tasks in flight", running);
                    fatal = Some(ExecutionError::Cancelled);
                    continue;
                }
                outcome = rx.recv() => outcome,
            };

            // All senders live as long as a task is Running, so recv only
            // yields None once nothing is in flight.
            let Some(outcome) = outcome else { break };
            Self::apply_outcome(outcome, &mut records, &graph, &critical, &mut fatal, &run_token);
        }

        let result = match fatal {
            Some(err) => Err(err),
            None if run_token.is_cancelled() => Err(ExecutionError::Cancelled),
            None => match records.get(&synthesis_id).and_then(|r| r.output.clone()) {
                Some(answer) => Ok(answer),
                None => Err(ExecutionError::TaskFailed {
                    task_id: synthesis_id.clone(),
                    cause: "synthesis task never completed".to_string(),
                }),
            },
        };

        ExecutionReport { records, result }
    }

    /// Spawn every Ready task. The context is snapshotted here, before the
    /// status flips to Running, so an invocation only ever sees Completed
    /// dependency outputs.
    fn dispatch_ready(
        &self,
        plan: &ExecutionPlan,
        records: &mut HashMap<String, TaskRecord>,
        semaphore: &Arc<Semaphore>,
        tx: &mpsc::Sender<Outcome>,
        run_token: &CancellationToken,
    ) {
        let ready: Vec<String> = records
            .iter()
            .filter(|(_, r)| r.status == TaskStatus::Ready)
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in ready {
            let Some(task) = plan.get_task(&task_id) else {
                continue;
            };

            let adapter = task.tool_kind().and_then(|kind| self.registry.resolve(kind));
            let context = Self::build_context(task, plan, records);

            if let Some(record) = records.get_mut(&task_id) {
                record.status = TaskStatus::Running;
            }
            debug!("Dispatching task {} [{}]", task_id, task.tool);

            let Some(adapter) = adapter else {
                // Unreachable for validated plans with a full registry, but
                // a misconfigured registry must not wedge the run.
                let _ = tx.try_send(Outcome::Failed {
                    task_id: task_id.clone(),
                    error: format!("no adapter registered for tool {}", task.tool),
                    elapsed: Duration::ZERO,
                });
                continue;
            };

            let sub_query = task.sub_query.clone();
            let tx = tx.clone();
            let token = run_token.clone();
            let semaphore = Arc::clone(semaphore);
            let timeout = self.config.task_timeout;

            tokio::spawn(async move {
                let start = Instant::now();
                let outcome = tokio::select! {
                    _ = token.cancelled() => Outcome::Cancelled {
                        task_id: task_id.clone(),
                    },
                    invoked = async {
                        let _permit = semaphore.acquire_owned().await.ok();
                        tokio::time::timeout(timeout, adapter.execute(&sub_query, &context)).await
                    } => match invoked {
                        Ok(Ok(output)) => Outcome::Completed {
                            task_id: task_id.clone(),
                            output,
                            elapsed: start.elapsed(),
                        },
                        Ok(Err(e)) => Outcome::Failed {
                            task_id: task_id.clone(),
                            error: e.to_string(),
                            elapsed: start.elapsed(),
                        },
                        Err(_) => Outcome::Failed {
                            task_id: task_id.clone(),
                            error: format!("timed out after {:?}", timeout),
                            elapsed: start.elapsed(),
                        },
                    },
                };
                let _ = tx.send(outcome).await;
            });
        }
    }

    /// Context for one invocation: the Completed outputs of the task's
    /// declared dependencies, nothing else. For the synthesis task, failed
    /// sibling branches are listed separately as unavailable.
    fn build_context(
        task: &AnalysisTask,
        plan: &ExecutionPlan,
        records: &HashMap<String, TaskRecord>,
    ) -> TaskContext {
        let outputs: Vec<ContextEntry> = task
            .dependencies
            .iter()
            .filter_map(|dep| {
                let output = records.get(dep)?.output.clone()?;
                let description = plan
                    .get_task(dep)
                    .map(|t| t.description.clone())
                    .unwrap_or_default();
                Some(ContextEntry {
                    task_id: dep.clone(),
                    description,
                    output,
                })
            })
            .collect();

        let mut unavailable = Vec::new();
        if task.tool_kind() == Some(ToolKind::FinalSynthesis) {
            let declared: HashSet<&str> =
                task.dependencies.iter().map(String::as_str).collect();
            for other in &plan.tasks {
                if other.id != task.id
                    && !declared.contains(other.id.as_str())
                    && records
                        .get(&other.id)
                        .map(|r| r.status == TaskStatus::Failed)
                        .unwrap_or(false)
                {
                    unavailable.push(other.description.clone());
                }
            }
        }

        TaskContext {
            objective: task.description.clone(),
            outputs,
            unavailable,
        }
    }

    fn apply_outcome(
        outcome: Outcome,
        records: &mut HashMap<String, TaskRecord>,
        graph: &PlanGraph,
        critical: &HashSet<String>,
        fatal: &mut Option<ExecutionError>,
        run_token: &CancellationToken,
    ) {
        match outcome {
            Outcome::Completed {
                task_id,
                output,
                elapsed,
            } => {
                debug!("Task {} completed in {}ms", task_id, elapsed.as_millis());
                if let Some(record) = records.get_mut(&task_id) {
                    record.status = TaskStatus::Completed;
                    record.output = Some(output);
                    record.duration_ms = Some(elapsed.as_millis() as u64);
                }

                // Promote dependents whose dependency set is now complete.
                for dependent in graph.dependents_of(&task_id) {
                    let all_done = graph.dependencies_of(dependent).iter().all(|dep| {
                        records
                            .get(dep)
                            .map(|r| r.status == TaskStatus::Completed)
                            .unwrap_or(false)
                    });
                    if all_done {
                        if let Some(record) = records.get_mut(dependent) {
                            if record.status == TaskStatus::Pending {
                                record.status = TaskStatus::Ready;
                            }
                        }
                    }
                }
            }
            Outcome::Failed {
                task_id,
                error,
                elapsed,
            } => {
                warn!("Task {} failed after {}ms: {}", task_id, elapsed.as_millis(), error);
                if let Some(record) = records.get_mut(&task_id) {
                    record.status = TaskStatus::Failed;
                    record.error = Some(error.clone());
                    record.duration_ms = Some(elapsed.as_millis() as u64);
                }

                // Dependents can never run with missing context.
                for dependent in graph.transitive_dependents(&task_id) {
                    if let Some(record) = records.get_mut(&dependent) {
                        if matches!(record.status, TaskStatus::Pending | TaskStatus::Ready) {
                            record.status = TaskStatus::Failed;
                            record.error = Some(format!("dependency {} failed", task_id));
                        }
                    }
                }

                if critical.contains(&task_id) {
                    if fatal.is_none() {
                        *fatal = Some(ExecutionError::TaskFailed {
                            task_id: task_id.clone(),
                            cause: error,
                        });
                    }
                    run_token.cancel();
                } else {
                    info!("Absorbed failure of non-critical task {}", task_id);
                }
            }
            Outcome::Cancelled { task_id } => {
                debug!("Task {} cancelled", task_id);
                if let Some(record) = records.get_mut(&task_id) {
                    record.status = TaskStatus::Failed;
                    record.error = Some("cancelled".to_string());
                }
            }
        }
    }
}

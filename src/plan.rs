//! Plan Schema & Validator
//!
//! The task-graph shape the planner emits and the engine consumes:
//! - `ExecutionPlan` / `AnalysisTask`: the wire-faithful plan model
//! - `validate`: structural invariants (unique ids, known tools, acyclic deps)
//! - `PlanGraph`: adjacency index built once after validation so the
//!   scheduler never re-scans the flat task list

use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// The closed set of tool kinds a task may bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Semantic search over unstructured documents.
    DocumentRetrieval,
    /// Query against the relational store.
    StructuredQuery,
    /// Terminal aggregation of all upstream outputs into the final answer.
    FinalSynthesis,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::DocumentRetrieval,
        ToolKind::StructuredQuery,
        ToolKind::FinalSynthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentRetrieval => "DocumentRetrieval",
            Self::StructuredQuery => "StructuredQuery",
            Self::FinalSynthesis => "FinalSynthesis",
        }
    }

    /// Parse a wire-level tool name. Returns None outside the closed set.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work in a plan.
///
/// Created once by the planner and immutable afterwards; the engine keeps
/// its own execution record per task and never mutates the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    /// Unique within the plan.
    pub id: String,
    /// Wire-level tool name; `tool_kind` resolves it against the closed set.
    pub tool: String,
    /// Human-readable intent. Labels this task's output in the synthesis
    /// prompt; never consulted by scheduling logic.
    pub description: String,
    /// The payload handed to the tool collaborator.
    #[serde(rename = "subQuery")]
    pub sub_query: String,
    /// Ids of tasks whose outputs must be available before this one runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl AnalysisTask {
    pub fn new(id: &str, tool: ToolKind, description: &str, sub_query: &str) -> Self {
        Self {
            id: id.to_string(),
            tool: tool.as_str().to_string(),
            description: description.to_string(),
            sub_query: sub_query.to_string(),
            dependencies: vec![],
        }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, task_id: &str) -> Self {
        self.dependencies.push(task_id.to_string());
        self
    }

    /// Resolve the wire-level tool name. None means the plan has not passed
    /// validation.
    pub fn tool_kind(&self) -> Option<ToolKind> {
        ToolKind::parse(&self.tool)
    }
}

/// A directed acyclic graph of analysis tasks for one user query.
///
/// Task order is the planner's emission order, not execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(rename = "planId", default)]
    pub plan_id: String,
    pub tasks: Vec<AnalysisTask>,
}

impl ExecutionPlan {
    pub fn new(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            tasks: vec![],
        }
    }

    pub fn add_task(&mut self, task: AnalysisTask) {
        self.tasks.push(task);
    }

    pub fn get_task(&self, id: &str) -> Option<&AnalysisTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// The designated terminal task, if the plan has one.
    pub fn synthesis_task(&self) -> Option<&AnalysisTask> {
        self.tasks
            .iter()
            .find(|t| t.tool_kind() == Some(ToolKind::FinalSynthesis))
    }

    /// Check the structural invariants:
    /// - no duplicate task ids
    /// - every tool name is in the closed set
    /// - every dependency references an existing task
    /// - the dependency relation is acyclic
    ///
    /// Pure over the plan value; re-validating an accepted plan accepts.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(PlanError::DuplicateId(task.id.clone()));
            }
        }

        for task in &self.tasks {
            if task.tool_kind().is_none() {
                return Err(PlanError::UnknownTool {
                    task: task.id.clone(),
                    tool: task.tool.clone(),
                });
            }
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm: repeatedly remove zero-indegree tasks. Anything
        // left over sits on a cycle.
        let mut indegree: HashMap<&str, usize> = HashMap::with_capacity(self.tasks.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &self.tasks {
            indegree.entry(task.id.as_str()).or_insert(0);
            for dep in &task.dependencies {
                *indegree.entry(task.id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut removed = 0usize;

        while let Some(id) = queue.pop_front() {
            removed += 1;
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    if let Some(deg) = indegree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if removed < self.tasks.len() {
            let mut remaining: Vec<String> = indegree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            remaining.sort();
            return Err(PlanError::CycleDetected { tasks: remaining });
        }

        Ok(())
    }

    /// Render the plan for logs and front ends.
    pub fn format(&self) -> String {
        let mut s = format!("Plan {} ({} tasks)\n", self.plan_id, self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            let deps = if task.dependencies.is_empty() {
                "-".to_string()
            } else {
                task.dependencies.join(", ")
            };
            s.push_str(&format!(
                "{}. {} [{}] {} (after: {})\n",
                i + 1,
                task.id,
                task.tool,
                task.description,
                deps
            ));
        }
        s
    }
}

/// Adjacency index over a validated plan.
///
/// Built once so the scheduler resolves dependencies and dependents without
/// repeated linear scans of the task list.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl PlanGraph {
    /// Index a plan. The plan must have passed `validate`.
    pub fn build(plan: &ExecutionPlan) -> Self {
        let mut dependencies: HashMap<String, Vec<String>> =
            HashMap::with_capacity(plan.tasks.len());
        let mut dependents: HashMap<String, Vec<String>> =
            HashMap::with_capacity(plan.tasks.len());

        for task in &plan.tasks {
            dependencies.insert(task.id.clone(), task.dependencies.clone());
            dependents.entry(task.id.clone()).or_default();
        }
        for task in &plan.tasks {
            for dep in &task.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(task.id.clone());
            }
        }

        Self {
            dependencies,
            dependents,
        }
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All tasks reachable by following dependent edges from `id`,
    /// excluding `id` itself.
    pub fn transitive_dependents(&self, id: &str) -> HashSet<String> {
        self.walk(id, &self.dependents)
    }

    /// `id` plus every task it transitively depends on. The synthesis task's
    /// closure is the critical path of the run.
    pub fn dependency_closure(&self, id: &str) -> HashSet<String> {
        let mut closure = self.walk(id, &self.dependencies);
        closure.insert(id.to_string());
        closure
    }

    fn walk(&self, start: &str, edges: &HashMap<String, Vec<String>>) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(start);

        while let Some(id) = queue.pop_front() {
            if let Some(next) = edges.get(id) {
                for n in next {
                    if seen.insert(n.clone()) {
                        queue.push_back(n.as_str());
                    }
                }
            }
        }

        seen.remove(start);
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_branch_plan() -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("p1");
        plan.add_task(AnalysisTask::new(
            "doc",
            ToolKind::DocumentRetrieval,
            "Find the Q3 strategy section",
            "Q3 market strategy changes",
        ));
        plan.add_task(AnalysisTask::new(
            "sql",
            ToolKind::StructuredQuery,
            "Quantify the Q3 sales decline",
            "Q3 revenue by region and product",
        ));
        plan.add_task(
            AnalysisTask::new("final", ToolKind::FinalSynthesis, "Answer the question", "")
                .depends_on("doc")
                .depends_on("sql"),
        );
        plan
    }

    #[test]
    fn test_tool_kind_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ToolKind::parse("WebSearch"), None);
    }

    #[test]
    fn test_valid_plan_accepted() {
        let plan = two_branch_plan();
        assert!(plan.validate().is_ok());
        // Idempotent: a second pass reaches the same verdict.
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut plan = two_branch_plan();
        plan.add_task(AnalysisTask::new(
            "doc",
            ToolKind::DocumentRetrieval,
            "dup",
            "q",
        ));
        assert_eq!(
            plan.validate(),
            Err(PlanError::DuplicateId("doc".to_string()))
        );
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let mut plan = ExecutionPlan::new("p");
        let mut task = AnalysisTask::new("t1", ToolKind::DocumentRetrieval, "d", "q");
        task.tool = "WebSearch".to_string();
        plan.add_task(task);

        assert_eq!(
            plan.validate(),
            Err(PlanError::UnknownTool {
                task: "t1".to_string(),
                tool: "WebSearch".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut plan = ExecutionPlan::new("p");
        plan.add_task(
            AnalysisTask::new("t1", ToolKind::DocumentRetrieval, "d", "q").depends_on("ghost"),
        );

        assert_eq!(
            plan.validate(),
            Err(PlanError::UnknownDependency {
                task: "t1".to_string(),
                dependency: "ghost".to_string(),
            })
        );
    }

    #[test]
    fn test_direct_cycle_rejected() {
        let mut plan = ExecutionPlan::new("p");
        plan.add_task(
            AnalysisTask::new("a", ToolKind::DocumentRetrieval, "a", "q").depends_on("b"),
        );
        plan.add_task(
            AnalysisTask::new("b", ToolKind::StructuredQuery, "b", "q").depends_on("a"),
        );

        match plan.validate() {
            Err(PlanError::CycleDetected { tasks }) => {
                assert_eq!(tasks, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_tasks_blocked_behind_a_cycle_are_reported_with_it() {
        let mut plan = ExecutionPlan::new("p");
        plan.add_task(
            AnalysisTask::new("a", ToolKind::DocumentRetrieval, "a", "q").depends_on("b"),
        );
        plan.add_task(
            AnalysisTask::new("b", ToolKind::StructuredQuery, "b", "q").depends_on("a"),
        );
        plan.add_task(
            AnalysisTask::new("final", ToolKind::FinalSynthesis, "f", "")
                .depends_on("a")
                .depends_on("b"),
        );

        match plan.validate() {
            Err(PlanError::CycleDetected { tasks }) => {
                // Everything the elimination could not remove, cycle members
                // and the tasks stuck behind them alike.
                assert_eq!(
                    tasks,
                    vec!["a".to_string(), "b".to_string(), "final".to_string()]
                );
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut plan = ExecutionPlan::new("p");
        plan.add_task(
            AnalysisTask::new("a", ToolKind::DocumentRetrieval, "a", "q").depends_on("a"),
        );
        assert!(matches!(
            plan.validate(),
            Err(PlanError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_wire_shape_parses() {
        let json = r#"{
            "planId": "plan-7",
            "tasks": [
                {"id": "doc_1", "tool": "DocumentRetrieval", "description": "Find strategy notes", "subQuery": "Q3 strategy", "dependencies": []},
                {"id": "final", "tool": "FinalSynthesis", "description": "Answer", "subQuery": "", "dependencies": ["doc_1"]}
            ]
        }"#;

        let plan: ExecutionPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.plan_id, "plan-7");
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].sub_query, "Q3 strategy");
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_graph_adjacency() {
        let plan = two_branch_plan();
        let graph = PlanGraph::build(&plan);

        assert_eq!(graph.dependencies_of("final"), &["doc", "sql"]);
        assert_eq!(graph.dependents_of("doc"), &["final"]);
        assert!(graph.dependents_of("final").is_empty());
    }

    #[test]
    fn test_transitive_walks() {
        let mut plan = ExecutionPlan::new("p");
        plan.add_task(AnalysisTask::new("a", ToolKind::DocumentRetrieval, "a", "q"));
        plan.add_task(
            AnalysisTask::new("b", ToolKind::StructuredQuery, "b", "q").depends_on("a"),
        );
        plan.add_task(
            AnalysisTask::new("c", ToolKind::FinalSynthesis, "c", "").depends_on("b"),
        );
        let graph = PlanGraph::build(&plan);

        let downstream = graph.transitive_dependents("a");
        assert!(downstream.contains("b") && downstream.contains("c"));

        let closure = graph.dependency_closure("c");
        assert!(closure.contains("a") && closure.contains("b") && closure.contains("c"));
    }

    #[test]
    fn test_synthesis_lookup() {
        let plan = two_branch_plan();
        assert_eq!(plan.synthesis_task().map(|t| t.id.as_str()), Some("final"));
        assert!(ExecutionPlan::new("empty").synthesis_task().is_none());
    }

    #[test]
    fn test_plan_format() {
        let plan = two_branch_plan();
        let rendered = plan.format();
        assert!(rendered.contains("3 tasks"));
        assert!(rendered.contains("[FinalSynthesis]"));
        assert!(rendered.contains("after: doc, sql"));
    }
}

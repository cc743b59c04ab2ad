//! Planner
//!
//! Decomposes a user query into a validated execution plan:
//! - prompts the model with the tool vocabulary and the plan JSON shape
//! - treats the response as untrusted input: defensive JSON extraction,
//!   schema parse, structural validation
//! - on rejection, retries with a corrective follow-up naming the defect,
//!   up to a bounded budget

use crate::error::{PlanGenerationError, PlanError};
use crate::llm::LanguageModel;
use crate::plan::{ExecutionPlan, ToolKind};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a data analysis planner. Decompose the user's request into a JSON execution plan.

Available tools:
- "DocumentRetrieval": semantic search over unstructured documents (reports, PDFs, wikis)
- "StructuredQuery": query against the relational store (metrics, aggregates, rankings)
- "FinalSynthesis": combines the outputs of all other tasks into the final answer

Rules:
- Return a single JSON object and nothing else:
  {"planId": "string", "tasks": [{"id": "string", "tool": "string", "description": "string", "subQuery": "string", "dependencies": ["id"]}]}
- Task ids are short unique strings. Dependencies may only reference ids of tasks listed earlier.
- Exactly one task uses "FinalSynthesis". It comes last and lists every other task id in its dependencies.
- Keep descriptions short and human-readable; put the full retrieval or query text in subQuery."#;

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Corrective retries after the first attempt
    pub max_retries: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

/// Turns one user query into one validated plan.
pub struct Planner {
    model: Arc<dyn LanguageModel>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::with_config(model, PlannerConfig::default())
    }

    pub fn with_config(model: Arc<dyn LanguageModel>, config: PlannerConfig) -> Self {
        Self { model, config }
    }

    /// Create a plan for the query.
    ///
    /// On success the plan passes validation and carries exactly one
    /// synthesis task depending on every other task. Fails with
    /// `PlanGenerationError` once the retry budget is spent.
    pub async fn create_plan(
        &self,
        user_query: &str,
    ) -> Result<ExecutionPlan, PlanGenerationError> {
        let attempts = self.config.max_retries + 1;
        let mut prompt = user_query.to_string();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let response = match self
                .model
                .ask(&prompt, Some(PLANNER_SYSTEM_PROMPT), true)
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!("Planning attempt {}/{} transport error: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            match self.parse_and_check(&response) {
                Ok(mut plan) => {
                    if plan.plan_id.is_empty() {
                        plan.plan_id = uuid::Uuid::new_v4().to_string();
                    }
                    info!(
                        "Plan {} created on attempt {}/{} with {} tasks",
                        plan.plan_id,
                        attempt,
                        attempts,
                        plan.tasks.len()
                    );
                    return Ok(plan);
                }
                Err(reason) => {
                    warn!(
                        "Planning attempt {}/{} rejected: {}",
                        attempt, attempts, reason
                    );
                    last_error = reason.clone();
                    prompt = format!(
                        "{}\n\nYour previous plan was rejected: {}. Return a corrected JSON plan that fixes this and follows every rule.",
                        user_query, reason
                    );
                }
            }
        }

        Err(PlanGenerationError {
            attempts,
            last_error,
        })
    }

    /// Parse untrusted model output into a plan and check every structural
    /// invariant plus the synthesis convention.
    fn parse_and_check(&self, response: &str) -> Result<ExecutionPlan, String> {
        let json = extract_json(response).ok_or("response contains no JSON object")?;
        let plan: ExecutionPlan =
            serde_json::from_str(json).map_err(|e| format!("plan JSON does not parse: {}", e))?;

        if plan.tasks.is_empty() {
            return Err("plan has no tasks".to_string());
        }

        plan.validate().map_err(|e: PlanError| e.to_string())?;
        Self::check_synthesis_convention(&plan)?;
        Ok(plan)
    }

    /// The synthesis task aggregates the whole result set, so it must exist
    /// exactly once and depend on every other task. The validator stays
    /// agnostic of this; the repair loop owns it.
    fn check_synthesis_convention(plan: &ExecutionPlan) -> Result<(), String> {
        let synthesis: Vec<_> = plan
            .tasks
            .iter()
            .filter(|t| t.tool_kind() == Some(ToolKind::FinalSynthesis))
            .collect();

        let synthesis = match synthesis.as_slice() {
            [one] => *one,
            [] => return Err("plan has no FinalSynthesis task".to_string()),
            _ => return Err("plan has more than one FinalSynthesis task".to_string()),
        };

        let declared: HashSet<&str> = synthesis.dependencies.iter().map(String::as_str).collect();
        for task in &plan.tasks {
            if task.id != synthesis.id && !declared.contains(task.id.as_str()) {
                return Err(format!(
                    "FinalSynthesis task {} must depend on every other task, missing {}",
                    synthesis.id, task.id
                ));
            }
        }

        Ok(())
    }
}

/// Extract the first balanced JSON object from text. Models wrap JSON in
/// prose and code fences often enough that plain `from_str` is not safe.
fn extract_json(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = start;

    for (i, c) in s[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if end > start {
        Some(&s[start..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted responses and records the prompts it saw.
    struct ScriptedModel {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn ask(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            _structured: bool,
        ) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    const VALID_PLAN: &str = r#"{
        "planId": "p1",
        "tasks": [
            {"id": "doc", "tool": "DocumentRetrieval", "description": "Find the strategy section", "subQuery": "Q3 strategy", "dependencies": []},
            {"id": "sql", "tool": "StructuredQuery", "description": "Quantify the decline", "subQuery": "Q3 revenue by region", "dependencies": []},
            {"id": "final", "tool": "FinalSynthesis", "description": "Answer the question", "subQuery": "", "dependencies": ["doc", "sql"]}
        ]
    }"#;

    const CYCLIC_PLAN: &str = r#"{
        "planId": "p2",
        "tasks": [
            {"id": "a", "tool": "DocumentRetrieval", "description": "a", "subQuery": "q", "dependencies": ["b"]},
            {"id": "b", "tool": "StructuredQuery", "description": "b", "subQuery": "q", "dependencies": ["a"]},
            {"id": "final", "tool": "FinalSynthesis", "description": "f", "subQuery": "", "dependencies": ["a", "b"]}
        ]
    }"#;

    #[tokio::test]
    async fn test_valid_plan_first_attempt() {
        let model = ScriptedModel::new(&[VALID_PLAN]);
        let planner = Planner::new(model.clone());

        let plan = planner.create_plan("why did sales drop").await.unwrap();
        assert_eq!(plan.plan_id, "p1");
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_wrapped_in_prose_still_parses() {
        let wrapped = format!("Here is the plan:\n```json\n{}\n```\nDone.", VALID_PLAN);
        let model = ScriptedModel::new(&[&wrapped]);
        let planner = Planner::new(model);

        assert!(planner.create_plan("q").await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_twice_then_valid_within_budget() {
        // Scenario: two garbage responses, then a good plan. Budget of two
        // retries means three attempts, so this succeeds.
        let model = ScriptedModel::new(&["not json", "{\"tasks\": []}", VALID_PLAN]);
        let planner = Planner::with_config(model.clone(), PlannerConfig { max_retries: 2 });

        let plan = planner.create_plan("q").await.unwrap();
        assert_eq!(plan.tasks.len(), 3);

        // Follow-ups carry the rejection reason back to the model.
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("rejected"));
    }

    #[tokio::test]
    async fn test_budget_of_one_retry_fails() {
        let model = ScriptedModel::new(&["not json", "still not json", VALID_PLAN]);
        let planner = Planner::with_config(model, PlannerConfig { max_retries: 1 });

        let err = planner.create_plan("q").await.unwrap_err();
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn test_unrepaired_cycle_exhausts_budget() {
        let model = ScriptedModel::new(&[CYCLIC_PLAN, CYCLIC_PLAN, CYCLIC_PLAN]);
        let planner = Planner::with_config(model, PlannerConfig { max_retries: 2 });

        let err = planner.create_plan("q").await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.last_error.contains("cycle"));
    }

    #[tokio::test]
    async fn test_repaired_cycle_recovers() {
        let model = ScriptedModel::new(&[CYCLIC_PLAN, VALID_PLAN]);
        let planner = Planner::new(model.clone());

        assert!(planner.create_plan("q").await.is_ok());
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains("cycle"));
    }

    #[tokio::test]
    async fn test_synthesis_must_cover_all_tasks() {
        let partial = r#"{
            "planId": "p3",
            "tasks": [
                {"id": "doc", "tool": "DocumentRetrieval", "description": "d", "subQuery": "q", "dependencies": []},
                {"id": "sql", "tool": "StructuredQuery", "description": "s", "subQuery": "q", "dependencies": []},
                {"id": "final", "tool": "FinalSynthesis", "description": "f", "subQuery": "", "dependencies": ["doc"]}
            ]
        }"#;
        let model = ScriptedModel::new(&[partial]);
        let planner = Planner::with_config(model, PlannerConfig { max_retries: 0 });

        let err = planner.create_plan("q").await.unwrap_err();
        assert!(err.last_error.contains("must depend on every other task"));
    }

    #[tokio::test]
    async fn test_missing_synthesis_rejected() {
        let headless = r#"{
            "planId": "p4",
            "tasks": [
                {"id": "doc", "tool": "DocumentRetrieval", "description": "d", "subQuery": "q", "dependencies": []}
            ]
        }"#;
        let model = ScriptedModel::new(&[headless]);
        let planner = Planner::with_config(model, PlannerConfig { max_retries: 0 });

        let err = planner.create_plan("q").await.unwrap_err();
        assert!(err.last_error.contains("no FinalSynthesis"));
    }

    #[tokio::test]
    async fn test_missing_plan_id_gets_generated() {
        let anonymous = r#"{
            "tasks": [
                {"id": "doc", "tool": "DocumentRetrieval", "description": "d", "subQuery": "q", "dependencies": []},
                {"id": "final", "tool": "FinalSynthesis", "description": "f", "subQuery": "", "dependencies": ["doc"]}
            ]
        }"#;
        let model = ScriptedModel::new(&[anonymous]);
        let planner = Planner::new(model);

        let plan = planner.create_plan("q").await.unwrap();
        assert!(!plan.plan_id.is_empty());
    }

    #[test]
    fn test_extract_json_handles_braces_in_strings() {
        let text = r#"note {"key": "has } brace"} trailing"#;
        assert_eq!(extract_json(text), Some(r#"{"key": "has } brace"}"#));
        assert_eq!(extract_json("no object here"), None);
    }
}

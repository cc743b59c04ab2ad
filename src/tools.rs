//! Tool Dispatch Registry
//!
//! Maps each tool kind to the collaborator able to execute it, behind one
//! invocation contract:
//! - `DocumentRetrieval` and `StructuredQuery` delegate the sub-query to
//!   their backend service
//! - `FinalSynthesis` composes a prompt from the collected dependency
//!   outputs and delegates to the language model
//!
//! The registry is configured once and shared read-only across concurrent
//! executions.

use crate::backends::ToolBackend;
use crate::llm::LanguageModel;
use crate::plan::ToolKind;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One dependency output carried into a downstream task.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub task_id: String,
    /// The originating task's description. Synthesis labels entries with
    /// this, not the raw sub-query, so the model can attribute sources.
    pub description: String,
    pub output: String,
}

/// Everything a tool invocation may read from the run.
///
/// `outputs` holds exactly the completed outputs of the task's declared
/// dependencies, in plan order. `unavailable` lists sibling branches whose
/// failure was absorbed; only the synthesis prompt surfaces them.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// The running task's description.
    pub objective: String,
    pub outputs: Vec<ContextEntry>,
    pub unavailable: Vec<String>,
}

impl TaskContext {
    pub fn get(&self, task_id: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|e| e.task_id == task_id)
            .map(|e| e.output.as_str())
    }
}

/// Uniform invocation contract the engine dispatches through.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn execute(&self, sub_query: &str, context: &TaskContext) -> Result<String>;
}

/// Delegates to the document retrieval service. Dependency outputs are not
/// forwarded; the service takes a self-contained query.
pub struct DocumentRetrievalTool {
    backend: Arc<dyn ToolBackend>,
}

impl DocumentRetrievalTool {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolAdapter for DocumentRetrievalTool {
    async fn execute(&self, sub_query: &str, _context: &TaskContext) -> Result<String> {
        self.backend.invoke(sub_query).await
    }
}

/// Delegates to the structured query service.
pub struct StructuredQueryTool {
    backend: Arc<dyn ToolBackend>,
}

impl StructuredQueryTool {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolAdapter for StructuredQueryTool {
    async fn execute(&self, sub_query: &str, _context: &TaskContext) -> Result<String> {
        self.backend.invoke(sub_query).await
    }
}

const SYNTHESIS_SYSTEM_PROMPT: &str =
    "You are a senior business analyst. Reconcile the partial results below \
     and answer the question using only the supplied contexts. Qualitative \
     document findings and quantitative database figures may conflict; when \
     they do, say so and weigh them explicitly. If a branch is marked \
     unavailable, state what is missing instead of guessing.";

/// Terminal aggregation step.
///
/// Ignores its own sub-query: the prompt is built from the dependency
/// outputs, each labeled by its originating task's description.
pub struct SynthesisTool {
    model: Arc<dyn LanguageModel>,
}

impl SynthesisTool {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn compose_prompt(context: &TaskContext) -> String {
        let mut prompt = format!(
            "Answer this question from the collected analysis results:\n\"{}\"\n\n## Collected results\n",
            context.objective
        );

        for entry in &context.outputs {
            prompt.push_str(&format!("\n### {}\n{}\n", entry.description, entry.output));
        }

        if !context.unavailable.is_empty() {
            prompt.push_str("\n## Unavailable branches\n");
            for description in &context.unavailable {
                prompt.push_str(&format!("- {}: [unavailable]\n", description));
            }
        }

        prompt
    }
}

#[async_trait]
impl ToolAdapter for SynthesisTool {
    async fn execute(&self, _sub_query: &str, context: &TaskContext) -> Result<String> {
        let prompt = Self::compose_prompt(context);
        debug!(
            "Synthesizing from {} results, {} unavailable",
            context.outputs.len(),
            context.unavailable.len()
        );
        self.model
            .ask(&prompt, Some(SYNTHESIS_SYSTEM_PROMPT), false)
            .await
    }
}

/// Kind-to-adapter mapping. Immutable after construction.
pub struct ToolRegistry {
    adapters: HashMap<ToolKind, Arc<dyn ToolAdapter>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// The standard three-tool configuration.
    pub fn standard(
        model: Arc<dyn LanguageModel>,
        documents: Arc<dyn ToolBackend>,
        database: Arc<dyn ToolBackend>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(
            ToolKind::DocumentRetrieval,
            Arc::new(DocumentRetrievalTool::new(documents)),
        );
        registry.register(
            ToolKind::StructuredQuery,
            Arc::new(StructuredQueryTool::new(database)),
        );
        registry.register(ToolKind::FinalSynthesis, Arc::new(SynthesisTool::new(model)));
        registry
    }

    pub fn register(&mut self, kind: ToolKind, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn resolve(&self, kind: ToolKind) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

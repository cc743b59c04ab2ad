//! Insight Agent - Entry Point
//!
//! Plans and answers one analytical query from the command line. With no
//! tool service URLs configured, the retrieval tools serve the bundled
//! sample fixtures so the pipeline can run end to end.

use insight_agent::{
    AnalysisAgent, ChatClient, Config, HttpToolBackend, StaticToolBackend, ToolBackend,
    ToolRegistry,
};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEMO_QUERY: &str = "Combine the market strategy section of the Q3 report with the Q3 \
                          sales decline figures in the database, and explain the likely causes \
                          of the decline.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Insight Agent v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: insight-agent [QUERY]");
        println!();
        println!("Runs the planner and execution engine over QUERY (or a built-in");
        println!("demo question when omitted).");
        println!();
        println!("Environment variables:");
        println!("  OPENAI_API_KEY             Language model credential (required)");
        println!("  OPENAI_BASE_URL            OpenAI-compatible endpoint");
        println!("  INSIGHT_MODEL              Model identifier");
        println!("  INSIGHT_MAX_PLAN_RETRIES   Corrective planning retries (default: 2)");
        println!("  INSIGHT_MAX_CONCURRENCY    Concurrent tool invocations (default: 4)");
        println!("  INSIGHT_TASK_TIMEOUT_SECS  Per-task timeout (default: 120)");
        println!("  INSIGHT_DOC_SERVICE_URL    Document retrieval service");
        println!("  INSIGHT_SQL_SERVICE_URL    Structured query service");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Insight Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let model = Arc::new(ChatClient::from_config(&config));
    if !model.is_available() {
        warn!("OPENAI_API_KEY not set; planning and synthesis calls will fail");
    }

    let documents: Arc<dyn ToolBackend> = match &config.doc_service_url {
        Some(url) => Arc::new(HttpToolBackend::new(url)),
        None => {
            warn!("INSIGHT_DOC_SERVICE_URL not set; serving sample documents");
            Arc::new(StaticToolBackend::sample_documents())
        }
    };
    let database: Arc<dyn ToolBackend> = match &config.sql_service_url {
        Some(url) => Arc::new(HttpToolBackend::new(url)),
        None => {
            warn!("INSIGHT_SQL_SERVICE_URL not set; serving sample rows");
            Arc::new(StaticToolBackend::sample_database())
        }
    };

    let registry = Arc::new(ToolRegistry::standard(model.clone(), documents, database));
    let agent = AnalysisAgent::with_config(model, registry, &config);

    let query = if args.is_empty() {
        DEMO_QUERY.to_string()
    } else {
        args.join(" ")
    };

    let outcome = agent.run_query(&query).await?;

    println!("{}", outcome.plan.format());
    println!("{}", outcome.final_answer);

    Ok(())
}

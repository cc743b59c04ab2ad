//! Configuration management

use anyhow::Result;

/// Agent configuration.
///
/// Credentials and endpoints are injected from the environment here and
/// passed down explicitly; nothing else in the crate reads env vars.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the language model (optional; calls fail without it)
    pub llm_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    pub llm_base_url: String,

    /// Model identifier
    pub model: String,

    /// Corrective retries after the first planning attempt
    pub max_plan_retries: usize,

    /// Concurrent tool invocations per run
    pub max_concurrency: usize,

    /// Per-task timeout in seconds
    pub task_timeout_secs: u64,

    /// Document retrieval service URL (fixture data when unset)
    pub doc_service_url: Option<String>,

    /// Structured query service URL (fixture data when unset)
    pub sql_service_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: None,
            llm_base_url: crate::llm::DEFAULT_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            max_plan_retries: 2,
            max_concurrency: 4,
            task_timeout_secs: 120,
            doc_service_url: None,
            sql_service_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let llm_api_key = std::env::var("OPENAI_API_KEY").ok();
        let llm_base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.llm_base_url);
        let model = std::env::var("INSIGHT_MODEL").unwrap_or(defaults.model);

        let max_plan_retries = std::env::var("INSIGHT_MAX_PLAN_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_plan_retries);

        let max_concurrency = std::env::var("INSIGHT_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.max_concurrency);

        let task_timeout_secs = std::env::var("INSIGHT_TASK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.task_timeout_secs);

        let doc_service_url = std::env::var("INSIGHT_DOC_SERVICE_URL").ok();
        let sql_service_url = std::env::var("INSIGHT_SQL_SERVICE_URL").ok();

        Ok(Self {
            llm_api_key,
            llm_base_url,
            model,
            max_plan_retries,
            max_concurrency,
            task_timeout_secs,
            doc_service_url,
            sql_service_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_plan_retries, 2);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.llm_base_url.starts_with("https://"));
    }
}

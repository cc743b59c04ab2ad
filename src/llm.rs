//! Language Model Transport
//!
//! OpenAI-compatible chat completions client. The transport does exactly one
//! round trip per `ask`: no retries, no rate limiting. Retry policy belongs
//! to the planner, which owns the repair loop for malformed plans.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Low temperature keeps plan emission and synthesis deterministic enough
/// to parse and compare.
const TEMPERATURE: f32 = 0.2;

/// The language-model collaborator contract.
///
/// `structured` asks the endpoint for machine-parseable JSON output where
/// supported; callers still must parse defensively.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn ask(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        structured: bool,
    ) -> Result<String>;
}

/// Chat message in a completion request.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

/// API request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// API response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat completions client.
///
/// Endpoint, credential, and model id are injected explicitly so test
/// doubles and alternate deployments can coexist; nothing here reads
/// process-wide globals.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_key: Option<&str>, base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(|s| s.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.llm_api_key.as_deref(),
            &config.llm_base_url,
            &config.model,
        )
    }

    /// Check if a credential is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn ask(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        structured: bool,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set - language model unavailable"))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: TEMPERATURE,
            response_format: structured.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        };

        debug!(
            "Calling chat API: model={}, prompt_len={}, structured={}",
            self.model,
            prompt.len(),
            structured
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("chat API error {}: {}", status, text);
        }

        let result: ChatResponse = response.json().await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat API returned an empty completion"))?;

        info!(
            "Chat response: model={}, response_len={}",
            self.model,
            content.len()
        );

        Ok(content)
    }
}

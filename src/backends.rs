//! Tool Backends
//!
//! Collaborator services behind the retrieval tools. The core never performs
//! document search or SQL execution itself; it hands the sub-query to one of
//! these backends and treats the returned text as opaque.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A retrieval collaborator: document search service or structured query
/// service. Both expose the same invoke shape.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(&self, sub_query: &str) -> Result<String>;
}

/// HTTP-backed tool service.
///
/// POSTs `{"query": ...}` to the configured endpoint and expects
/// `{"result": ...}` back. Indexing and query planning are the service's
/// concern, not ours.
pub struct HttpToolBackend {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    result: String,
}

impl HttpToolBackend {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    async fn invoke(&self, sub_query: &str) -> Result<String> {
        debug!("Invoking tool service {}: {}", self.endpoint, sub_query);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&InvokeRequest { query: sub_query })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("tool service error {}: {}", status, text);
        }

        let body: InvokeResponse = response.json().await?;
        Ok(body.result)
    }
}

/// Canned-response backend for demo runs and tests.
///
/// Mirrors the fixture data the system ships for running without live
/// services: a document excerpt and a small result set.
pub struct StaticToolBackend {
    response: String,
}

impl StaticToolBackend {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
        }
    }

    /// Sample document-retrieval fixture.
    pub fn sample_documents() -> Self {
        Self::new(
            "[Q3 Report, p.14] During Q3 the East region ran a partner \
             optimization program; 35% of core distributors were in contract \
             re-signing, leaving some stores out of stock for 2-3 weeks. The \
             Shanghai logistics hub upgrade also slowed flagship-series \
             turnover.",
        )
    }

    /// Sample structured-query fixture.
    pub fn sample_database() -> Self {
        Self::new(
            r#"[{"region":"East","product":"Flagship phones","growth":"-28.4%","impact":"High"},{"region":"East","product":"Wearables","growth":"-12.1%","impact":"Mid"},{"region":"Central","product":"Flagship phones","growth":"-5.2%","impact":"Low"}]"#,
        )
    }
}

#[async_trait]
impl ToolBackend for StaticToolBackend {
    async fn invoke(&self, sub_query: &str) -> Result<String> {
        debug!("Static backend serving fixture for: {}", sub_query);
        Ok(self.response.clone())
    }
}

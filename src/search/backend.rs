//! Remote search backend
//!
//! The backend is an opaque service: it receives `{query, limit, collections}`
//! and answers with an ordered list of `{source, content, score}`. Every
//! failure is reported as [`MeshError::Backend`] so the controller can fall
//! back to the local corpus.

use crate::error::{MeshError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Collections queried when the configuration names none
pub const DEFAULT_COLLECTIONS: &[&str] = &["llama_research", "research_corpus"];

/// Body sent to the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteQuery {
    pub query: String,
    pub limit: u32,
    pub collections: Vec<String>,
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub source: String,
    pub content: String,
    pub score: f32,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &RemoteQuery) -> Result<Vec<SearchResult>>;
}

/// JSON-over-HTTP search service client
pub struct HttpSearchBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: &RemoteQuery) -> Result<Vec<SearchResult>> {
        debug!("POST {} query={:?}", self.endpoint, query.query);

        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await
            .map_err(|e| MeshError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MeshError::Backend(format!("HTTP {}", response.status())));
        }

        response
            .json::<Vec<SearchResult>>()
            .await
            .map_err(|e| MeshError::Backend(format!("failed to decode response: {}", e)))
    }
}

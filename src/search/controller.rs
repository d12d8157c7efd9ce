//! Throttle → remote search → local fallback

use crate::error::{MeshError, Result};
use crate::search::backend::{RemoteQuery, SearchBackend, SearchResult, DEFAULT_COLLECTIONS};
use crate::search::corpus::LocalCorpus;
use crate::search::throttle::SoftThrottle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Budget for a single remote search attempt
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum number of lines taken from the local corpus
pub const FALLBACK_LIMIT: usize = 3;

const FALLBACK_SCORE: f32 = 0.5;
const ESCALATION_SCORE: f32 = 0.3;
const DEFAULT_KEYWORD: &str = "mesh";
const DEFAULT_MAX_RESULTS: u32 = 5;

/// Search request as delivered by the request boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub agent_id: String,
    pub query: String,
    #[serde(default)]
    pub max_results: u32,
}

impl SearchRequest {
    pub fn new(agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            query: query.into(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrigin {
    Remote,
    LocalFallback,
    Throttled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub reasoning_context: String,
    pub origin: ResponseOrigin,
}

impl SearchResponse {
    /// Fixed load-shedding answer for a redundant query
    pub fn throttled() -> Self {
        Self {
            results: Vec::new(),
            reasoning_context: "THROTTLED: Redundant semantic search detected.".to_string(),
            origin: ResponseOrigin::Throttled,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.origin == ResponseOrigin::Throttled
    }
}

/// Orchestrates the deduplicated, fallback-chained search path
pub struct SearchController {
    throttle: SoftThrottle,
    backend: Option<Arc<dyn SearchBackend>>,
    corpus: Arc<dyn LocalCorpus>,
    collections: Vec<String>,
    remote_timeout: Duration,
}

impl SearchController {
    pub fn new(
        throttle: SoftThrottle,
        backend: Option<Arc<dyn SearchBackend>>,
        corpus: Arc<dyn LocalCorpus>,
    ) -> Self {
        Self {
            throttle,
            backend,
            corpus,
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
            remote_timeout: REMOTE_TIMEOUT,
        }
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        if !collections.is_empty() {
            self.collections = collections;
        }
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Run the search chain. Only cancellation is reported as an error.
    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        if cancel.is_cancelled() {
            return Err(MeshError::Cancelled);
        }

        let Some(stamp) = self.throttle.stamp(&request.query) else {
            info!(
                "Throttled redundant search from {}: {}",
                request.agent_id, request.query
            );
            return Ok(SearchResponse::throttled());
        };

        info!("Grounded search from {}: {}", request.agent_id, request.query);

        let outcome = self.grounded_search(request, cancel).await;
        if matches!(outcome, Err(MeshError::Cancelled)) {
            // The caller got no answer, so a retry must not be throttled
            self.throttle.release(&request.query, stamp);
        }
        outcome
    }

    async fn grounded_search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        let Some(backend) = &self.backend else {
            return self.local_fallback(&request.query, cancel).await;
        };

        let query = RemoteQuery {
            query: request.query.clone(),
            limit: if request.max_results == 0 {
                DEFAULT_MAX_RESULTS
            } else {
                request.max_results
            },
            collections: self.collections.clone(),
        };

        let attempt = tokio::select! {
            _ = cancel.cancelled() => return Err(MeshError::Cancelled),
            attempt = tokio::time::timeout(self.remote_timeout, backend.search(&query)) => attempt,
        };

        match attempt {
            Ok(Ok(results)) => Ok(SearchResponse {
                results,
                reasoning_context: "Grounded in remote search service.".to_string(),
                origin: ResponseOrigin::Remote,
            }),
            Ok(Err(e)) => {
                warn!("Search service unavailable ({}), falling back to local corpus", e);
                self.local_fallback(&request.query, cancel).await
            }
            Err(_) => {
                warn!(
                    "Search service timed out after {:?}, falling back to local corpus",
                    self.remote_timeout
                );
                self.local_fallback(&request.query, cancel).await
            }
        }
    }

    async fn local_fallback(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        let keyword = query
            .split_whitespace()
            .next()
            .unwrap_or(DEFAULT_KEYWORD)
            .to_string();

        let corpus = Arc::clone(&self.corpus);
        let scan = tokio::task::spawn_blocking(move || corpus.scan(&keyword, FALLBACK_LIMIT));

        let lines = tokio::select! {
            _ = cancel.cancelled() => return Err(MeshError::Cancelled),
            joined = scan => joined.unwrap_or_else(|e| {
                warn!("Local corpus scan failed: {}", e);
                Vec::new()
            }),
        };

        let mut results: Vec<SearchResult> = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .take(FALLBACK_LIMIT)
            .map(|line| fallback_result(line))
            .collect();

        if results.is_empty() {
            results.push(SearchResult {
                source: "Operational Fallback".to_string(),
                content: "No direct keyword matches in local cache. Escalating to base reasoning."
                    .to_string(),
                score: ESCALATION_SCORE,
            });
        }

        Ok(SearchResponse {
            results,
            reasoning_context: "Grounded via local keyword fallback (search service offline)."
                .to_string(),
            origin: ResponseOrigin::LocalFallback,
        })
    }
}

fn fallback_result(line: &str) -> SearchResult {
    let (source, content) = match line.split_once(':') {
        Some((source, content)) => (source.to_string(), content),
        None => ("Research Corpus".to_string(), line),
    };
    SearchResult {
        source,
        content: content.trim().to_string(),
        score: FALLBACK_SCORE,
    }
}

use crate::error::{Result, EvalError};
use crate::retrieval::types::{FusedEntry, FusedResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SERVICE: &str = "cohere-rerank";
pub const DEFAULT_RERANK_URL: &str = "https://api.cohere.com/v2/rerank";

/// Secondary relevance pass over a fused list.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, question: &str, fused: FusedResult) -> Result<FusedResult>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f64,
}

/// Cohere rerank API client
pub struct CohereReranker {
    client: Client,
    api_key: String,
    model: String,
    url: String,
    top_n: Option<usize>,
}

impl CohereReranker {
    pub fn new(
        api_key: String,
        model: String,
        top_n: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            EvalError::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            api_key,
            model,
            url: DEFAULT_RERANK_URL.to_string(),
            top_n,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Reorder `fused` by the reranker's hits. Hits pointing outside the list or at
/// an already-placed entry are ignored; entries the reranker did not return are dropped.
fn apply_hits(fused: FusedResult, hits: Vec<RerankHit>) -> Result<FusedResult> {
    let entries = fused.entries();
    let mut reordered: Vec<FusedEntry> = Vec::with_capacity(hits.len());
    let mut placed = vec![false; entries.len()];

    for hit in hits {
        match placed.get_mut(hit.index) {
            Some(slot) if !*slot => {
                *slot = true;
                let mut entry = entries[hit.index].clone();
                entry.score = hit.relevance_score;
                reordered.push(entry);
            }
            _ => log::debug!("Ignoring rerank hit with index {}", hit.index),
        }
    }

    if reordered.is_empty() && !entries.is_empty() {
        return Err(EvalError::collaborator(SERVICE, "Rerank response matched no documents"));
    }

    Ok(FusedResult::from_ordered(reordered))
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(&self, question: &str, fused: FusedResult) -> Result<FusedResult> {
        if fused.is_empty() {
            return Ok(fused);
        }

        let request = RerankRequest {
            model: &self.model,
            query: question,
            documents: fused.entries().iter().map(|e| e.content.as_str()).collect(),
            top_n: self.top_n,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EvalError::collaborator(SERVICE, format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(EvalError::collaborator(SERVICE, format!("HTTP {}: {}", status, body)));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| EvalError::collaborator(SERVICE, format!("Malformed response: {}", e)))?;

        apply_hits(fused, parsed.results)
    }
}

use crate::cache::QueryEmbeddingCache;
use crate::error::{Result, EvalError};
use crate::llm::openai::OpenAIClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SERVICE: &str = "openai-embeddings";

/// Turns a question into a dense vector for the vector retriever.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client with an optional LRU cache in front of it.
pub struct OpenAIEmbedder {
    http: OpenAIClient,
    model: String,
    cache: Option<Arc<QueryEmbeddingCache>>,
}

impl OpenAIEmbedder {
    pub fn new(http: OpenAIClient, model: String) -> Self {
        Self { http, model, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<QueryEmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(text) {
                log::debug!("Embedding cache hit for query: {}", text);
                return Ok(cached);
            }
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };
        let response: EmbeddingResponse =
            self.http.post_json(SERVICE, "embeddings", &request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| EvalError::collaborator(SERVICE, "Empty response from embeddings API"))?;

        if let Some(cache) = &self.cache {
            cache.put(text.to_string(), embedding.clone());
        }

        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cached_query_skips_network() {
        // Unreachable endpoint: only a cache hit can succeed
        let http = OpenAIClient::new(
            "k".into(),
            "http://127.0.0.1:9/v1",
            Duration::from_millis(200),
            0,
        )
        .unwrap();
        let cache = Arc::new(QueryEmbeddingCache::new(8));
        cache.put("oats".to_string(), vec![0.5, 0.5]);

        let embedder = OpenAIEmbedder::new(http, "text-embedding-3-small".into()).with_cache(cache);
        assert_eq!(embedder.embed_query("oats").await.unwrap(), vec![0.5, 0.5]);
        assert!(embedder.embed_query("bran").await.is_err());
    }

    #[test]
    fn test_request_shape() {
        let request = EmbeddingRequest { model: "m", input: vec!["q"] };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["input"][0], "q");
        assert_eq!(value["model"], "m");
    }
}

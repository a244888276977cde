//! Retrieval strategies: individual retrievers, rank fusion, reranking, and the
//! strategy registry that turns a `StrategyConfig` into something runnable.

pub mod bm25;
pub mod fusion;
pub mod rerank;
pub mod strategy;
pub mod types;
pub mod vector;

use crate::error::Result;
use async_trait::async_trait;

pub use bm25::Bm25Retriever;
pub use fusion::{reciprocal_rank_fusion, FusionParams, DEFAULT_RRF_K};
pub use rerank::{CohereReranker, Reranker};
pub use strategy::{RetrievalStrategy, StrategyConfig, StrategyId, StrategyRegistry};
pub use types::{FusedEntry, FusedResult, RetrievedContext};
pub use vector::VectorRetriever;

/// Name the dense retriever registers under
pub const DENSE_RETRIEVER: &str = "dense";
/// Name the lexical retriever registers under
pub const BM25_RETRIEVER: &str = "bm25";

/// A single retrieval source.
///
/// Implementations return at most `k` contexts sorted by descending relevance,
/// ranked 1..=n, with `source_retriever` set to `name()`.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedContext>>;
}

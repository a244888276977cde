use serde::{Deserialize, Serialize};

/// One context returned by a single retriever.
///
/// `rank` is 1-based within the producing retriever's own list and carries no
/// meaning across retrievers until fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub source_retriever: String,
    pub rank: usize,
    pub content: String,
    pub score: f64,
}

/// A context after rank fusion (and possibly reranking).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedEntry {
    pub content: String,
    pub score: f64,
    pub rank: usize,
    /// Retrievers whose lists contained this content, in input list order.
    pub contributors: Vec<String>,
}

/// Ordered, content-deduplicated output of the fusion combiner.
///
/// Ranks are always 1..=len in list order; constructors enforce it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FusedResult {
    entries: Vec<FusedEntry>,
}

impl FusedResult {
    /// Build from entries already in final order. Ranks are reassigned and
    /// later duplicates of the same content are dropped.
    pub fn from_ordered(entries: Vec<FusedEntry>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|e| seen.insert(e.content.clone()))
            .enumerate()
            .map(|(idx, mut e)| {
                e.rank = idx + 1;
                e
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[FusedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten to contexts for generation and scoring; the source is the joined
    /// contributor list (e.g. `dense+bm25`).
    pub fn into_contexts(self) -> Vec<RetrievedContext> {
        self.entries
            .into_iter()
            .map(|e| RetrievedContext {
                source_retriever: e.contributors.join("+"),
                rank: e.rank,
                content: e.content,
                score: e.score,
            })
            .collect()
    }
}

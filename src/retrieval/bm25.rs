use crate::db::Db;
use crate::error::{Result, EvalError};
use crate::retrieval::{RetrievedContext, Retriever, BM25_RETRIEVER};
use async_trait::async_trait;
use rusqlite::params;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "have",
    "has", "had", "do", "does", "did", "will", "would", "should", "could", "what",
    "which", "who", "where", "when", "why", "how", "this", "that", "these", "those",
];

/// Turn a natural-language question into an FTS5 MATCH expression.
///
/// Each surviving term is emitted as a quoted FTS5 string so punctuation inside
/// it can't produce a syntax error; terms are OR-joined for recall. Stop words
/// and single characters are dropped. Returns `None` if nothing searchable remains.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();

    let terms: Vec<String> = query
        .split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|term| term.chars().count() >= 2 && !stop_words.contains(term.as_str()))
        .collect();

    let terms = if terms.is_empty() {
        // Question made only of stop words: search them rather than nothing
        query
            .split_whitespace()
            .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|term| !term.is_empty())
            .collect()
    } else {
        terms
    };

    if terms.is_empty() {
        return None;
    }

    let mut seen = HashSet::new();
    let quoted: Vec<String> = terms
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();

    Some(quoted.join(" OR "))
}

/// Normalize BM25 score from negative range to 0-1 range
///
/// FTS5 bm25() is negative with better matches lower; sigmoid of the negated
/// score maps it to (0, 1) with higher = better.
pub fn normalize_bm25_score(raw_score: f64) -> f64 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    1.0 / (1.0 + raw_score.exp())
}

/// Keyword-statistical retriever over the corpus index's FTS5 table.
pub struct Bm25Retriever {
    db: Db,
}

impl Bm25Retriever {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn name(&self) -> &str {
        BM25_RETRIEVER
    }

    async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedContext>> {
        let start = std::time::Instant::now();

        let match_expr = match sanitize_fts5_query(question) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let rows = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT content, bm25(chunks_fts) AS raw_score
                    FROM chunks_fts
                    WHERE chunks_fts MATCH ?1
                    ORDER BY raw_score, chunk_id
                    LIMIT ?2
                    "#,
                )?;
                let mut rows = stmt.query(params![match_expr, k as i64])?;

                let mut results = Vec::new();
                while let Some(row) = rows.next()? {
                    let content: String = row.get(0)?;
                    let raw_score: f64 = row.get(1)?;
                    results.push((content, normalize_bm25_score(raw_score)));
                }
                Ok::<_, EvalError>(results)
            })
            .await
            .map_err(|e| EvalError::Search(format!("bm25 lookup failed: {}", e)))?;

        // SQL already orders best-first; ranks follow that order
        let contexts: Vec<RetrievedContext> = rows
            .into_iter()
            .enumerate()
            .map(|(idx, (content, score))| RetrievedContext {
                source_retriever: BM25_RETRIEVER.to_string(),
                rank: idx + 1,
                content,
                score,
            })
            .collect();

        log::debug!(
            "BM25 retrieval took {:?}, returned {} contexts",
            start.elapsed(),
            contexts.len()
        );
        Ok(contexts)
    }
}

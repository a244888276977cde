use crate::db::Db;
use crate::error::{Result, EvalError};
use crate::llm::Embedder;
use crate::retrieval::{RetrievedContext, Retriever, DENSE_RETRIEVER};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

struct IndexedChunk {
    chunk_id: String,
    content: String,
    embedding: Vec<f32>,
}

/// Dense retriever: cosine similarity between the question embedding and the
/// corpus index's stored chunk embeddings.
///
/// Embeddings are loaded from the `embeddings` table on first use and kept in
/// memory for the life of the retriever.
pub struct VectorRetriever {
    db: Db,
    embedder: Arc<dyn Embedder>,
    index: OnceCell<Vec<IndexedChunk>>,
}

pub(crate) fn parse_embedding_blob(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

impl VectorRetriever {
    pub fn new(db: Db, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            db,
            embedder,
            index: OnceCell::new(),
        }
    }

    async fn index(&self) -> Result<&[IndexedChunk]> {
        let chunks = self
            .index
            .get_or_try_init(|| async {
                let start = std::time::Instant::now();
                let rows = self
                    .db
                    .with_connection(|conn| {
                        let mut stmt = conn.prepare(
                            "SELECT c.chunk_id, c.content, e.vector
                             FROM chunks c
                             JOIN embeddings e ON e.chunk_id = c.chunk_id
                             ORDER BY c.chunk_id",
                        )?;
                        let mut rows = stmt.query([])?;
                        let mut out = Vec::new();
                        while let Some(row) = rows.next()? {
                            out.push((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, Vec<u8>>(2)?,
                            ));
                        }
                        Ok::<_, EvalError>(out)
                    })
                    .await
                    .map_err(|e| EvalError::Search(format!("embedding index load failed: {}", e)))?;

                let mut skipped = 0usize;
                let chunks: Vec<IndexedChunk> = rows
                    .into_iter()
                    .filter_map(|(chunk_id, content, blob)| match parse_embedding_blob(&blob) {
                        Some(embedding) => Some(IndexedChunk { chunk_id, content, embedding }),
                        None => {
                            skipped += 1;
                            None
                        }
                    })
                    .collect();

                if skipped > 0 {
                    log::warn!("Skipped {} chunks with malformed embedding blobs", skipped);
                }
                log::info!("Loaded {} chunk embeddings in {:?}", chunks.len(), start.elapsed());
                Ok::<_, EvalError>(chunks)
            })
            .await?;
        Ok(chunks.as_slice())
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn name(&self) -> &str {
        DENSE_RETRIEVER
    }

    async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedContext>> {
        let query_vec = self.embedder.embed_query(question).await?;
        let index = self.index().await?;

        let mut scored: Vec<(f32, &IndexedChunk)> = index
            .iter()
            .filter(|chunk| chunk.embedding.len() == query_vec.len())
            .map(|chunk| (cosine_similarity(&query_vec, &chunk.embedding), chunk))
            .collect();

        // chunk_id breaks similarity ties so repeated runs rank identically
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id)));

        Ok(scored
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(idx, (score, chunk))| RetrievedContext {
                source_retriever: DENSE_RETRIEVER.to_string(),
                rank: idx + 1,
                content: chunk.content.clone(),
                score: f64::from(score),
            })
            .collect())
    }
}

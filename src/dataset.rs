//! Evaluation dataset: a fixed, ordered sequence of questions with ground truth.

use crate::error::{Result, EvalError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// One evaluation question with its ground truth. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationItem {
    pub id: String,
    pub question: String,
    pub reference_contexts: Vec<String>,
    pub reference_answer: String,
}

/// On-disk row. Accepts RAGAS column names as aliases.
#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "user_input")]
    question: String,
    #[serde(default)]
    reference_contexts: Vec<String>,
    #[serde(default, alias = "reference", alias = "ground_truth")]
    reference_answer: String,
}

/// Summary numbers for a dataset, shown by `dataset-stats`
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStats {
    pub items: usize,
    pub items_without_reference_answer: usize,
    pub mean_reference_contexts: f64,
}

/// Ordered, validated item sequence. Cloning shares the same items.
#[derive(Debug, Clone)]
pub struct Dataset {
    items: Arc<[EvaluationItem]>,
}

impl Dataset {
    /// Validate and wrap items: ids must be unique and questions non-empty.
    pub fn from_items(items: Vec<EvaluationItem>) -> Result<Self> {
        let mut seen = HashSet::new();
        for item in &items {
            if item.question.trim().is_empty() {
                return Err(EvalError::Dataset(format!("item '{}' has an empty question", item.id)));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(EvalError::Dataset(format!("duplicate item id '{}'", item.id)));
            }
        }
        Ok(Self { items: items.into() })
    }

    /// Parse a JSON array or JSON Lines document.
    ///
    /// Items without an `id` get `item-<position>` (1-based).
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim_start();
        let raw: Vec<RawItem> = if trimmed.is_empty() {
            Vec::new()
        } else if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)
                .map_err(|e| EvalError::Dataset(format!("invalid JSON array: {}", e)))?
        } else {
            let mut rows = Vec::new();
            for (line_no, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let row: RawItem = serde_json::from_str(line)
                    .map_err(|e| EvalError::Dataset(format!("line {}: {}", line_no + 1, e)))?;
                rows.push(row);
            }
            rows
        };

        let items = raw
            .into_iter()
            .enumerate()
            .map(|(idx, row)| EvaluationItem {
                id: row
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("item-{}", idx + 1)),
                question: row.question,
                reference_contexts: row.reference_contexts,
                reference_answer: row.reference_answer,
            })
            .collect();

        Self::from_items(items)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EvalError::Dataset(format!("failed to read {}: {}", path.display(), e))
        })?;
        let dataset = Self::parse(&text)?;
        log::info!("Loaded {} evaluation items from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn items(&self) -> &[EvaluationItem] {
        &self.items
    }

    pub(crate) fn shared_items(&self) -> Arc<[EvaluationItem]> {
        Arc::clone(&self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> DatasetStats {
        let total_contexts: usize = self.items.iter().map(|i| i.reference_contexts.len()).sum();
        DatasetStats {
            items: self.items.len(),
            items_without_reference_answer: self
                .items
                .iter()
                .filter(|i| i.reference_answer.trim().is_empty())
                .count(),
            mean_reference_contexts: if self.items.is_empty() {
                0.0
            } else {
                total_contexts as f64 / self.items.len() as f64
            },
        }
    }
}

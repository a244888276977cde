use crate::eval::aggregate::Aggregate;
use crate::retrieval::StrategyId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A metric value in [0, 1], or a marker explaining why there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Score(f64),
    Error { error: String },
}

impl MetricValue {
    /// Finite values in [0, 1] become scores; anything else an error marker.
    pub fn from_raw(value: f64) -> Self {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            MetricValue::Score(value)
        } else {
            MetricValue::error(format!("out of range: {}", value))
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        MetricValue::Error { error: message.into() }
    }

    pub fn as_score(&self) -> Option<f64> {
        match self {
            MetricValue::Score(v) => Some(*v),
            MetricValue::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MetricValue::Error { .. })
    }
}

pub type MetricMap = BTreeMap<String, MetricValue>;

/// Metrics for one successfully scored item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricScore {
    pub item_id: String,
    /// Position in the dataset (0-based)
    pub position: usize,
    pub strategy_id: StrategyId,
    pub metrics: MetricMap,
}

/// Pipeline step an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Retrieval,
    Generation,
    Scoring,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Retrieval => "retrieval",
            Stage::Generation => "generation",
            Stage::Scoring => "scoring",
        }
    }
}

/// An item that could not be scored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub position: usize,
    pub stage: Stage,
    pub cause: String,
}

/// Run bookkeeping stored next to the results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Run was cancelled before every item was attempted
    pub partial: bool,
    /// Degraded-mode notes (e.g. reranker unavailable)
    pub degradations: Vec<String>,
    /// Tracing project name when a tracing credential was configured
    pub tracing_project: Option<String>,
}

/// Everything one strategy produced over one dataset
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub strategy_id: StrategyId,
    /// Dataset order
    pub per_item: Vec<MetricScore>,
    pub aggregate: Aggregate,
    pub failed_item_ids: BTreeSet<String>,
    /// Dataset order
    pub failures: Vec<ItemFailure>,
    /// Items in the dataset, attempted or not
    pub total_items: usize,
    pub metadata: RunMetadata,
}

impl EvaluationResult {
    pub fn scored_count(&self) -> usize {
        self.per_item.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn attempted_count(&self) -> usize {
        self.scored_count() + self.failed_count()
    }

    /// Process exit status for this run: `2` when items were attempted and every
    /// one failed, otherwise `0`.
    pub fn exit_code(&self) -> u8 {
        if self.attempted_count() > 0 && self.scored_count() == 0 {
            2
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_value_range() {
        assert_eq!(MetricValue::from_raw(0.0), MetricValue::Score(0.0));
        assert_eq!(MetricValue::from_raw(1.0), MetricValue::Score(1.0));
        assert!(MetricValue::from_raw(1.01).is_error());
        assert!(MetricValue::from_raw(-0.1).is_error());
        assert!(MetricValue::from_raw(f64::NAN).is_error());
    }

    #[test]
    fn test_metric_value_serialization() {
        assert_eq!(serde_json::to_string(&MetricValue::Score(0.5)).unwrap(), "0.5");
        assert_eq!(
            serde_json::to_string(&MetricValue::error("timeout")).unwrap(),
            r#"{"error":"timeout"}"#
        );
    }
}

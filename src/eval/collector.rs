use crate::eval::{ItemFailure, MetricScore};

/// What one worker reports for one item
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Scored(MetricScore),
    Failed(ItemFailure),
}

/// Single accumulation point for a strategy's results.
///
/// Owned by exactly one task; workers reach it only through a channel.
#[derive(Debug, Default)]
pub struct ResultCollector {
    scores: Vec<MetricScore>,
    failures: Vec<ItemFailure>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Scored(score) => self.scores.push(score),
            ItemOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    /// Scores and failures, each sorted by dataset position regardless of
    /// completion order.
    pub fn into_parts(mut self) -> (Vec<MetricScore>, Vec<ItemFailure>) {
        self.scores.sort_by_key(|s| s.position);
        self.failures.sort_by_key(|f| f.position);
        (self.scores, self.failures)
    }
}

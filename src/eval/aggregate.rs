use crate::eval::MetricScore;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-metric means over the items that produced a valid value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Aggregate {
    pub means: BTreeMap<String, f64>,
    /// Valid-sample count behind each mean
    pub samples: BTreeMap<String, usize>,
    /// Metrics with zero valid samples, omitted from `means`. Sorted.
    pub gaps: Vec<String>,
}

impl Aggregate {
    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.means.get(metric).copied()
    }

    /// All metric names known to this aggregate, sorted, gaps included.
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .means
            .keys()
            .map(String::as_str)
            .chain(self.gaps.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }
}

/// Reduce per-item metrics to per-metric arithmetic means.
///
/// Metric names are the union of `expected_metrics` and every name seen on an
/// item. Error markers and absent metrics are excluded from that metric's mean.
/// Values are summed in sorted order so the result does not depend on item order.
pub fn aggregate(per_item: &[MetricScore], expected_metrics: &[String]) -> Aggregate {
    let mut values: BTreeMap<&str, Vec<f64>> = expected_metrics
        .iter()
        .map(|name| (name.as_str(), Vec::new()))
        .collect();

    for score in per_item {
        for (name, value) in &score.metrics {
            let samples = values.entry(name.as_str()).or_default();
            if let Some(v) = value.as_score() {
                samples.push(v);
            }
        }
    }

    let mut result = Aggregate::default();
    for (name, mut samples) in values {
        if samples.is_empty() {
            result.gaps.push(name.to_string());
            continue;
        }
        samples.sort_by(f64::total_cmp);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        result.means.insert(name.to_string(), mean);
        result.samples.insert(name.to_string(), samples.len());
    }
    result
}

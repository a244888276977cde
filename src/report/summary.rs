use crate::eval::EvaluationResult;
use std::collections::BTreeSet;
use std::fmt::Write;

const NO_SAMPLES: &str = "no samples";

fn format_mean(mean: Option<f64>) -> String {
    match mean {
        Some(v) => format!("{:.4}", v),
        None => NO_SAMPLES.to_string(),
    }
}

/// Human-readable summary for one strategy run.
pub fn render_summary(result: &EvaluationResult) -> String {
    let mut out = String::new();
    let meta = &result.metadata;

    let _ = writeln!(out, "=== Strategy: {} ===", result.strategy_id);
    let _ = writeln!(out, "Run: {}", meta.run_id);
    if meta.partial {
        let _ = writeln!(
            out,
            "PARTIAL: cancelled after {} of {} items",
            result.attempted_count(),
            result.total_items
        );
    }
    let _ = writeln!(
        out,
        "Items: {} total, {} scored, {} failed",
        result.total_items,
        result.scored_count(),
        result.failed_count()
    );
    if !result.failures.is_empty() {
        let _ = writeln!(out, "Failed items:");
        for failure in &result.failures {
            let _ = writeln!(
                out,
                "  - {} ({}): {}",
                failure.item_id,
                failure.stage.as_str(),
                failure.cause
            );
        }
    }

    let names = result.aggregate.metric_names();
    if names.is_empty() {
        let _ = writeln!(out, "Metrics: {}", NO_SAMPLES);
    } else {
        let _ = writeln!(out, "Metrics:");
        let width = names.iter().map(|n| n.len()).max().unwrap_or(0);
        for name in names {
            let samples = result.aggregate.samples.get(name).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "  {:<width$}  {:>10}  (n={})",
                name,
                format_mean(result.aggregate.mean(name)),
                samples,
                width = width
            );
        }
    }

    if !meta.degradations.is_empty() {
        let _ = writeln!(out, "Degraded mode:");
        for note in &meta.degradations {
            let _ = writeln!(out, "  - {}", note);
        }
    }
    if let Some(project) = &meta.tracing_project {
        let _ = writeln!(out, "Tracing project: {}", project);
    }
    out
}

/// Side-by-side metric means for several strategies over the same dataset.
pub fn render_comparison(results: &[EvaluationResult]) -> String {
    let mut out = String::new();
    if results.is_empty() {
        return out;
    }

    let metrics: BTreeSet<&str> = results
        .iter()
        .flat_map(|r| r.aggregate.metric_names())
        .collect();
    let metric_width = metrics.iter().map(|m| m.len()).max().unwrap_or(0).max("metric".len());
    let col_width = results
        .iter()
        .map(|r| r.strategy_id.as_str().len())
        .max()
        .unwrap_or(0)
        .max(NO_SAMPLES.len());

    let _ = writeln!(out, "=== Strategy comparison ===");
    let _ = write!(out, "{:<width$}", "metric", width = metric_width);
    for result in results {
        let _ = write!(out, "  {:>width$}", result.strategy_id.as_str(), width = col_width);
    }
    let _ = writeln!(out);

    for metric in &metrics {
        let _ = write!(out, "{:<width$}", metric, width = metric_width);
        for result in results {
            let _ = write!(
                out,
                "  {:>width$}",
                format_mean(result.aggregate.mean(metric)),
                width = col_width
            );
        }
        let _ = writeln!(out);
    }

    let _ = write!(out, "{:<width$}", "failed", width = metric_width);
    for result in results {
        let _ = write!(out, "  {:>width$}", result.failed_count(), width = col_width);
    }
    let _ = writeln!(out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{aggregate, ItemFailure, MetricScore, MetricValue, RunMetadata, Stage};
    use crate::retrieval::StrategyId;
    use chrono::Utc;
    use uuid::Uuid;

    fn result(
        strategy: StrategyId,
        faithfulness: &[f64],
        failed: &[&str],
        partial: bool,
    ) -> EvaluationResult {
        let per_item: Vec<MetricScore> = faithfulness
            .iter()
            .enumerate()
            .map(|(i, v)| MetricScore {
                item_id: format!("q{}", i),
                position: i,
                strategy_id: strategy,
                metrics: [("faithfulness".to_string(), MetricValue::Score(*v))]
                    .into_iter()
                    .collect(),
            })
            .collect();
        let failures: Vec<ItemFailure> = failed
            .iter()
            .enumerate()
            .map(|(i, id)| ItemFailure {
                item_id: id.to_string(),
                position: per_item.len() + i,
                stage: Stage::Scoring,
                cause: "judge reply was not JSON".to_string(),
            })
            .collect();
        let metric_names = ["faithfulness".to_string(), "context_recall".to_string()];
        let aggregate = aggregate(&per_item, &metric_names);
        EvaluationResult {
            strategy_id: strategy,
            failed_item_ids: failures.iter().map(|f| f.item_id.clone()).collect(),
            total_items: per_item.len() + failures.len() + usize::from(partial),
            per_item,
            aggregate,
            failures,
            metadata: RunMetadata {
                run_id: Uuid::nil(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                partial,
                degradations: vec![
                    "reranker unavailable (no reranking credential), using fused order".to_string(),
                ],
                tracing_project: None,
            },
        }
    }

    #[test]
    fn test_summary_lists_failures_means_and_gaps() {
        let text = render_summary(&result(StrategyId::Naive, &[0.5, 1.0], &["q9"], false));
        assert!(text.contains("=== Strategy: naive ==="));
        assert!(text.contains("Items: 3 total, 2 scored, 1 failed"));
        assert!(text.contains("q9 (scoring)"));
        assert!(text.contains("0.7500"));
        let recall_line = text.lines().find(|l| l.contains("context_recall")).unwrap();
        assert!(recall_line.contains("no samples"));
        assert!(text.contains("Degraded mode:"));
        assert!(!text.contains("PARTIAL"));
    }

    #[test]
    fn test_summary_marks_partial() {
        let text = render_summary(&result(StrategyId::Ensemble, &[0.2], &[], true));
        assert!(text.contains("PARTIAL: cancelled after 1 of 2 items"));
    }

    #[test]
    fn test_comparison_has_column_per_strategy() {
        let results = vec![
            result(StrategyId::Naive, &[0.5], &[], false),
            result(StrategyId::Ensemble, &[], &["q0"], false),
        ];
        let text = render_comparison(&results);
        let header = text.lines().nth(1).unwrap();
        assert!(header.contains("naive") && header.contains("ensemble"));
        let faithfulness = text.lines().find(|l| l.starts_with("faithfulness")).unwrap();
        assert!(faithfulness.contains("0.5000"));
        assert!(faithfulness.contains("no samples"));
        assert!(render_comparison(&[]).is_empty());
    }
}

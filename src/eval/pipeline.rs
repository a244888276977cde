//! Evaluation pipeline: retrieve → generate → score for every dataset item of
//! one strategy, with per-item failure isolation and a bounded worker pool.

use crate::dataset::{Dataset, EvaluationItem};
use crate::error::{EvalError, Result};
use crate::eval::aggregate::aggregate;
use crate::eval::collector::{ItemOutcome, ResultCollector};
use crate::eval::{EvaluationResult, ItemFailure, MetricScore, RunMetadata, Stage};
use crate::llm::{Generator, MetricScorer, ScoringInput};
use crate::retrieval::strategy::DegradationLog;
use crate::retrieval::{RetrievalStrategy, StrategyConfig, StrategyRegistry};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run-wide knobs that are not part of the retrieval strategy
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum items in flight at once
    pub concurrency: usize,
    pub tracing_project: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            tracing_project: None,
        }
    }
}

/// Shared, read-only state every worker needs
struct WorkerContext {
    strategy: RetrievalStrategy,
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn MetricScorer>,
    items: Arc<[EvaluationItem]>,
    next: AtomicUsize,
    degradations: DegradationLog,
}

/// Evaluates one strategy at a time against a dataset.
///
/// The generator and scorer are fixed at construction so that every strategy
/// run through the same pipeline differs only in retrieval.
pub struct EvaluationPipeline {
    registry: Arc<StrategyRegistry>,
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn MetricScorer>,
    options: PipelineOptions,
}

impl EvaluationPipeline {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn MetricScorer>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            generator,
            scorer,
            options,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Evaluate every item for `config`'s strategy.
    ///
    /// Only strategy resolution can fail the call; item-level errors are recorded
    /// in the result. Cancelling `cancel` stops workers before their next item and
    /// the result is marked partial.
    pub async fn run(
        &self,
        config: &StrategyConfig,
        dataset: &Dataset,
        cancel: CancellationToken,
    ) -> Result<EvaluationResult> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let degradations = DegradationLog::default();
        let strategy = self.registry.resolve(config, &degradations)?;
        let strategy_id = strategy.id();

        log::info!(
            "Run {}: evaluating {} items with strategy {} (concurrency {})",
            run_id,
            dataset.len(),
            strategy.describe(),
            self.options.concurrency
        );

        let ctx = Arc::new(WorkerContext {
            strategy,
            generator: Arc::clone(&self.generator),
            scorer: Arc::clone(&self.scorer),
            items: dataset.shared_items(),
            next: AtomicUsize::new(0),
            degradations: degradations.clone(),
        });

        let (tx, mut rx) = mpsc::channel::<ItemOutcome>(self.options.concurrency.max(1) * 2);
        let collector = tokio::spawn(async move {
            let mut collector = ResultCollector::new();
            while let Some(outcome) = rx.recv().await {
                collector.record(outcome);
            }
            collector
        });

        let worker_count = self.options.concurrency.max(1).min(dataset.len());
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let ctx = Arc::clone(&ctx);
            let tx = tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { run_worker(worker_id, ctx, tx, cancel).await });
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Evaluation worker aborted: {}", e);
            }
        }

        let collector = collector
            .await
            .map_err(|e| EvalError::Search(format!("result collector failed: {}", e)))?;
        let (per_item, failures) = collector.into_parts();

        let attempted = per_item.len() + failures.len();
        let partial = attempted < dataset.len();
        if partial {
            log::warn!(
                "Run {} cancelled: {} of {} items evaluated",
                run_id,
                attempted,
                dataset.len()
            );
        }

        let aggregate = aggregate(&per_item, &self.scorer.metric_names());
        let failed_item_ids: BTreeSet<String> =
            failures.iter().map(|f| f.item_id.clone()).collect();

        log::info!(
            "Run {} finished: {} scored, {} failed",
            run_id,
            per_item.len(),
            failures.len()
        );

        Ok(EvaluationResult {
            strategy_id,
            per_item,
            aggregate,
            failed_item_ids,
            failures,
            total_items: dataset.len(),
            metadata: RunMetadata {
                run_id,
                started_at,
                finished_at: Utc::now(),
                partial,
                degradations: degradations.snapshot(),
                tracing_project: self.options.tracing_project.clone(),
            },
        })
    }
}

/// Take positions off the shared queue until it is empty or the run is cancelled.
async fn run_worker(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    tx: mpsc::Sender<ItemOutcome>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            log::debug!("Worker {} stopping: run cancelled", worker_id);
            return;
        }
        let position = ctx.next.fetch_add(1, Ordering::SeqCst);
        let item = match ctx.items.get(position) {
            Some(item) => item,
            None => return,
        };

        let outcome = evaluate_item(&ctx, position, item).await;
        if tx.send(outcome).await.is_err() {
            log::error!("Worker {}: result collector closed", worker_id);
            return;
        }
    }
}

/// One item, start to finish. Any step's error becomes an `ItemFailure`.
async fn evaluate_item(ctx: &WorkerContext, position: usize, item: &EvaluationItem) -> ItemOutcome {
    let start = std::time::Instant::now();
    let fail = |stage: Stage, cause: String| {
        log::warn!("Item '{}' failed during {}: {}", item.id, stage.as_str(), cause);
        ItemOutcome::Failed(ItemFailure {
            item_id: item.id.clone(),
            position,
            stage,
            cause,
        })
    };

    let contexts = match ctx.strategy.retrieve(&item.question, &ctx.degradations).await {
        Ok(contexts) => contexts,
        Err(e) => return fail(Stage::Retrieval, e.to_string()),
    };

    let answer = match ctx.generator.generate(&item.question, &contexts).await {
        Ok(answer) => answer,
        Err(e) => return fail(Stage::Generation, e.to_string()),
    };

    let input = ScoringInput {
        question: &item.question,
        contexts: &contexts,
        answer: &answer,
        reference_answer: &item.reference_answer,
        reference_contexts: &item.reference_contexts,
    };
    let metrics = match ctx.scorer.score(&input).await {
        Ok(metrics) => metrics,
        Err(e) => return fail(Stage::Scoring, e.to_string()),
    };

    log::debug!("Item '{}' scored in {:?}", item.id, start.elapsed());
    ItemOutcome::Scored(MetricScore {
        item_id: item.id.clone(),
        position,
        strategy_id: ctx.strategy.id(),
        metrics,
    })
}

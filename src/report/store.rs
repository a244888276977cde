use crate::db::migrate::{run_migrations, Migration};
use crate::db::Db;
use crate::error::{Result, EvalError};
use crate::eval::{EvaluationResult, MetricMap};
use crate::retrieval::StrategyId;
use rusqlite::params;
use std::path::{Path, PathBuf};

const ARTIFACT_PREFIX: &str = "ragas_evaluation_results";

const REPORT_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "001_report_tables",
    sql: r#"
        CREATE TABLE item_results (
            strategy_id TEXT NOT NULL,
            item_id     TEXT NOT NULL,
            position    INTEGER NOT NULL,
            run_id      TEXT NOT NULL,
            status      TEXT NOT NULL CHECK (status IN ('scored', 'failed')),
            metrics     TEXT,
            failed_stage TEXT,
            error       TEXT,
            PRIMARY KEY (strategy_id, item_id)
        );
        CREATE INDEX idx_item_results_position ON item_results(strategy_id, position);

        CREATE TABLE strategy_summary (
            strategy_id     TEXT PRIMARY KEY,
            run_id          TEXT NOT NULL,
            total_items     INTEGER NOT NULL,
            scored_items    INTEGER NOT NULL,
            failed_items    INTEGER NOT NULL,
            failed_item_ids TEXT NOT NULL,
            aggregate       TEXT NOT NULL,
            no_sample_metrics TEXT NOT NULL,
            degradations    TEXT NOT NULL,
            partial         INTEGER NOT NULL,
            started_at      TEXT NOT NULL,
            finished_at     TEXT NOT NULL
        );
    "#,
}];

/// Default artifact location for a strategy:
/// `<output_dir>/ragas_evaluation_results_<strategy>.db`, or `<output_dir>/<name>.db`
/// when an explicit output name is given.
pub fn artifact_path(
    output_dir: &Path,
    strategy: StrategyId,
    output_name: Option<&str>,
) -> PathBuf {
    let stem = match output_name {
        Some(name) => name.trim_end_matches(".db").to_string(),
        None => format!("{}_{}", ARTIFACT_PREFIX, strategy),
    };
    output_dir.join(format!("{}.db", stem))
}

/// `(item_id, position, status, metrics, failed_stage, error)` ready to insert
type ItemRow = (String, usize, &'static str, Option<String>, Option<String>, Option<String>);

/// One `item_results` row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItemRow {
    pub item_id: String,
    pub position: usize,
    pub status: String,
    pub metrics: Option<serde_json::Value>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}

/// One `strategy_summary` row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSummary {
    pub total_items: usize,
    pub scored_items: usize,
    pub failed_items: usize,
    pub failed_item_ids: Vec<String>,
    pub aggregate: serde_json::Value,
    pub no_sample_metrics: Vec<String>,
    pub degradations: Vec<String>,
    pub partial: bool,
}

/// Tabular result artifact backed by SQLite
pub struct ReportStore {
    db: Db,
}

impl ReportStore {
    /// Open (creating if needed) the artifact and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Db::new(path);
        db.with_connection(|conn| run_migrations(conn, REPORT_MIGRATIONS)).await?;
        Ok(Self { db })
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }

    /// Persist one strategy's result, replacing rows from any earlier run of the
    /// same strategy in this artifact. Other strategies' rows are untouched.
    pub async fn write(&self, result: &EvaluationResult) -> Result<()> {
        let strategy = result.strategy_id.to_string();
        let run_id = result.metadata.run_id.to_string();

        let mut rows: Vec<ItemRow> = Vec::with_capacity(result.attempted_count());
        for score in &result.per_item {
            rows.push((
                score.item_id.clone(),
                score.position,
                "scored",
                Some(metrics_json(&score.metrics)?),
                None,
                None,
            ));
        }
        for failure in &result.failures {
            rows.push((
                failure.item_id.clone(),
                failure.position,
                "failed",
                None,
                Some(failure.stage.as_str().to_string()),
                Some(failure.cause.clone()),
            ));
        }
        rows.sort_by_key(|r| r.1);

        let failed_ids: Vec<&String> = result.failures.iter().map(|f| &f.item_id).collect();
        let summary = (
            result.total_items as i64,
            result.scored_count() as i64,
            result.failed_count() as i64,
            serde_json::to_string(&failed_ids)?,
            serde_json::to_string(&result.aggregate.means)?,
            serde_json::to_string(&result.aggregate.gaps)?,
            serde_json::to_string(&result.metadata.degradations)?,
            result.metadata.partial,
            result.metadata.started_at.to_rfc3339(),
            result.metadata.finished_at.to_rfc3339(),
        );

        let row_count = rows.len();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM item_results WHERE strategy_id = ?1", params![strategy])?;
                tx.execute(
                    "DELETE FROM strategy_summary WHERE strategy_id = ?1",
                    params![strategy],
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO item_results
                            (strategy_id, item_id, position, run_id, status, metrics,
                             failed_stage, error)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;
                    for (item_id, position, status, metrics, stage, error) in &rows {
                        stmt.execute(params![
                            strategy,
                            item_id,
                            *position as i64,
                            run_id,
                            status,
                            metrics,
                            stage,
                            error
                        ])?;
                    }
                }
                tx.execute(
                    "INSERT INTO strategy_summary
                        (strategy_id, run_id, total_items, scored_items, failed_items,
                         failed_item_ids, aggregate, no_sample_metrics, degradations, partial,
                         started_at, finished_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        strategy, run_id, summary.0, summary.1, summary.2, summary.3, summary.4,
                        summary.5, summary.6, summary.7, summary.8, summary.9
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        log::info!("Wrote {} item rows to {}", row_count, self.db.path().display());
        Ok(())
    }

    /// Stored item rows for a strategy, in dataset order.
    pub async fn item_rows(&self, strategy: StrategyId) -> Result<Vec<StoredItemRow>> {
        let strategy = strategy.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT item_id, position, status, metrics, failed_stage, error
                     FROM item_results WHERE strategy_id = ?1 ORDER BY position",
                )?;
                let mut rows = stmt.query(params![strategy])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let metrics: Option<String> = row.get(3)?;
                    out.push(StoredItemRow {
                        item_id: row.get(0)?,
                        position: row.get::<_, i64>(1)? as usize,
                        status: row.get(2)?,
                        metrics: metrics.map(|m| serde_json::from_str(&m)).transpose()?,
                        failed_stage: row.get(4)?,
                        error: row.get(5)?,
                    });
                }
                Ok(out)
            })
            .await
    }

    /// Stored summary row for a strategy, if one has been written.
    pub async fn summary(&self, strategy: StrategyId) -> Result<Option<StoredSummary>> {
        let strategy = strategy.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT total_items, scored_items, failed_items, failed_item_ids, aggregate,
                            no_sample_metrics, degradations, partial
                     FROM strategy_summary WHERE strategy_id = ?1",
                )?;
                let mut rows = stmt.query(params![strategy])?;
                let row = match rows.next()? {
                    Some(row) => row,
                    None => return Ok(None),
                };
                let failed_ids: String = row.get(3)?;
                let aggregate: String = row.get(4)?;
                let gaps: String = row.get(5)?;
                let degradations: String = row.get(6)?;
                Ok(Some(StoredSummary {
                    total_items: row.get::<_, i64>(0)? as usize,
                    scored_items: row.get::<_, i64>(1)? as usize,
                    failed_items: row.get::<_, i64>(2)? as usize,
                    failed_item_ids: serde_json::from_str(&failed_ids)?,
                    aggregate: serde_json::from_str(&aggregate)?,
                    no_sample_metrics: serde_json::from_str(&gaps)?,
                    degradations: serde_json::from_str(&degradations)?,
                    partial: row.get(7)?,
                }))
            })
            .await
    }
}

fn metrics_json(metrics: &MetricMap) -> Result<String> {
    serde_json::to_string(metrics).map_err(EvalError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{
        aggregate, EvaluationResult, ItemFailure, MetricScore, MetricValue, RunMetadata, Stage,
    };
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn result(strategy: StrategyId, failed_position: Option<usize>) -> EvaluationResult {
        let mut per_item = Vec::new();
        let mut failures = Vec::new();
        for position in 0..3 {
            let item_id = format!("q{}", position + 1);
            if Some(position) == failed_position {
                failures.push(ItemFailure {
                    item_id,
                    position,
                    stage: Stage::Generation,
                    cause: "openai-chat error: HTTP 429".to_string(),
                });
            } else {
                per_item.push(MetricScore {
                    item_id,
                    position,
                    strategy_id: strategy,
                    metrics: [
                        (
                            "faithfulness".to_string(),
                            MetricValue::Score(0.5 + position as f64 * 0.1),
                        ),
                        (
                            "context_recall".to_string(),
                            MetricValue::error("missing from judge reply"),
                        ),
                    ]
                    .into_iter()
                    .collect(),
                });
            }
        }
        let aggregate = aggregate(&per_item, &[]);
        EvaluationResult {
            strategy_id: strategy,
            failed_item_ids: failures.iter().map(|f| f.item_id.clone()).collect::<BTreeSet<_>>(),
            per_item,
            aggregate,
            failures,
            total_items: 3,
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                partial: false,
                degradations: vec!["reranker unavailable".to_string()],
                tracing_project: None,
            },
        }
    }

    #[test]
    fn test_artifact_path_naming() {
        let dir = Path::new("out");
        assert_eq!(
            artifact_path(dir, StrategyId::SparseLexical, None),
            PathBuf::from("out/ragas_evaluation_results_sparse-lexical.db")
        );
        assert_eq!(
            artifact_path(dir, StrategyId::Naive, Some("shared.db")),
            PathBuf::from("out/shared.db")
        );
        assert_ne!(
            artifact_path(dir, StrategyId::Naive, None),
            artifact_path(dir, StrategyId::Ensemble, None)
        );
    }

    #[tokio::test]
    async fn test_write_item_rows_and_summary() {
        let temp_dir = TempDir::new().unwrap();
        let path = artifact_path(temp_dir.path(), StrategyId::Naive, None);
        let store = ReportStore::open(&path).await.unwrap();
        store.write(&result(StrategyId::Naive, Some(1))).await.unwrap();

        let rows = store.item_rows(StrategyId::Naive).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        assert_eq!(rows[1].status, "failed");
        assert_eq!(rows[1].failed_stage.as_deref(), Some("generation"));
        assert!(rows[1].metrics.is_none());
        let metrics = rows[0].metrics.as_ref().unwrap();
        assert_eq!(metrics["faithfulness"], 0.5);
        assert_eq!(metrics["context_recall"]["error"], "missing from judge reply");

        let summary = store.summary(StrategyId::Naive).await.unwrap().unwrap();
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.scored_items, 2);
        assert_eq!(summary.failed_item_ids, vec!["q2".to_string()]);
        assert_eq!(summary.no_sample_metrics, vec!["context_recall".to_string()]);
        assert_eq!(summary.degradations.len(), 1);
        assert!(!summary.partial);
    }

    #[tokio::test]
    async fn test_same_strategy_replaces_other_strategies_kept() {
        let temp_dir = TempDir::new().unwrap();
        let path = artifact_path(temp_dir.path(), StrategyId::Naive, Some("shared"));
        let store = ReportStore::open(&path).await.unwrap();

        store.write(&result(StrategyId::Naive, Some(1))).await.unwrap();
        store.write(&result(StrategyId::Ensemble, None)).await.unwrap();
        store.write(&result(StrategyId::Naive, None)).await.unwrap();

        let naive = store.item_rows(StrategyId::Naive).await.unwrap();
        assert_eq!(naive.len(), 3);
        assert!(naive.iter().all(|r| r.status == "scored"));
        assert_eq!(store.item_rows(StrategyId::Ensemble).await.unwrap().len(), 3);
        assert!(store.summary(StrategyId::SparseLexical).await.unwrap().is_none());

        // Reopening an existing artifact does not re-run migrations
        let reopened = ReportStore::open(&path).await.unwrap();
        assert_eq!(reopened.item_rows(StrategyId::Ensemble).await.unwrap().len(), 3);
    }
}

//! Preflight and multi-strategy runs.
//!
//! Everything that can be rejected as a configuration problem (config values,
//! credentials, the dataset, every selected strategy) is checked before the
//! first item of the first strategy is evaluated, so a bad invocation never
//! leaves a partial set of artifacts behind.

use crate::config::{Config, Credentials};
use crate::dataset::Dataset;
use crate::error::{EvalError, Result};
use crate::eval::{EvaluationPipeline, EvaluationResult};
use crate::report::{artifact_path, ReportStore};
use crate::retrieval::{StrategyConfig, StrategyRegistry};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Run completed, including partial item failures and cancelled runs
pub const EXIT_SUCCESS: u8 = 0;
/// Configuration or dataset problem found before any item ran
pub const EXIT_CONFIGURATION: u8 = 1;
/// Fatal error after processing started, or every attempted item failed
pub const EXIT_RUN_FAILED: u8 = 2;

/// Process exit code for a run that stopped with `err`
pub fn exit_code_for(err: &EvalError) -> u8 {
    if err.is_configuration() {
        EXIT_CONFIGURATION
    } else {
        EXIT_RUN_FAILED
    }
}

/// Inputs that passed preflight
#[derive(Debug)]
pub struct RunPlan {
    pub config: Config,
    pub credentials: Credentials,
    pub strategies: Vec<StrategyConfig>,
    pub dataset: Dataset,
}

impl RunPlan {
    /// Validate `config`, resolve credentials through `lookup` and load the dataset.
    pub fn prepare<F>(config: Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.validate()?;
        let strategies = config
            .strategy_ids()?
            .into_iter()
            .map(|id| config.strategy_config(id))
            .collect();
        let credentials = Credentials::resolve(&config, lookup)?;
        let dataset = Dataset::load(&config.evaluation.dataset_path)?;

        Ok(Self {
            config,
            credentials,
            strategies,
            dataset,
        })
    }

    /// Every selected strategy must resolve against `registry`.
    pub fn check_strategies(&self, registry: &StrategyRegistry) -> Result<()> {
        for strategy in &self.strategies {
            registry.check(strategy)?;
        }
        Ok(())
    }

    /// Run each strategy in order and write its artifact under the output dir.
    ///
    /// Strategies not yet started when `cancel` fires are skipped.
    pub async fn execute(
        &self,
        pipeline: &EvaluationPipeline,
        output_name: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                log::warn!("Skipping strategy '{}': run cancelled", strategy.strategy_id);
                break;
            }

            let result = pipeline.run(strategy, &self.dataset, cancel.clone()).await?;

            let path = artifact_path(
                &self.config.evaluation.output_dir,
                strategy.strategy_id,
                output_name,
            );
            let store = ReportStore::open(&path).await?;
            store.write(&result).await?;
            log::info!("Results for '{}' written to {}", strategy.strategy_id, path.display());

            outcome.artifacts.push(path);
            outcome.results.push(result);
        }

        Ok(outcome)
    }
}

/// Results and artifact paths of every strategy that ran, in run order
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub results: Vec<EvaluationResult>,
    pub artifacts: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        self.results
            .iter()
            .map(EvaluationResult::exit_code)
            .max()
            .unwrap_or(EXIT_SUCCESS)
    }
}

/// Preflight, build the pipeline with `build`, then run every strategy.
///
/// `build` is only called once config, credentials and dataset are valid. No
/// item is evaluated unless every selected strategy resolves against the
/// built pipeline's registry.
pub async fn evaluate<F, B>(
    config: Config,
    lookup: F,
    build: B,
    output_name: Option<&str>,
    cancel: CancellationToken,
) -> Result<RunOutcome>
where
    F: Fn(&str) -> Option<String>,
    B: FnOnce(&RunPlan) -> Result<EvaluationPipeline>,
{
    let plan = RunPlan::prepare(config, lookup)?;
    let pipeline = build(&plan)?;
    plan.check_strategies(pipeline.registry())?;

    log::info!(
        "Evaluating {} strategies over {} items (reranking {}, tracing {})",
        plan.strategies.len(),
        plan.dataset.len(),
        if plan.credentials.reranking.is_some() { "available" } else { "unavailable" },
        if plan.credentials.tracing.is_some() { "on" } else { "off" }
    );

    plan.execute(&pipeline, output_name, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let dataset = dir.path().join("golden.jsonl");
        fs::write(&dataset, "{\"question\": \"Which cereal has fiber?\"}\n").unwrap();

        let mut config = Config::default();
        config.evaluation.dataset_path = dataset;
        config.evaluation.output_dir = dir.path().join("results");
        config.evaluation.retrieval_strategy = "naive,ensemble".to_string();
        config
    }

    fn openai_key(name: &str) -> Option<String> {
        (name == "OPENAI_API_KEY").then(|| "sk-test".to_string())
    }

    #[test]
    fn test_exit_code_classification() {
        assert_eq!(
            exit_code_for(&EvalError::Configuration("x".into())),
            EXIT_CONFIGURATION
        );
        assert_eq!(exit_code_for(&EvalError::Dataset("x".into())), EXIT_CONFIGURATION);
        assert_eq!(
            exit_code_for(&EvalError::collaborator("openai-chat", "HTTP 500")),
            EXIT_RUN_FAILED
        );
        assert_eq!(RunOutcome::default().exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_prepare_builds_strategy_configs_in_order() {
        let dir = TempDir::new().unwrap();
        let plan = RunPlan::prepare(config_in(&dir), openai_key).unwrap();

        let ids: Vec<String> = plan.strategies.iter().map(|s| s.strategy_id.to_string()).collect();
        assert_eq!(ids, vec!["naive", "ensemble"]);
        assert_eq!(plan.dataset.len(), 1);
        assert_eq!(plan.credentials.generation, "sk-test");
    }

    #[test]
    fn test_prepare_requires_generation_credential() {
        let dir = TempDir::new().unwrap();
        let err = RunPlan::prepare(config_in(&dir), |_| None).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_prepare_rejects_missing_dataset() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.evaluation.dataset_path = dir.path().join("missing.json");
        let err = RunPlan::prepare(config, openai_key).unwrap_err();
        assert!(matches!(err, EvalError::Dataset(_)));
        assert_eq!(exit_code_for(&err), EXIT_CONFIGURATION);
    }
}

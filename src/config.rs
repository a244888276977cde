use crate::error::{EvalError, Result};
use crate::retrieval::{FusionParams, StrategyConfig, StrategyId, BM25_RETRIEVER, DENSE_RETRIEVER};
use crate::llm::judge::default_metric_names;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "RAGAS_EVAL_CONFIG";
pub const STRATEGY_ENV: &str = "RETRIEVAL_STRATEGY";
const DEFAULT_CONFIG_FILE: &str = "config.toml";
/// Upper bound on HTTP retries; backoff doubles per attempt
pub const MAX_RETRIES: usize = 10;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub evaluation: EvaluationConfig,
    pub corpus: CorpusConfig,
    pub generation: GenerationConfig,
    pub embeddings: EmbeddingsConfig,
    pub judge: JudgeConfig,
    pub fusion: FusionConfig,
    pub reranker: RerankerConfig,
    pub tracing: TracingConfig,
}

/// Run-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_strategy")]
    pub retrieval_strategy: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            retrieval_strategy: default_strategy(),
        }
    }
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("data/golden_dataset.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_concurrency() -> usize {
    1
}

fn default_strategy() -> String {
    StrategyId::Ensemble.to_string()
}

/// External corpus index (built by a separate ingestion tool)
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_db")]
    pub db_path: PathBuf,
    /// Contexts requested from each retriever per question
    #[serde(default = "default_retrieve_k")]
    pub retrieve_k: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            db_path: default_corpus_db(),
            retrieve_k: default_retrieve_k(),
        }
    }
}

fn default_corpus_db() -> PathBuf {
    PathBuf::from("corpus.db")
}

fn default_retrieve_k() -> usize {
    5
}

/// Answer generation model
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            base_url: default_base_url(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_key_env: default_openai_key_env(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    crate::llm::openai::DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Question embeddings for the dense retriever
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

/// Metric judge model
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    /// Falls back to the generation model when unset
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_metric_names")]
    pub metrics: Vec<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: None,
            metrics: default_metric_names(),
        }
    }
}

/// Ensemble fusion parameters
#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_rrf_k")]
    pub k: f64,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default = "default_reranker_enabled")]
    pub reranker_enabled: bool,
    /// Retriever name → weight; the named retrievers are the ensemble members
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: default_rrf_k(),
            top_n: None,
            reranker_enabled: default_reranker_enabled(),
            weights: default_weights(),
        }
    }
}

fn default_rrf_k() -> f64 {
    crate::retrieval::DEFAULT_RRF_K
}

fn default_reranker_enabled() -> bool {
    true
}

fn default_weights() -> BTreeMap<String, f64> {
    [(DENSE_RETRIEVER.to_string(), 0.5), (BM25_RETRIEVER.to_string(), 0.5)]
        .into_iter()
        .collect()
}

/// Cohere rerank API
#[derive(Debug, Clone, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default = "default_cohere_key_env")]
    pub api_key_env: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: default_rerank_model(),
            top_n: None,
            api_key_env: default_cohere_key_env(),
        }
    }
}

fn default_rerank_model() -> String {
    "rerank-english-v3.0".to_string()
}

fn default_cohere_key_env() -> String {
    "COHERE_API_KEY".to_string()
}

/// Optional run tracing
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_tracing_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_tracing_project")]
    pub project: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_tracing_key_env(),
            project: default_tracing_project(),
        }
    }
}

fn default_tracing_key_env() -> String {
    "LANGCHAIN_API_KEY".to_string()
}

fn default_tracing_project() -> String {
    "ragas-eval".to_string()
}

/// Command-line overrides, applied after the file and `RETRIEVAL_STRATEGY`
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub strategy: Option<String>,
    pub dataset: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGAS_EVAL_CONFIG environment variable
    /// 2. ./config.toml in current directory (defaults if absent)
    pub fn load() -> Result<Self> {
        Self::load_with(&Overrides::default())
    }

    /// Like [`Config::load`], with `overrides` taking precedence over both the
    /// file and the environment. Validation runs once, on the merged result.
    pub fn load_with(overrides: &Overrides) -> Result<Self> {
        let _ = dotenv::dotenv();

        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let mut config = Self::load_from(explicit.as_deref())?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Read `explicit` (must exist) or the default `config.toml` (optional).
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                return Err(EvalError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            log::debug!("No {} found, using built-in defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            EvalError::Configuration(msg) => {
                EvalError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| EvalError::Configuration(format!("invalid config: {}", e)))
    }

    /// Apply environment overrides through `lookup` (the process env in `load`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strategy) = lookup(STRATEGY_ENV).filter(|s| !s.trim().is_empty()) {
            log::debug!("{} overrides retrieval_strategy: {}", STRATEGY_ENV, strategy);
            self.evaluation.retrieval_strategy = strategy.trim().to_string();
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(strategy) = &overrides.strategy {
            self.evaluation.retrieval_strategy = strategy.clone();
        }
        if let Some(dataset) = &overrides.dataset {
            self.evaluation.dataset_path = dataset.clone();
        }
        if let Some(output_dir) = &overrides.output_dir {
            self.evaluation.output_dir = output_dir.clone();
        }
        if let Some(concurrency) = overrides.concurrency {
            self.evaluation.concurrency = concurrency;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.evaluation.concurrency == 0 {
            return Err(EvalError::Configuration(
                "evaluation.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.corpus.retrieve_k == 0 {
            return Err(EvalError::Configuration(
                "corpus.retrieve_k must be greater than 0".to_string(),
            ));
        }
        if self.generation.max_retries > MAX_RETRIES {
            return Err(EvalError::Configuration(format!(
                "generation.max_retries must be at most {}, got {}",
                MAX_RETRIES, self.generation.max_retries
            )));
        }
        if !(self.fusion.k.is_finite() && self.fusion.k > 0.0) {
            return Err(EvalError::Configuration(format!(
                "fusion.k must be a positive number, got {}",
                self.fusion.k
            )));
        }
        if self.fusion.top_n == Some(0) {
            return Err(EvalError::Configuration(
                "fusion.top_n must be greater than 0 when set".to_string(),
            ));
        }
        for (name, weight) in &self.fusion.weights {
            if !(weight.is_finite() && *weight >= 0.0) {
                return Err(EvalError::Configuration(format!(
                    "fusion.weights.{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.judge.metrics.is_empty() {
            return Err(EvalError::Configuration(
                "judge.metrics must name at least one metric".to_string(),
            ));
        }
        self.strategy_ids()?;
        Ok(())
    }

    /// Strategies named by `evaluation.retrieval_strategy` (comma-separated), in order,
    /// without duplicates.
    pub fn strategy_ids(&self) -> Result<Vec<StrategyId>> {
        parse_strategy_list(&self.evaluation.retrieval_strategy)
    }

    /// Immutable per-run strategy configuration
    pub fn strategy_config(&self, strategy_id: StrategyId) -> StrategyConfig {
        StrategyConfig {
            strategy_id,
            reranker_enabled: self.fusion.reranker_enabled,
            retriever_weights: self.fusion.weights.clone(),
            retrieve_k: self.corpus.retrieve_k,
            fusion: FusionParams {
                k: self.fusion.k,
                top_n: self.fusion.top_n,
            },
        }
    }

    pub fn judge_model(&self) -> &str {
        self.judge.model.as_deref().unwrap_or(&self.generation.model)
    }
}

/// Parse a comma-separated strategy list such as `naive,ensemble`.
pub fn parse_strategy_list(list: &str) -> Result<Vec<StrategyId>> {
    let mut ids = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id: StrategyId = name.parse()?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(EvalError::Configuration(
            "no retrieval strategy selected".to_string(),
        ));
    }
    Ok(ids)
}

/// Secrets resolved once at startup
#[derive(Clone)]
pub struct Credentials {
    pub generation: String,
    pub reranking: Option<String>,
    pub tracing: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("generation", &"<redacted>")
            .field("reranking", &self.reranking.as_ref().map(|_| "<redacted>"))
            .field("tracing", &self.tracing.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials through `lookup` (the process env in the binary).
    ///
    /// The generation credential is required; the others only switch features on.
    pub fn resolve<F>(config: &Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let generation = present(&config.generation.api_key_env).ok_or_else(|| {
            EvalError::Configuration(format!(
                "Environment variable {} not set. Set it in your .env file or as an \
                 environment variable with your OpenAI API key.",
                config.generation.api_key_env
            ))
        })?;

        let reranking = present(&config.reranker.api_key_env);
        if reranking.is_none() {
            log::info!(
                "{} not set; ensemble runs will skip reranking",
                config.reranker.api_key_env
            );
        }

        Ok(Self {
            generation,
            reranking,
            tracing: present(&config.tracing.api_key_env),
        })
    }

    /// Tracing project to record in run metadata, if tracing is configured
    pub fn tracing_project(&self, config: &Config) -> Option<String> {
        self.tracing.as_ref().map(|_| config.tracing.project.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.evaluation.retrieval_strategy, "ensemble");
        assert_eq!(config.fusion.k, 60.0);
        assert!(config.fusion.reranker_enabled);
        assert_eq!(config.fusion.weights.len(), 2);
        assert_eq!(config.generation.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.judge.metrics.len(), 4);
        assert_eq!(config.judge_model(), "gpt-4o-mini");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
[evaluation]
concurrency = 8
retrieval_strategy = "naive"

[fusion]
k = 30.0
reranker_enabled = false

[fusion.weights]
dense = 0.7
bm25 = 0.3

[judge]
model = "gpt-4o"
"#,
        )
        .unwrap();
        assert_eq!(config.evaluation.concurrency, 8);
        assert_eq!(config.corpus.retrieve_k, 5);
        assert_eq!(config.fusion.weights["dense"], 0.7);
        assert_eq!(config.judge_model(), "gpt-4o");

        let strategy = config.strategy_config(StrategyId::Ensemble);
        assert_eq!(strategy.fusion.k, 30.0);
        assert!(!strategy.reranker_enabled);
        assert_eq!(strategy.retrieve_k, 5);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = Config::from_toml_str("[evaluation\nconcurrency = 2").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[evaluation]\nconcurrency = 0",
            "[corpus]\nretrieve_k = 0",
            "[fusion]\nk = 0.0",
            "[fusion]\ntop_n = 0",
            "[fusion.weights]\ndense = -1.0",
            "[judge]\nmetrics = []",
            "[generation]\nmax_retries = 64",
            "[evaluation]\nretrieval_strategy = \"hyde\"",
        ];
        for case in cases {
            let config = Config::from_toml_str(case).unwrap();
            assert!(config.validate().unwrap_err().is_configuration(), "{}", case);
        }
    }

    #[test]
    fn test_env_override_strategy() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("RETRIEVAL_STRATEGY", " sparse-lexical ")]));
        assert_eq!(config.strategy_ids().unwrap(), vec![StrategyId::SparseLexical]);

        config.apply_env_overrides(env(&[("RETRIEVAL_STRATEGY", "")]));
        assert_eq!(config.evaluation.retrieval_strategy, "sparse-lexical");
    }

    #[test]
    fn test_cli_overrides_win_over_env_before_validation() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("RETRIEVAL_STRATEGY", "hyde")]));
        assert!(config.validate().is_err());

        config.apply_overrides(&Overrides {
            strategy: Some("naive,bm25".to_string()),
            concurrency: Some(3),
            ..Overrides::default()
        });
        config.validate().unwrap();
        assert_eq!(
            config.strategy_ids().unwrap(),
            vec![StrategyId::Naive, StrategyId::SparseLexical]
        );
        assert_eq!(config.evaluation.concurrency, 3);
    }

    #[test]
    fn test_max_retries_bound() {
        let mut config = Config::default();
        config.generation.max_retries = MAX_RETRIES;
        config.validate().unwrap();
        config.generation.max_retries = MAX_RETRIES + 1;
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_parse_strategy_list() {
        assert_eq!(
            parse_strategy_list("naive, ensemble,naive").unwrap(),
            vec![StrategyId::Naive, StrategyId::Ensemble]
        );
        assert!(matches!(
            parse_strategy_list("naive,hyde"),
            Err(EvalError::UnknownStrategy(_))
        ));
        assert!(parse_strategy_list(" , ").unwrap_err().is_configuration());
    }

    #[test]
    fn test_load_from_explicit_and_missing_paths() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("eval.toml");
        fs::write(&path, "[corpus]\nretrieve_k = 9\n").unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.corpus.retrieve_k, 9);

        let missing = temp_dir.path().join("nope.toml");
        assert!(Config::load_from(Some(&missing)).unwrap_err().is_configuration());
    }

    #[test]
    fn test_credentials_require_generation_key() {
        let config = Config::default();
        let err =
            Credentials::resolve(&config, env(&[("COHERE_API_KEY", "co-key")])).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let err = Credentials::resolve(&config, env(&[("OPENAI_API_KEY", "  ")])).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_credentials_optional_features() {
        let config = Config::default();
        let creds = Credentials::resolve(&config, env(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(creds.generation, "sk-test");
        assert!(creds.reranking.is_none());
        assert!(creds.tracing_project(&config).is_none());

        let creds = Credentials::resolve(
            &config,
            env(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("COHERE_API_KEY", "co-key"),
                ("LANGCHAIN_API_KEY", "ls-key"),
            ]),
        )
        .unwrap();
        assert_eq!(creds.reranking.as_deref(), Some("co-key"));
        assert_eq!(creds.tracing_project(&config).as_deref(), Some("ragas-eval"));
        assert!(!format!("{:?}", creds).contains("sk-test"));
    }
}

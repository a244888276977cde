//! Strategy identifiers, per-run strategy configuration, and the registry that
//! resolves them into runnable retrieval strategies.

use crate::error::{Result, EvalError};
use crate::retrieval::fusion::{reciprocal_rank_fusion, FusionParams};
use crate::retrieval::rerank::Reranker;
use crate::retrieval::{RetrievedContext, Retriever, BM25_RETRIEVER, DENSE_RETRIEVER};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Closed set of retrieval strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyId {
    /// Single dense retriever
    Naive,
    /// Keyword-statistical retriever (BM25)
    SparseLexical,
    /// Fusion of several retrievers, optionally reranked
    Ensemble,
}

impl StrategyId {
    pub const ALL: [StrategyId; 3] = [
        StrategyId::Naive,
        StrategyId::SparseLexical,
        StrategyId::Ensemble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::Naive => "naive",
            StrategyId::SparseLexical => "sparse-lexical",
            StrategyId::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(StrategyId::Naive),
            // "bm25" is the name older run scripts used
            "sparse-lexical" | "bm25" => Ok(StrategyId::SparseLexical),
            "ensemble" => Ok(StrategyId::Ensemble),
            _ => Err(EvalError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Immutable retrieval settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub strategy_id: StrategyId,
    pub reranker_enabled: bool,
    pub retriever_weights: BTreeMap<String, f64>,
    /// Contexts requested from each retriever
    pub retrieve_k: usize,
    pub fusion: FusionParams,
}

impl StrategyConfig {
    /// Defaults: equal weights for dense and bm25, RRF k = 60, reranking on.
    pub fn new(strategy_id: StrategyId) -> Self {
        Self {
            strategy_id,
            reranker_enabled: true,
            retriever_weights: BTreeMap::from([
                (DENSE_RETRIEVER.to_string(), 0.5),
                (BM25_RETRIEVER.to_string(), 0.5),
            ]),
            retrieve_k: 5,
            fusion: FusionParams::default(),
        }
    }
}

/// Degraded-mode notes collected during one run.
///
/// Each distinct note is kept once, in first-seen order, and logged at `warn`
/// the first time it appears.
#[derive(Debug, Clone, Default)]
pub struct DegradationLog {
    notes: Arc<Mutex<Vec<String>>>,
}

impl DegradationLog {
    pub fn record(&self, note: impl Into<String>) {
        let note = note.into();
        let mut notes = self.notes.lock().unwrap();
        if !notes.contains(&note) {
            log::warn!("degraded mode: {}", note);
            notes.push(note);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }
}

/// Fusion of several retrievers with an optional reranking stage
pub struct EnsembleStrategy {
    retrievers: Vec<Arc<dyn Retriever>>,
    weights: BTreeMap<String, f64>,
    fusion: FusionParams,
    retrieve_k: usize,
    reranker: Option<Arc<dyn Reranker>>,
}

impl EnsembleStrategy {
    pub fn retriever_names(&self) -> Vec<&str> {
        self.retrievers.iter().map(|r| r.name()).collect()
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    async fn retrieve(
        &self,
        question: &str,
        degradations: &DegradationLog,
    ) -> Result<Vec<RetrievedContext>> {
        let lists = try_join_all(
            self.retrievers
                .iter()
                .map(|r| r.retrieve(question, self.retrieve_k)),
        )
        .await?;
        let fused = reciprocal_rank_fusion(&lists, &self.weights, &self.fusion);

        let reranker = match &self.reranker {
            Some(reranker) => reranker,
            None => return Ok(fused.into_contexts()),
        };

        match reranker.rerank(question, fused.clone()).await {
            Ok(reranked) => Ok(reranked.into_contexts()),
            Err(e) => {
                degradations.record(format!("reranking failed, using fused order ({})", e));
                Ok(fused.into_contexts())
            }
        }
    }
}

/// A resolved, runnable retrieval strategy
pub enum RetrievalStrategy {
    Naive { retriever: Arc<dyn Retriever>, k: usize },
    SparseLexical { retriever: Arc<dyn Retriever>, k: usize },
    Ensemble(EnsembleStrategy),
}

impl RetrievalStrategy {
    pub fn id(&self) -> StrategyId {
        match self {
            RetrievalStrategy::Naive { .. } => StrategyId::Naive,
            RetrievalStrategy::SparseLexical { .. } => StrategyId::SparseLexical,
            RetrievalStrategy::Ensemble(_) => StrategyId::Ensemble,
        }
    }

    /// One-line description for logs, e.g. `ensemble (bm25+dense, reranked)`.
    pub fn describe(&self) -> String {
        match self {
            RetrievalStrategy::Naive { retriever, k }
            | RetrievalStrategy::SparseLexical { retriever, k } => {
                format!("{} ({}, k={})", self.id(), retriever.name(), k)
            }
            RetrievalStrategy::Ensemble(ensemble) => format!(
                "{} ({}, {})",
                self.id(),
                ensemble.retriever_names().join("+"),
                if ensemble.has_reranker() { "reranked" } else { "fused order" }
            ),
        }
    }

    /// Contexts for one question, best first. Ensemble failures to rerank are
    /// recorded in `degradations` and never surface as errors.
    pub async fn retrieve(
        &self,
        question: &str,
        degradations: &DegradationLog,
    ) -> Result<Vec<RetrievedContext>> {
        match self {
            RetrievalStrategy::Naive { retriever, k }
            | RetrievalStrategy::SparseLexical { retriever, k } => {
                retriever.retrieve(question, *k).await
            }
            RetrievalStrategy::Ensemble(ensemble) => {
                ensemble.retrieve(question, degradations).await
            }
        }
    }
}

/// Maps strategy identifiers to retrieval implementations
#[derive(Default)]
pub struct StrategyRegistry {
    retrievers: BTreeMap<String, Arc<dyn Retriever>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a retriever under its own `name()`; replaces any previous one.
    pub fn register(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.insert(retriever.name().to_string(), retriever);
        self
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    fn retriever(&self, name: &str, strategy: StrategyId) -> Result<Arc<dyn Retriever>> {
        self.retrievers.get(name).cloned().ok_or_else(|| {
            EvalError::Configuration(format!(
                "strategy '{}' needs the '{}' retriever, which is not registered",
                strategy, name
            ))
        })
    }

    /// Ensemble members: the retrievers named in `retriever_weights`, or every
    /// registered retriever when no weights are given.
    fn ensemble_members(&self, config: &StrategyConfig) -> Result<Vec<Arc<dyn Retriever>>> {
        let retrievers = if config.retriever_weights.is_empty() {
            self.retrievers.values().cloned().collect::<Vec<_>>()
        } else {
            config
                .retriever_weights
                .keys()
                .map(|name| self.retriever(name, config.strategy_id))
                .collect::<Result<Vec<_>>>()?
        };
        if retrievers.is_empty() {
            return Err(EvalError::Configuration(
                "ensemble strategy has no retrievers registered".to_string(),
            ));
        }
        Ok(retrievers)
    }

    /// Confirm `config` resolves without building it or recording degradations.
    ///
    /// Used to surface every configuration error before the first item runs.
    pub fn check(&self, config: &StrategyConfig) -> Result<()> {
        if config.retrieve_k == 0 {
            return Err(EvalError::Configuration(
                "retrieve_k must be greater than 0".to_string(),
            ));
        }
        match config.strategy_id {
            StrategyId::Naive => self.retriever(DENSE_RETRIEVER, config.strategy_id).map(|_| ()),
            StrategyId::SparseLexical => {
                self.retriever(BM25_RETRIEVER, config.strategy_id).map(|_| ())
            }
            StrategyId::Ensemble => self.ensemble_members(config).map(|_| ()),
        }
    }

    /// Look up a strategy by its textual identifier.
    pub fn resolve_named(
        &self,
        strategy_id: &str,
        config: &StrategyConfig,
        degradations: &DegradationLog,
    ) -> Result<RetrievalStrategy> {
        let id: StrategyId = strategy_id.parse()?;
        let config = StrategyConfig {
            strategy_id: id,
            ..config.clone()
        };
        self.resolve(&config, degradations)
    }

    /// Build the runnable strategy for `config`.
    ///
    /// An enabled reranker with no service behind it is recorded as degraded
    /// mode, not an error.
    pub fn resolve(
        &self,
        config: &StrategyConfig,
        degradations: &DegradationLog,
    ) -> Result<RetrievalStrategy> {
        self.check(config)?;

        match config.strategy_id {
            StrategyId::Naive => Ok(RetrievalStrategy::Naive {
                retriever: self.retriever(DENSE_RETRIEVER, config.strategy_id)?,
                k: config.retrieve_k,
            }),
            StrategyId::SparseLexical => Ok(RetrievalStrategy::SparseLexical {
                retriever: self.retriever(BM25_RETRIEVER, config.strategy_id)?,
                k: config.retrieve_k,
            }),
            StrategyId::Ensemble => {
                let retrievers = self.ensemble_members(config)?;

                let reranker = if config.reranker_enabled {
                    if self.reranker.is_none() {
                        degradations.record(
                            "reranker unavailable (no reranking credential), using fused order",
                        );
                    }
                    self.reranker.clone()
                } else {
                    None
                };

                Ok(RetrievalStrategy::Ensemble(EnsembleStrategy {
                    retrievers,
                    weights: config.retriever_weights.clone(),
                    fusion: config.fusion.clone(),
                    retrieve_k: config.retrieve_k,
                    reranker,
                }))
            }
        }
    }
}

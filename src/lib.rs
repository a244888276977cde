pub mod cache;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod eval;
pub mod llm;
pub mod report;
pub mod retrieval;
pub mod run;

pub use config::{Config, Credentials, Overrides};
pub use dataset::{Dataset, EvaluationItem};
pub use error::{EvalError, Result};
pub use eval::{EvaluationPipeline, EvaluationResult, PipelineOptions};
pub use retrieval::{StrategyConfig, StrategyId, StrategyRegistry};
pub use run::{evaluate, exit_code_for, RunOutcome, RunPlan};

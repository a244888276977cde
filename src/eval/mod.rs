//! Evaluation core: per-item metric types, the aggregator, the result
//! collector, and the pipeline that drives one strategy over a dataset.

pub mod aggregate;
pub mod collector;
pub mod pipeline;
pub mod types;

pub use aggregate::{aggregate, Aggregate};
pub use collector::{ItemOutcome, ResultCollector};
pub use pipeline::{EvaluationPipeline, PipelineOptions};
pub use types::{
    EvaluationResult, ItemFailure, MetricMap, MetricScore, MetricValue, RunMetadata, Stage,
};

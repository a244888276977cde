//! Evaluation CLI: run one or more retrieval strategies over a golden dataset,
//! score every answer, and write a result artifact per strategy.

use clap::Parser;
use ragas_eval::cache::QueryEmbeddingCache;
use ragas_eval::db::Db;
use ragas_eval::llm::{
    ChatGenerator, LlmJudgeScorer, OpenAIChatClient, OpenAIClient, OpenAIEmbedder,
};
use ragas_eval::report::{render_comparison, render_summary};
use ragas_eval::retrieval::{Bm25Retriever, CohereReranker, Reranker, VectorRetriever};
use ragas_eval::{
    evaluate, exit_code_for, Config, EvaluationPipeline, Overrides, PipelineOptions, RunPlan,
    StrategyRegistry,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Evaluate RAG retrieval strategies against a golden dataset.
#[derive(Parser, Debug)]
#[command(name = "ragas-eval", version)]
struct Args {
    /// Strategies to run, comma-separated (naive, sparse-lexical, ensemble).
    /// Overrides RETRIEVAL_STRATEGY and the config file.
    #[arg(long)]
    strategy: Option<String>,

    /// Dataset file (JSON array or JSON Lines).
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Directory for result artifacts.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Artifact file name shared by every strategy in this invocation.
    #[arg(long)]
    output_name: Option<String>,

    /// Items evaluated concurrently.
    #[arg(long)]
    concurrency: Option<usize>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            strategy: self.strategy.clone(),
            dataset: self.dataset.clone(),
            output_dir: self.output_dir.clone(),
            concurrency: self.concurrency,
        }
    }
}

/// Wire the OpenAI, Cohere and corpus collaborators for a validated plan.
fn build_pipeline(plan: &RunPlan) -> ragas_eval::Result<EvaluationPipeline> {
    let config = &plan.config;
    let credentials = &plan.credentials;
    let corpus = Db::open_existing(&config.corpus.db_path)?;

    let http = OpenAIClient::new(
        credentials.generation.clone(),
        &config.generation.base_url,
        config.generation.timeout(),
        config.generation.max_retries,
    )?;

    let mut embedder = OpenAIEmbedder::new(http.clone(), config.embeddings.model.clone());
    if config.embeddings.cache_capacity > 0 {
        let cache = QueryEmbeddingCache::new(config.embeddings.cache_capacity);
        embedder = embedder.with_cache(Arc::new(cache));
    }

    let reranker: Option<Arc<dyn Reranker>> = match &credentials.reranking {
        Some(key) => Some(Arc::new(CohereReranker::new(
            key.clone(),
            config.reranker.model.clone(),
            config.reranker.top_n,
            config.generation.timeout(),
        )?)),
        None => None,
    };

    let registry = StrategyRegistry::new()
        .register(Arc::new(VectorRetriever::new(corpus.clone(), Arc::new(embedder))))
        .register(Arc::new(Bm25Retriever::new(corpus)))
        .with_reranker(reranker);

    let generator = ChatGenerator::new(OpenAIChatClient::new(
        http.clone(),
        config.generation.model.clone(),
        config.generation.temperature,
        "openai-chat",
    ));
    let scorer = LlmJudgeScorer::new(
        OpenAIChatClient::new(http, config.judge_model().to_string(), 0.0, "openai-judge"),
        config.judge.metrics.clone(),
    );

    Ok(EvaluationPipeline::new(
        Arc::new(registry),
        Arc::new(generator),
        Arc::new(scorer),
        PipelineOptions {
            concurrency: config.evaluation.concurrency,
            tracing_project: credentials.tracing_project(config),
        },
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    let config = match Config::load_with(&args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            return ExitCode::from(exit_code_for(&e));
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing in-flight items");
            ctrl_c.cancel();
        }
    });

    let outcome = evaluate(
        config,
        |name| std::env::var(name).ok(),
        build_pipeline,
        args.output_name.as_deref(),
        cancel,
    )
    .await;

    match outcome {
        Ok(outcome) => {
            for (result, path) in outcome.results.iter().zip(&outcome.artifacts) {
                println!("{}", render_summary(result));
                println!("Results written to {}\n", path.display());
            }
            if outcome.results.len() > 1 {
                println!("{}", render_comparison(&outcome.results));
            }
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

//! Inspect an evaluation dataset without touching any model API.

use clap::Parser;
use ragas_eval::{Config, Dataset};
use std::path::PathBuf;

/// Dataset statistics: item count and reference coverage.
#[derive(Parser, Debug)]
#[command(name = "dataset-stats")]
struct Args {
    /// Dataset file (defaults to [evaluation].dataset_path from the config).
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// List every item id and question.
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let path = match args.dataset {
        Some(path) => path,
        None => Config::load()?.evaluation.dataset_path,
    };

    let dataset = Dataset::load(&path)?;
    let stats = dataset.stats();

    println!("=== Dataset: {} ===", path.display());
    println!("Items: {}", stats.items);
    println!(
        "Items without reference answer: {}",
        stats.items_without_reference_answer
    );
    println!("Mean reference contexts per item: {:.2}", stats.mean_reference_contexts);

    if args.list {
        println!();
        for item in dataset.items() {
            println!("{}\t{}", item.id, item.question);
        }
    }

    Ok(())
}

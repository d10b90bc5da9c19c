//! Indexwork CLI
//!
//! Drives a tantivy index through the barrier orchestrator.
//!
//! # Usage
//!
//! ```bash
//! # Index every markdown file of a directory, bulked
//! indexwork index --source docs/ --index-dir target/index --bulk --extension md
//!
//! # Apply JSON-lines operations ({"op":"add","id":"1","content":"..."})
//! indexwork apply --ops changes.jsonl --index-dir target/index
//!
//! # Search
//! indexwork search --index-dir target/index "quick fox"
//!
//! # Show the capabilities resolved for a backend version
//! indexwork capabilities --distribution elastic --version 7.10
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use indexwork_orchestration::{
    parse_version, resolve, BarrierOrchestrator, CommitStrategy, CompletionSignal, Distribution,
    OrchestratorConfig, RefreshStrategy, TracingFailureHandler,
};
use indexwork_storage::{
    collect_documents, read_operations, DocumentOperation, DocumentOutcome, DocumentWork,
    TantivyIndexContext, DEFAULT_WRITER_HEAP_BYTES,
};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "indexwork")]
#[command(about = "Ordered, batched writes to a full-text index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every file of a directory
    Index {
        /// Directory to index
        #[arg(short, long)]
        source: PathBuf,

        #[command(flatten)]
        target: IndexTarget,

        /// Submit documents as bulk work sets
        #[arg(long)]
        bulk: bool,

        /// Only index files with this extension (repeatable)
        #[arg(short, long = "extension")]
        extensions: Vec<String>,
    },

    /// Apply document operations from a JSON-lines file ("-" for stdin)
    Apply {
        #[arg(long)]
        ops: PathBuf,

        #[command(flatten)]
        target: IndexTarget,

        #[arg(long)]
        bulk: bool,
    },

    /// Search the index
    Search {
        #[arg(long, default_value = "target/indexwork")]
        index_dir: PathBuf,

        /// Maximum number of hits
        #[arg(short, long, default_value = "10")]
        limit: usize,

        query: String,
    },

    /// Resolve backend capabilities for a distribution and version
    Capabilities {
        #[arg(short, long, default_value = "elastic")]
        distribution: String,

        #[arg(short, long)]
        version: String,
    },
}

#[derive(clap::Args)]
struct IndexTarget {
    /// Index directory (created if missing)
    #[arg(long, default_value = "target/indexwork")]
    index_dir: PathBuf,

    /// Orchestrator configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Index writer heap in bytes
    #[arg(long, default_value_t = DEFAULT_WRITER_HEAP_BYTES)]
    writer_heap: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            source,
            target,
            bulk,
            extensions,
        } => {
            let documents = collect_documents(&source, &extensions)
                .with_context(|| format!("Unable to read {}", source.display()))?;
            info!(source = %source.display(), documents = documents.len(), "Collected documents");
            let operations = documents.into_iter().map(DocumentOperation::Add).collect();
            run_operations(&target, operations, bulk).await?;
        }
        Commands::Apply { ops, target, bulk } => {
            let operations = if ops == Path::new("-") {
                read_operations(std::io::stdin().lock())?
            } else {
                let file = std::fs::File::open(&ops)
                    .with_context(|| format!("Unable to open {}", ops.display()))?;
                read_operations(BufReader::new(file))?
            };
            run_operations(&target, operations, bulk).await?;
        }
        Commands::Search {
            index_dir,
            limit,
            query,
        } => {
            let index = TantivyIndexContext::open(&index_dir)?;
            for hit in index.search(&query, limit)? {
                println!("{:>8.3}  {}", hit.score, hit.id);
            }
        }
        Commands::Capabilities {
            distribution,
            version,
        } => {
            let distribution: Distribution = distribution.parse()?;
            let (major, minor) = parse_version(&version)?;
            let bundle = resolve(distribution, major, minor)?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
    }

    Ok(())
}

/// Submit every operation, close the orchestrator and report outcomes.
async fn run_operations(
    target: &IndexTarget,
    operations: Vec<DocumentOperation>,
    bulk: bool,
) -> anyhow::Result<()> {
    let config = match &target.config {
        Some(path) => OrchestratorConfig::from_yaml(path)?,
        None => OrchestratorConfig::default().with_name("indexwork"),
    };
    let index = Arc::new(
        TantivyIndexContext::open(&target.index_dir)?.with_writer_heap(target.writer_heap),
    );
    let orchestrator =
        BarrierOrchestrator::start(&config, Arc::clone(&index), Arc::new(TracingFailureHandler))?;

    let total = operations.len();
    let mut signals: Vec<CompletionSignal<Vec<DocumentOutcome>>> = Vec::new();
    let mut single_signals: Vec<CompletionSignal<DocumentOutcome>> = Vec::new();
    if bulk {
        let mut operations = operations.into_iter().peekable();
        while operations.peek().is_some() {
            let works: Vec<DocumentWork> = operations
                .by_ref()
                .take(config.max_bulk_size)
                .map(DocumentWork::new)
                .collect();
            signals.push(
                orchestrator
                    .submit_bulk(works, CommitStrategy::None, RefreshStrategy::None)
                    .await?,
            );
        }
    } else {
        for operation in operations {
            single_signals.push(
                orchestrator
                    .submit_work(DocumentWork::new(operation), CommitStrategy::None, RefreshStrategy::None)
                    .await?,
            );
        }
    }

    orchestrator.close().await?;

    let mut applied = 0;
    let mut failed = 0;
    for signal in signals {
        match signal.await {
            Ok(outcomes) => applied += outcomes.len(),
            Err(failure) => {
                warn!("Bulk work set failed: {}", failure);
                failed += 1;
            }
        }
    }
    for signal in single_signals {
        match signal.await {
            Ok(_) => applied += 1,
            Err(_) => failed += 1,
        }
    }

    info!(total, applied, failed_work_sets = failed, "Done");
    println!("{} of {} operations applied", applied, total);
    Ok(())
}

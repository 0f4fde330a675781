//! `localqa` command line.
//!
//! ```bash
//! localqa import data/fragments.jsonl --collection rules
//! localqa search "how to win" --collection rules
//! localqa ask "how do I win?" --collection rules
//! localqa status
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use localqa_core::config::{resolve_with_base, Config, Settings};
use localqa_core::types::{Language, Query};
use localqa_embed::get_default_embedder;
use localqa_hybrid::HybridSearchEngine;
use localqa_infer::{InstancePool, ProcessExecutorFactory, PromptTemplate};
use localqa_vector::{read_jsonl, LanceFragmentStore};

#[derive(Parser)]
#[command(name = "localqa")]
#[command(about = "Offline question answering over a local fragment store")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    query: QueryArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueryArgs {
    /// Knowledge collection (default: retrieval.collection)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Query language code, e.g. en, de (default: retrieval.language)
    #[arg(long, global = true)]
    language: Option<String>,

    /// Maximum fragments in the context
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Minimum relevance score in [0, 1]
    #[arg(long, global = true)]
    min_score: Option<f32>,

    /// Domain tag every fragment must carry (repeatable)
    #[arg(long = "domain", global = true)]
    domains: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the assembled context for a query
    Search { query: String },

    /// Retrieve context and generate an answer
    Ask { question: String },

    /// Show store and pool configuration
    Status,

    /// Import fragments from a JSON-lines file
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let settings = config.settings()?;
    let base = env::current_dir()?;

    match cli.command {
        Commands::Search { ref query } => {
            let engine = open_engine(&settings, &base).await?;
            let query = build_query(&engine, &cli.query, query);
            match engine.search(&query).await? {
                Some(context) => print!("{context}"),
                None => println!("No relevant fragments found."),
            }
        }
        Commands::Ask { ref question } => {
            let engine = open_engine(&settings, &base).await?;
            let query = build_query(&engine, &cli.query, question);
            let context = engine.search(&query).await?.unwrap_or_else(|| {
                warn!("no relevant fragments, asking without context");
                String::new()
            });
            let pool = start_pool(&settings, &base).await?;
            let answer = pool.ask(&context, question).await?;
            println!("{answer}");
            pool.dispose().await;
        }
        Commands::Status => {
            let store = open_store(&settings, &base).await?;
            let collection = cli.query.collection.as_deref().unwrap_or(&settings.retrieval.collection);
            println!("Store:        {} (table '{}')", lancedb_dir(&settings, &base).display(), settings.storage.table);
            println!("Fragments:    {}", store.count().await?);
            println!("Collection:   {collection} ({} fragments)", store.load_collection(collection).await?.len());
            println!("Embedding:    {} ({} dims)", settings.embedding.provider, settings.embedding.dim);
            println!("Executable:   {}", settings.executor.executable);
            println!("Model:        {}", resolve_with_base(&base, &settings.executor.model).display());
            println!("Max instances {}", settings.pool.max_instances);
            match ProcessExecutorFactory::new(settings.executor.clone(), &base).resolved_settings() {
                Ok(_) => println!("Inference:    ready"),
                Err(e) => println!("Inference:    {e}"),
            }
        }
        Commands::Import { ref path } => {
            let collection = cli.query.collection.as_deref().unwrap_or(&settings.retrieval.collection);
            let embedder = get_default_embedder(&settings.embedding)?;
            let fragments = read_jsonl(path, collection, embedder.as_ref())?;
            let store = open_store(&settings, &base).await?;
            let added = store.add_fragments(&fragments).await?;
            info!(added, path = %path.display(), "import complete");
            println!("Imported {added} fragments from {}", path.display());
        }
    }
    Ok(())
}

fn lancedb_dir(settings: &Settings, base: &std::path::Path) -> PathBuf { resolve_with_base(base, &settings.storage.lancedb_dir) }

async fn open_store(settings: &Settings, base: &std::path::Path) -> Result<LanceFragmentStore> {
    let dir = lancedb_dir(settings, base);
    LanceFragmentStore::open(&dir.to_string_lossy(), &settings.storage.table, settings.storage.embedding_dim).await
}

async fn open_engine(settings: &Settings, base: &std::path::Path) -> Result<HybridSearchEngine<LanceFragmentStore>> {
    let store = open_store(settings, base).await?;
    let embedder = get_default_embedder(&settings.embedding)?;
    Ok(HybridSearchEngine::new(store, embedder, settings.retrieval.clone()))
}

fn build_query(engine: &HybridSearchEngine<LanceFragmentStore>, args: &QueryArgs, text: &str) -> Query {
    let mut query = engine.query(text);
    if let Some(collection) = &args.collection { query.collection.clone_from(collection); }
    if let Some(language) = &args.language { query = query.with_language(Language::from_code(language)); }
    if let Some(top_k) = args.top_k { query = query.with_top_k(top_k); }
    if let Some(min) = args.min_score { query = query.with_min_relevance(min); }
    if !args.domains.is_empty() { query = query.with_domains(args.domains.iter().cloned()); }
    query
}

async fn start_pool(settings: &Settings, base: &std::path::Path) -> Result<InstancePool> {
    let factory = Arc::new(ProcessExecutorFactory::new(settings.executor.clone(), base));
    let pool = InstancePool::with_generation(
        settings.pool.clone(),
        factory,
        PromptTemplate::new(settings.prompt.system.clone()),
        settings.generation.clone(),
    )?;
    let pb = ProgressBar::new(settings.pool.max_instances as u64);
    pb.set_style(ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} instances {msg}")?.progress_chars("#>-"));
    pool.initialize_with_progress(|done, _total| pb.set_position(done as u64)).await?;
    pb.finish_with_message(format!("{} ready", pool.total_instances()));
    Ok(pool)
}

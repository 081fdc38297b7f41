use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::engine::{HybridMode, HybridOptions, SearchEngine};
use crate::fts::KeywordIndex;
use crate::output::{format_rank, format_score, print_json};
use crate::search::DistanceMetric;
use crate::server::models::DEFAULT_RERANK_PROMPT;
use crate::vectordb::TableStore;
use crate::{info_print, warn_print};

mod doctor;

/// Find the database tables that answer a natural-language question
#[derive(Parser, Debug)]
#[command(name = "tablescout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to <data dir>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a JSON table catalogue
    Index {
        /// Catalogue file: [{"table_name", "description", "keywords"?}, ...]
        catalogue: PathBuf,

        /// Clear existing tables first
        #[arg(short, long)]
        force: bool,
    },

    /// Vector search over table descriptions
    Search {
        /// Search query (e.g., "crimes by district")
        query: String,

        /// Number of tables to return
        #[arg(short = 'n', long, default_value = "10")]
        top_n: usize,

        /// Distance metric: cosine, L2 or dot_product
        #[arg(long, default_value = "cosine")]
        method: DistanceMetric,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Hybrid search: description vectors fused with tags or BM25 by RRF
    Hybrid {
        query: String,

        #[arg(short = 'n', long, default_value = "10")]
        top_n: usize,

        /// Fuse with BM25 keyword search instead of tag embeddings
        #[arg(long)]
        bm25: bool,

        #[arg(long, default_value = "cosine")]
        method: DistanceMetric,

        /// Weight of the description-vector ranking (defaults to config)
        #[arg(long)]
        vector_weight: Option<f64>,

        /// Weight of the tags / BM25 ranking (defaults to config)
        #[arg(long)]
        keyword_weight: Option<f64>,

        /// RRF constant (defaults to config)
        #[arg(long)]
        rrf_k: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Vector search followed by LLM reranking
    Rerank {
        query: String,

        /// Candidates retrieved and reranked
        #[arg(short = 'n', long, default_value = "50")]
        top_n: usize,

        /// Task description given to the LLM
        #[arg(long, default_value = DEFAULT_RERANK_PROMPT)]
        prompt: String,

        #[arg(long, default_value = "cosine")]
        method: DistanceMetric,

        #[arg(long)]
        json: bool,
    },

    /// Run the HTTP API
    Serve {
        /// Address to bind (defaults to config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (defaults to config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show statistics about the stores
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Remove every indexed table
    Clear {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Check configuration, stores and model servers
    Doctor,
}

impl Commands {
    fn wants_json(&self) -> bool {
        matches!(
            self,
            Self::Search { json: true, .. }
                | Self::Hybrid { json: true, .. }
                | Self::Rerank { json: true, .. }
                | Self::Stats { json: true }
        )
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.quiet || cli.command.wants_json() {
        crate::output::set_quiet(true);
    }

    check_args(&cli)?;
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Index { catalogue, force } => {
            crate::index::index(&config, &catalogue, force).await?;
            Ok(())
        }
        Commands::Search {
            query,
            top_n,
            method,
            json,
        } => search(&config, &query, top_n, method, json).await,
        Commands::Hybrid {
            query,
            top_n,
            bm25,
            method,
            vector_weight,
            keyword_weight,
            rrf_k,
            json,
        } => {
            let mode = if bm25 { HybridMode::Bm25 } else { HybridMode::Tags };
            let mut options = HybridOptions::from_config(&config.search, top_n, mode);
            options.metric = method;
            if let Some(weight) = vector_weight {
                options.vector_weight = weight;
            }
            if let Some(weight) = keyword_weight {
                options.keyword_weight = weight;
            }
            if let Some(k) = rrf_k {
                options.rrf_k = k;
            }
            hybrid(&config, &query, &options, json).await
        }
        Commands::Rerank {
            query,
            top_n,
            prompt,
            method,
            json,
        } => rerank(&config, &query, &prompt, top_n, method, json).await,
        Commands::Serve { host, port } => crate::server::serve(&config, host, port).await,
        Commands::Stats { json } => stats(&config, json),
        Commands::Clear { yes } => clear(&config, yes),
        Commands::Doctor => doctor::run(&config).await,
    }
}

async fn search(
    config: &Config,
    query: &str,
    top_n: usize,
    method: DistanceMetric,
    json: bool,
) -> Result<()> {
    let engine = SearchEngine::open(config)?;
    let results = engine.vector_search(query, top_n, method).await;
    engine.close()?;
    let results = results?;

    if json {
        return print_json(&results);
    }

    info_print!("\n🔍 {} ({})\n", query.bright_cyan(), method);
    if results.is_empty() {
        println!("{}", "No tables found".yellow());
    }
    for (i, table) in results.iter().enumerate() {
        println!(
            "{:>3}. {}  {}",
            i + 1,
            table.table_name.bold(),
            format_score(table.score as f64)
        );
    }
    Ok(())
}

async fn hybrid(config: &Config, query: &str, options: &HybridOptions, json: bool) -> Result<()> {
    let engine = SearchEngine::open(config)?;
    let results = engine.hybrid_search(query, options).await;
    engine.close()?;
    let results = results?;

    if json {
        return print_json(&results);
    }

    let keyword_label = match options.mode {
        HybridMode::Tags => "tags",
        HybridMode::Bm25 => "bm25",
    };
    info_print!(
        "\n🔍 {} (vector {} + {} {}, k={})\n",
        query.bright_cyan(),
        options.vector_weight,
        keyword_label,
        options.keyword_weight,
        options.rrf_k
    );
    if results.is_empty() {
        println!("{}", "No tables found".yellow());
    }
    for (i, result) in results.iter().enumerate() {
        println!(
            "{:>3}. {}  rrf {}  vec {}  {} {}",
            i + 1,
            result.table_name.bold(),
            format!("{:.5}", result.rrf_score).bright_green(),
            format_rank(result.vector_rank),
            keyword_label,
            format_rank(result.keyword_rank)
        );
    }
    Ok(())
}

async fn rerank(
    config: &Config,
    query: &str,
    prompt: &str,
    top_n: usize,
    method: DistanceMetric,
    json: bool,
) -> Result<()> {
    let engine = SearchEngine::open(config)?;
    info_print!("🧠 Reranking up to {} candidates with {}...", top_n, config.llm.model);
    let outcome = engine.search_rerank(query, prompt, top_n, method).await;
    engine.close()?;
    let outcome = outcome?;

    if json {
        return print_json(&outcome);
    }

    if outcome.is_degraded() {
        warn_print!(
            "{}",
            format!(
                "⚠️  {} of {} batches failed and {} tables were not scored; their scores are 0",
                outcome.degraded_batches, outcome.batches, outcome.unscored
            )
            .yellow()
        );
    }
    info_print!("\n🔍 {}\n", query.bright_cyan());
    if outcome.results.is_empty() {
        println!("{}", "No tables found".yellow());
    }
    for (i, result) in outcome.results.iter().enumerate() {
        println!(
            "{:>3}. {}  {}",
            i + 1,
            result.id.bold(),
            format_score(result.relevance_score as f64)
        );
    }
    Ok(())
}

fn stats(config: &Config, json: bool) -> Result<()> {
    let data_dir = config.data_dir()?;
    let store = TableStore::open(&config.store_path(), config.embedding.dimensions)?;
    let keywords = KeywordIndex::open(&data_dir)?;
    let store_stats = store.stats()?;
    let fts_stats = keywords.stats();

    if json {
        return print_json(&serde_json::json!({
            "data_dir": config.data_dir,
            "store": store_stats,
            "keyword_documents": fts_stats.num_documents,
        }));
    }

    println!("{}", "📊 Store Statistics".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("   Data dir: {}", config.data_dir.display());
    println!("   Tables: {}", store_stats.total_tables);
    println!("   With keywords: {}", store_stats.tagged_tables);
    println!("   Keyword documents: {}", fts_stats.num_documents);
    println!(
        "   Indexed: {}",
        if store_stats.indexed { "✅ Yes" } else { "❌ No" }
    );
    println!("   Dimensions: {}", store_stats.dimensions);
    Ok(())
}

fn clear(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        print!(
            "Delete every indexed table under {}? [y/N] ",
            config.data_dir.display()
        );
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    let data_dir = config.data_dir()?;
    let mut store = TableStore::open(&config.store_path(), config.embedding.dimensions)?;
    let mut keywords = KeywordIndex::open(&data_dir)?;
    store.clear()?;
    keywords.clear()?;
    store.close()?;
    keywords.close()?;

    info_print!("{}", "🗑️  All tables removed".green());
    Ok(())
}

/// Reject flag combinations clap cannot express
pub fn check_args(cli: &Cli) -> Result<()> {
    if let Commands::Hybrid {
        vector_weight,
        keyword_weight,
        ..
    } = &cli.command
    {
        for weight in [vector_weight, keyword_weight].into_iter().flatten() {
            if !(0.0..=1.0).contains(weight) {
                bail!("weights must be between 0.0 and 1.0, got {}", weight);
            }
        }
    }
    Ok(())
}

//! Catalogue ingestion
//!
//! A catalogue is a JSON array of tables:
//!
//! ```json
//! [
//!   {"table_name": "crimes", "description": "Registered crimes by district",
//!    "keywords": "crimes, location, date"},
//!   {"table_name": "schools", "description": "Schools and pupils",
//!    "tags": {"keywords": ["schools", "pupils"]}}
//! ]
//! ```
//!
//! Each description (and keyword list, when present) is embedded, written to
//! the table store and the keyword index, and the vector indexes are rebuilt.

use anyhow::{Context, Result};
use colored::Colorize;
use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::embed::EmbeddingService;
use crate::fts::KeywordIndex;
use crate::vectordb::{EmbeddedTable, TableRecord, TableStore};
use crate::{info_print, warn_print};

/// Embedding requests in flight during ingestion
const EMBED_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Keywords {
    Text(String),
    List(Vec<String>),
}

impl Keywords {
    fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Tags {
    #[serde(default)]
    keywords: Option<Keywords>,
}

/// One table as it appears in a catalogue file
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogueEntry {
    #[serde(default)]
    table_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    keywords: Option<Keywords>,
    #[serde(default)]
    tags: Option<Tags>,
}

impl CatalogueEntry {
    /// Top-level `keywords`, else `tags.keywords`; empty lists count as absent
    fn keywords(&self) -> Option<String> {
        self.keywords
            .as_ref()
            .or_else(|| self.tags.as_ref().and_then(|t| t.keywords.as_ref()))
            .map(Keywords::joined)
            .filter(|k| !k.is_empty())
    }

    fn into_record(self) -> Option<TableRecord> {
        let keywords = self.keywords();
        let name = self.table_name.trim();
        let description = self.description.trim();
        if name.is_empty() || description.is_empty() {
            return None;
        }
        Some(TableRecord::new(name, description, keywords))
    }
}

pub fn load_catalogue(path: &Path) -> Result<Vec<CatalogueEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalogue {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Catalogue {} is not a JSON array of tables", path.display()))
}

/// Turn catalogue entries into records, dropping entries without a name or
/// description. Returns the records and the number of entries skipped.
pub fn prepare_records(entries: Vec<CatalogueEntry>) -> (Vec<TableRecord>, usize) {
    let mut records = Vec::with_capacity(entries.len());
    let mut skipped = 0;

    for (position, entry) in entries.into_iter().enumerate() {
        let label = if entry.table_name.trim().is_empty() {
            format!("entry #{}", position + 1)
        } else {
            entry.table_name.clone()
        };
        match entry.into_record() {
            Some(record) => records.push(record),
            None => {
                warn!(entry = %label, "catalogue entry without name or description skipped");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub tagged: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Embed `records` and write them to both stores, then rebuild the indexes
pub async fn ingest(
    records: Vec<TableRecord>,
    embeddings: &EmbeddingService,
    store: &mut TableStore,
    keywords: &mut KeywordIndex,
    progress: &ProgressBar,
) -> Result<IndexSummary> {
    let start = Instant::now();
    progress.set_length(records.len() as u64);

    let embedded: Vec<EmbeddedTable> = stream::iter(records)
        .map(|record| async move {
            let description_embedding = embeddings
                .embed_document(&record.description)
                .await
                .with_context(|| format!("Failed to embed description of {}", record.table_name))?;
            let tags_embedding = match &record.keywords {
                Some(k) => Some(embeddings.embed_document(k).await.with_context(|| {
                    format!("Failed to embed keywords of {}", record.table_name)
                })?),
                None => None,
            };
            progress.inc(1);
            anyhow::Ok(EmbeddedTable {
                record,
                description_embedding,
                tags_embedding,
            })
        })
        .buffered(EMBED_CONCURRENCY)
        .try_collect()
        .await?;

    for table in &embedded {
        match &table.record.keywords {
            Some(k) => keywords.upsert(&table.record.table_name, k)?,
            None => keywords.delete(&table.record.table_name)?,
        }
    }

    let tagged = embedded.iter().filter(|t| t.tags_embedding.is_some()).count();
    let indexed = store.upsert_tables(embedded)?;
    store.build_index()?;
    keywords.commit()?;

    debug!(indexed, tagged, elapsed = ?start.elapsed(), "catalogue ingested");

    Ok(IndexSummary {
        indexed,
        tagged,
        skipped: 0,
        elapsed: start.elapsed(),
    })
}

/// `tablescout index <catalogue.json> [--force]`
pub async fn index(config: &Config, catalogue: &Path, force: bool) -> Result<IndexSummary> {
    info_print!("{}", "🚀 Tablescout Indexer".bright_cyan().bold());
    info_print!("{}", "=".repeat(60));
    info_print!("📄 Catalogue: {}", catalogue.display());
    info_print!("💾 Data dir: {}", config.data_dir.display());
    info_print!(
        "🧠 Embeddings: {} ({} dims)",
        config.embedding.model,
        config.embedding.dimensions
    );

    let (records, skipped) = prepare_records(load_catalogue(catalogue)?);
    if skipped > 0 {
        warn_print!(
            "{}",
            format!("⚠️  Skipped {} entries without a name or description", skipped).yellow()
        );
    }
    if records.is_empty() {
        info_print!("\n{}", "No tables to index!".yellow());
        return Ok(IndexSummary {
            skipped,
            ..IndexSummary::default()
        });
    }

    let data_dir = config.data_dir()?;
    let embeddings = EmbeddingService::from_config(&config.embedding)?;
    let mut store = TableStore::open(&config.store_path(), config.embedding.dimensions)?;
    let mut keywords = KeywordIndex::open(&data_dir)?;

    if force {
        info_print!("\n{}", "🗑️  Clearing existing tables...".yellow());
        store.clear()?;
        keywords.clear()?;
    }

    info_print!("\n🔄 Embedding {} tables...", records.len());
    let progress = if crate::output::is_quiet() {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(records.len() as u64)
    };
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("█▓▒░ "),
    );

    let mut summary = ingest(records, &embeddings, &mut store, &mut keywords, &progress).await?;
    summary.skipped = skipped;
    progress.finish_with_message("Done!");

    let stats = store.stats()?;
    let fts_stats = keywords.stats();
    store.close()?;
    keywords.close()?;

    info_print!("\n{}", "📊 Final Statistics".bright_green().bold());
    info_print!("{}", "=".repeat(60));
    info_print!("   Indexed now: {}", summary.indexed);
    info_print!("   With keywords: {}", summary.tagged);
    info_print!("   Total tables: {}", stats.total_tables);
    info_print!("   Keyword documents: {}", fts_stats.num_documents);
    info_print!("   Time: {:?}", summary.elapsed);
    info_print!("\n{}", "✨ Indexing complete!".bright_green().bold());
    info_print!("   Run {} to search", "tablescout search <query>".bright_cyan());

    Ok(summary)
}

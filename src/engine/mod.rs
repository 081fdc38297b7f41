//! `SearchEngine`: the service handle behind the CLI and the HTTP server
//!
//! Holds the embedding service, one retrieval source per description metric,
//! the tag and keyword sources, the metadata store and the reranker. All
//! collaborators are trait objects so tests can swap in mocks through
//! [`SearchEngine::builder`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{validate_weight, Config, SearchConfig};
use crate::embed::EmbeddingService;
use crate::error::{Result, SearchError};
use crate::fts::KeywordIndex;
use crate::fusion::DEFAULT_RRF_K;
use crate::rerank::{LlmScorer, OllamaScorer, RerankCandidate, RerankOutcome, Reranker};
use crate::search::{
    round_score, DescriptionVectorSource, DistanceMetric, KeywordSource, RetrievalCoordinator,
    RetrievalQuery, RetrievalSource, TagsVectorSource, WeightedSource,
};
use crate::vectordb::{MetadataStore, StoreMetadata, TableStore};

/// Which signal is fused with description vectors in a hybrid search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HybridMode {
    /// Cosine similarity over tag embeddings
    #[default]
    Tags,
    /// BM25 over tag keywords
    Bm25,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridOptions {
    pub top_n: usize,
    pub metric: DistanceMetric,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub rrf_k: u32,
    pub mode: HybridMode,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            metric: DistanceMetric::Cosine,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            rrf_k: DEFAULT_RRF_K,
            mode: HybridMode::Tags,
        }
    }
}

impl HybridOptions {
    /// Options seeded from configured weights and k
    pub fn from_config(search: &SearchConfig, top_n: usize, mode: HybridMode) -> Self {
        Self {
            top_n,
            vector_weight: search.vector_weight,
            keyword_weight: search.keyword_weight,
            rrf_k: search.rrf_k,
            mode,
            ..Self::default()
        }
    }
}

/// A table with its normalized similarity score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTable {
    pub table_name: String,
    pub score: f32,
}

/// A fused hybrid search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    pub table_name: String,
    pub rrf_score: f64,
    pub vector_rank: Option<u32>,
    /// Rank from the tags or BM25 source, depending on the mode
    pub keyword_rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub tables: Option<usize>,
    pub tagged_tables: Option<usize>,
    pub indexed: Option<bool>,
    pub keyword_documents: Option<usize>,
    pub embedding_model: String,
    pub rerank_model: String,
}

/// Storage handles owned by an engine opened from disk
struct Stores {
    tables: Arc<TableStore>,
    keywords: Arc<KeywordIndex>,
}

pub struct SearchEngine {
    embeddings: Arc<EmbeddingService>,
    vector_sources: HashMap<DistanceMetric, Arc<dyn RetrievalSource>>,
    tags: Option<Arc<dyn RetrievalSource>>,
    keywords: Option<Arc<dyn RetrievalSource>>,
    metadata: Arc<dyn MetadataStore>,
    reranker: Reranker,
    coordinator: RetrievalCoordinator,
    stores: Option<Stores>,
}

impl SearchEngine {
    /// Open the stores under `config.data_dir` and connect the model clients
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let data_dir = config.data_dir()?;

        let embeddings = Arc::new(EmbeddingService::from_config(&config.embedding)?);
        let tables = Arc::new(TableStore::open(
            &config.store_path(),
            config.embedding.dimensions,
        )?);
        let keywords = Arc::new(KeywordIndex::open(&data_dir)?);
        let scorer = Arc::new(OllamaScorer::new(
            config.llm.host.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
            config.llm_timeout(),
        )?);

        let mut builder = Self::builder()
            .config(config)
            .embeddings(embeddings)
            .tags_source(Arc::new(TagsVectorSource::new(Arc::clone(&tables))))
            .keyword_source(Arc::new(KeywordSource::new(Arc::clone(&keywords))))
            .metadata(Arc::new(StoreMetadata::new(Arc::clone(&tables))))
            .scorer(scorer);
        for metric in DistanceMetric::ALL {
            builder = builder.vector_source(
                metric,
                Arc::new(DescriptionVectorSource::new(Arc::clone(&tables), metric)),
            );
        }

        let mut engine = builder.build()?;
        engine.stores = Some(Stores { tables, keywords });

        info!(
            data_dir = %data_dir.display(),
            embedding_model = engine.embeddings.model_name(),
            rerank_model = engine.reranker.model_name(),
            "search engine opened"
        );
        Ok(engine)
    }

    pub fn builder() -> SearchEngineBuilder {
        SearchEngineBuilder::default()
    }

    /// Release the stores, flushing LMDB and the keyword index writer
    pub fn close(self) -> anyhow::Result<()> {
        let Self {
            vector_sources,
            tags,
            keywords,
            metadata,
            stores,
            ..
        } = self;
        // Sources and metadata hold the other store references
        drop((vector_sources, tags, keywords, metadata));

        let Some(stores) = stores else {
            return Ok(());
        };

        match Arc::try_unwrap(stores.tables) {
            Ok(tables) => tables.close()?,
            Err(_) => warn!("table store still shared at close, leaving it to drop"),
        }
        match Arc::try_unwrap(stores.keywords) {
            Ok(keywords) => keywords.close()?,
            Err(_) => warn!("keyword index still shared at close, leaving it to drop"),
        }

        info!("search engine closed");
        Ok(())
    }

    fn vector_source(&self, metric: DistanceMetric) -> Result<&Arc<dyn RetrievalSource>> {
        self.vector_sources.get(&metric).ok_or_else(|| {
            SearchError::config(format!("no vector source configured for metric {}", metric))
        })
    }

    async fn embed(&self, query: &str) -> Result<RetrievalQuery> {
        let embedding = self.embeddings.embed_query(query).await?;
        Ok(RetrievalQuery {
            text: query.to_string(),
            embedding,
        })
    }

    /// Nearest tables by description embedding, scores normalized for `metric`
    pub async fn vector_search(
        &self,
        query: &str,
        top_n: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<ScoredTable>> {
        check_top_n(top_n)?;
        let source = self.vector_source(metric)?;
        let query = self.embed(query).await?;

        let candidates = self
            .coordinator
            .retrieve(source.as_ref(), &query, top_n)
            .await?;

        Ok(candidates
            .into_iter()
            .map(|c| ScoredTable {
                table_name: c.id,
                score: round_score(c.score.unwrap_or(0.0)),
            })
            .collect())
    }

    /// Description vectors fused with tag vectors or BM25 keywords by RRF
    pub async fn hybrid_search(
        &self,
        query: &str,
        options: &HybridOptions,
    ) -> Result<Vec<HybridResult>> {
        check_top_n(options.top_n)?;
        validate_weight("vector_weight", options.vector_weight)?;
        validate_weight("keyword_weight", options.keyword_weight)?;

        let vector = Arc::clone(self.vector_source(options.metric)?);
        let keyword = match options.mode {
            HybridMode::Tags => self.tags.as_ref(),
            HybridMode::Bm25 => self.keywords.as_ref(),
        }
        .cloned()
        .ok_or_else(|| {
            SearchError::config(format!("no {:?} source configured", options.mode))
        })?;

        let vector_name = vector.name().to_string();
        let keyword_name = keyword.name().to_string();
        let sources = [
            WeightedSource::new(vector, options.vector_weight),
            WeightedSource::new(keyword, options.keyword_weight),
        ];

        let query = self.embed(query).await?;
        let fused = self
            .coordinator
            .fused_search(&sources, &query, options.top_n, options.rrf_k)
            .await?;

        debug!(mode = ?options.mode, results = fused.len(), "hybrid search fused");

        Ok(fused
            .into_iter()
            .map(|r| HybridResult {
                vector_rank: r.rank_in(&vector_name),
                keyword_rank: r.rank_in(&keyword_name),
                rrf_score: r.fused_score,
                table_name: r.id,
            })
            .collect())
    }

    /// Vector retrieval of `top_n` candidates, then LLM reranking.
    ///
    /// Retrieval and metadata failures fail the call; LLM failures only show
    /// up as zero scores and `degraded_batches` in the outcome.
    pub async fn search_rerank(
        &self,
        query: &str,
        context: &str,
        top_n: usize,
        metric: DistanceMetric,
    ) -> Result<RerankOutcome> {
        check_top_n(top_n)?;
        let source = self.vector_source(metric)?;
        let retrieval_query = self.embed(query).await?;

        let candidates = self
            .coordinator
            .retrieve(source.as_ref(), &retrieval_query, top_n)
            .await?;
        let ids: Vec<String> = candidates.into_iter().map(|c| c.id).collect();

        let mut descriptions = self.metadata.fetch(&ids).await?;
        let retrieved = ids.len();
        let candidates: Vec<RerankCandidate> = ids
            .into_iter()
            .filter_map(|id| {
                descriptions
                    .remove(&id)
                    .map(|description| RerankCandidate { id, description })
            })
            .collect();

        if candidates.len() < retrieved {
            debug!(
                dropped = retrieved - candidates.len(),
                "candidates without metadata excluded from reranking"
            );
        }

        Ok(self.reranker.rerank(query, context, candidates).await)
    }

    /// Store statistics; fails if a store cannot be read
    pub async fn health(&self) -> anyhow::Result<EngineHealth> {
        let mut health = EngineHealth {
            tables: None,
            tagged_tables: None,
            indexed: None,
            keyword_documents: None,
            embedding_model: self.embeddings.model_name().to_string(),
            rerank_model: self.reranker.model_name().to_string(),
        };

        if let Some(stores) = &self.stores {
            let tables = Arc::clone(&stores.tables);
            let keywords = Arc::clone(&stores.keywords);
            let (stats, fts_stats) = tokio::task::spawn_blocking(move || {
                anyhow::Ok((tables.stats()?, keywords.stats()))
            })
            .await??;
            health.tables = Some(stats.total_tables);
            health.tagged_tables = Some(stats.tagged_tables);
            health.indexed = Some(stats.indexed);
            health.keyword_documents = Some(fts_stats.num_documents);
        }
        Ok(health)
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }
}

fn check_top_n(top_n: usize) -> Result<()> {
    if top_n == 0 {
        return Err(SearchError::config("top_n must be at least 1"));
    }
    Ok(())
}

/// Assembles a [`SearchEngine`] from arbitrary collaborators
pub struct SearchEngineBuilder {
    config: Config,
    embeddings: Option<Arc<EmbeddingService>>,
    vector_sources: HashMap<DistanceMetric, Arc<dyn RetrievalSource>>,
    tags: Option<Arc<dyn RetrievalSource>>,
    keywords: Option<Arc<dyn RetrievalSource>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    scorer: Option<Arc<dyn LlmScorer>>,
}

impl Default for SearchEngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            embeddings: None,
            vector_sources: HashMap::new(),
            tags: None,
            keywords: None,
            metadata: None,
            scorer: None,
        }
    }
}

impl SearchEngineBuilder {
    /// Timeouts, batch size and concurrency are taken from `config`
    pub fn config(mut self, config: &Config) -> Self {
        self.config = config.clone();
        self
    }

    pub fn embeddings(mut self, embeddings: Arc<EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn vector_source(mut self, metric: DistanceMetric, source: Arc<dyn RetrievalSource>) -> Self {
        self.vector_sources.insert(metric, source);
        self
    }

    pub fn tags_source(mut self, source: Arc<dyn RetrievalSource>) -> Self {
        self.tags = Some(source);
        self
    }

    pub fn keyword_source(mut self, source: Arc<dyn RetrievalSource>) -> Self {
        self.keywords = Some(source);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn LlmScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn build(self) -> Result<SearchEngine> {
        self.config.validate()?;

        let embeddings = self
            .embeddings
            .ok_or_else(|| SearchError::config("search engine needs an embedding service"))?;
        let metadata = self
            .metadata
            .ok_or_else(|| SearchError::config("search engine needs a metadata store"))?;
        let scorer = self
            .scorer
            .ok_or_else(|| SearchError::config("search engine needs an LLM scorer"))?;
        if self.vector_sources.is_empty() {
            return Err(SearchError::config(
                "search engine needs at least one vector source",
            ));
        }

        let reranker = Reranker::new(
            scorer,
            self.config.search.rerank_batch_size,
            self.config.llm_timeout(),
        )?
        .with_max_concurrent(self.config.llm.max_concurrent_batches);

        Ok(SearchEngine {
            embeddings,
            vector_sources: self.vector_sources,
            tags: self.tags,
            keywords: self.keywords,
            metadata,
            reranker,
            coordinator: RetrievalCoordinator::new(self.config.retrieval_timeout()),
            stores: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing;

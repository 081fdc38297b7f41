use crate::info_print;
use crate::search::DistanceMetric;
use anyhow::{anyhow, Result};
use arroy::distances::{Cosine, DotProduct, Euclidean};
use arroy::{Database as ArroyDatabase, Distance, ItemId, Reader, Writer};
use heed::byteorder::BigEndian;
use heed::types::*;
use heed::{Database, EnvOpenOptions, RoTxn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;

/// Descriptive metadata for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_name: String,
    pub description: String,
    /// Comma separated keywords ("crimes, location, date")
    pub keywords: Option<String>,
}

impl TableRecord {
    pub fn new(
        table_name: impl Into<String>,
        description: impl Into<String>,
        keywords: Option<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            description: description.into(),
            keywords,
        }
    }
}

/// A table record together with its embeddings, ready to store
#[derive(Debug, Clone)]
pub struct EmbeddedTable {
    pub record: TableRecord,
    pub description_embedding: Vec<f32>,
    pub tags_embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTable {
    record: TableRecord,
    tagged: bool,
}

/// Table catalogue using arroy + heed (LMDB)
///
/// - `tables`: item id -> table record
/// - `names`: table name -> item id
/// - one arroy index of description vectors per distance metric
/// - one cosine arroy index of tag vectors (only tables with keywords)
pub struct TableStore {
    env: heed::Env,
    tables: Database<U32<BigEndian>, SerdeBincode<StoredTable>>,
    names: Database<Str, U32<BigEndian>>,
    cosine: ArroyDatabase<Cosine>,
    euclidean: ArroyDatabase<Euclidean>,
    dot_product: ArroyDatabase<DotProduct>,
    tags: ArroyDatabase<Cosine>,
    next_id: u32,
    tagged: usize,
    dimensions: usize,
    indexed: bool,
}

impl TableStore {
    /// Create or open a table store
    ///
    /// # Arguments
    /// * `db_path` - Path to the LMDB directory (e.g., "~/.tablescout/tables.db")
    /// * `dimensions` - Dimensionality of embeddings (e.g., 384, 1024)
    pub fn open(db_path: &Path, dimensions: usize) -> Result<Self> {
        info_print!("📦 Opening table store at: {}", db_path.display());

        std::fs::create_dir_all(db_path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(10 * 1024 * 1024 * 1024) // 10GB max
                .max_dbs(10)
                .open(db_path)?
        };

        let mut wtxn = env.write_txn()?;
        let tables: Database<U32<BigEndian>, SerdeBincode<StoredTable>> =
            env.create_database(&mut wtxn, Some("tables"))?;
        let names: Database<Str, U32<BigEndian>> =
            env.create_database(&mut wtxn, Some("names"))?;
        let cosine: ArroyDatabase<Cosine> =
            env.create_database(&mut wtxn, Some("vectors_cosine"))?;
        let euclidean: ArroyDatabase<Euclidean> =
            env.create_database(&mut wtxn, Some("vectors_l2"))?;
        let dot_product: ArroyDatabase<DotProduct> =
            env.create_database(&mut wtxn, Some("vectors_dot"))?;
        let tags: ArroyDatabase<Cosine> = env.create_database(&mut wtxn, Some("tags_cosine"))?;
        wtxn.commit()?;

        let (next_id, tagged, indexed) = {
            let rtxn = env.read_txn()?;
            let next_id = tables.last(&rtxn)?.map(|(id, _)| id + 1).unwrap_or(0);

            let mut tagged = 0;
            for entry in tables.iter(&rtxn)? {
                let (_, stored) = entry?;
                if stored.tagged {
                    tagged += 1;
                }
            }

            let indexed = match Reader::open(&rtxn, 0, cosine) {
                Ok(reader) if next_id > 0 => {
                    if reader.dimensions() != dimensions {
                        return Err(anyhow!(
                            "Store at {} holds {}-dimensional embeddings, configured model produces {}",
                            db_path.display(),
                            reader.dimensions(),
                            dimensions
                        ));
                    }
                    true
                }
                _ => false,
            };
            (next_id, tagged, indexed)
        };

        info_print!("✅ Table store opened ({} tables)", next_id);

        Ok(Self {
            env,
            tables,
            names,
            cosine,
            euclidean,
            dot_product,
            tags,
            next_id,
            tagged,
            dimensions,
            indexed,
        })
    }

    fn check_dimensions(&self, what: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(anyhow!(
                "{} dimension mismatch: expected {}, got {}",
                what,
                self.dimensions,
                embedding.len()
            ));
        }
        Ok(())
    }

    /// Insert tables, replacing any table already stored under the same name
    ///
    /// Returns the number of tables written. The index must be rebuilt afterwards.
    pub fn upsert_tables(&mut self, tables: Vec<EmbeddedTable>) -> Result<usize> {
        if tables.is_empty() {
            return Ok(0);
        }

        for table in &tables {
            self.check_dimensions("Description embedding", &table.description_embedding)?;
            if let Some(tags) = &table.tags_embedding {
                self.check_dimensions("Tags embedding", tags)?;
            }
        }

        let mut next_id = self.next_id;
        let mut tagged = self.tagged;

        let mut wtxn = self.env.write_txn()?;
        let cosine = Writer::new(self.cosine, 0, self.dimensions);
        let euclidean = Writer::new(self.euclidean, 0, self.dimensions);
        let dot_product = Writer::new(self.dot_product, 0, self.dimensions);
        let tags = Writer::new(self.tags, 0, self.dimensions);

        for table in &tables {
            let name = table.record.table_name.as_str();

            let id = match self.names.get(&wtxn, name)? {
                Some(id) => {
                    if let Some(previous) = self.tables.get(&wtxn, &id)? {
                        if previous.tagged {
                            tags.del_item(&mut wtxn, id)?;
                            tagged -= 1;
                        }
                    }
                    id
                }
                None => {
                    let id = next_id;
                    next_id += 1;
                    self.names.put(&mut wtxn, name, &id)?;
                    id
                }
            };

            cosine.add_item(&mut wtxn, id, &table.description_embedding)?;
            euclidean.add_item(&mut wtxn, id, &table.description_embedding)?;
            dot_product.add_item(&mut wtxn, id, &table.description_embedding)?;

            if let Some(embedding) = &table.tags_embedding {
                tags.add_item(&mut wtxn, id, embedding)?;
                tagged += 1;
            }

            let stored = StoredTable {
                record: table.record.clone(),
                tagged: table.tags_embedding.is_some(),
            };
            self.tables.put(&mut wtxn, &id, &stored)?;
        }

        wtxn.commit()?;

        self.next_id = next_id;
        self.tagged = tagged;
        self.indexed = false;

        Ok(tables.len())
    }

    /// Build the vector indexes
    ///
    /// Must be called after upserting tables and before searching
    pub fn build_index(&mut self) -> Result<()> {
        if self.next_id == 0 {
            return Ok(());
        }

        let mut wtxn = self.env.write_txn()?;
        let mut rng = StdRng::seed_from_u64(rand::random());

        Writer::new(self.cosine, 0, self.dimensions)
            .builder(&mut rng)
            .build(&mut wtxn)?;
        Writer::new(self.euclidean, 0, self.dimensions)
            .builder(&mut rng)
            .build(&mut wtxn)?;
        Writer::new(self.dot_product, 0, self.dimensions)
            .builder(&mut rng)
            .build(&mut wtxn)?;
        if self.tagged > 0 {
            Writer::new(self.tags, 0, self.dimensions)
                .builder(&mut rng)
                .build(&mut wtxn)?;
        }

        wtxn.commit()?;
        self.indexed = true;
        Ok(())
    }

    /// Nearest tables by description embedding, closest first
    ///
    /// Returns `(table_name, distance)` pairs with distances in the convention
    /// [`DistanceMetric::normalize`] expects (see `standard_distance`).
    pub fn nearest(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dimensions("Query embedding", query)?;
        if self.next_id == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        self.ensure_indexed()?;

        let rtxn = self.env.read_txn()?;
        let hits = match metric {
            DistanceMetric::Cosine => nns(&rtxn, self.cosine, query, limit)?,
            DistanceMetric::L2 => nns(&rtxn, self.euclidean, query, limit)?,
            DistanceMetric::DotProduct => nns(&rtxn, self.dot_product, query, limit)?,
        };
        let hits = hits
            .into_iter()
            .map(|(id, distance)| (id, standard_distance(metric, distance)))
            .collect();
        self.resolve_names(&rtxn, hits)
    }

    /// Nearest tables by tag embedding (cosine), closest first
    pub fn nearest_tags(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimensions("Query embedding", query)?;
        if self.tagged == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        self.ensure_indexed()?;

        let rtxn = self.env.read_txn()?;
        let hits = nns(&rtxn, self.tags, query, limit)?
            .into_iter()
            .map(|(id, distance)| (id, standard_distance(DistanceMetric::Cosine, distance)))
            .collect();
        self.resolve_names(&rtxn, hits)
    }

    fn ensure_indexed(&self) -> Result<()> {
        if !self.indexed {
            return Err(anyhow!(
                "Index not built. Call build_index() after upserting tables."
            ));
        }
        Ok(())
    }

    fn resolve_names(&self, rtxn: &RoTxn, hits: Vec<(ItemId, f32)>) -> Result<Vec<(String, f32)>> {
        let mut resolved = Vec::with_capacity(hits.len());
        for (id, distance) in hits {
            if let Some(stored) = self.tables.get(rtxn, &id)? {
                resolved.push((stored.record.table_name, distance));
            }
        }
        Ok(resolved)
    }

    /// Descriptions for the given table names; unknown names are omitted
    pub fn descriptions(&self, names: &[String]) -> Result<HashMap<String, String>> {
        let rtxn = self.env.read_txn()?;
        let mut found = HashMap::with_capacity(names.len());

        for name in names {
            let Some(id) = self.names.get(&rtxn, name.as_str())? else {
                continue;
            };
            if let Some(stored) = self.tables.get(&rtxn, &id)? {
                found.insert(name.clone(), stored.record.description);
            }
        }
        Ok(found)
    }

    /// Get a table by name
    pub fn get_table(&self, name: &str) -> Result<Option<TableRecord>> {
        let rtxn = self.env.read_txn()?;
        let Some(id) = self.names.get(&rtxn, name)? else {
            return Ok(None);
        };
        Ok(self.tables.get(&rtxn, &id)?.map(|stored| stored.record))
    }

    /// Get statistics about the store
    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let total_tables = self.tables.len(&rtxn)?;

        Ok(StoreStats {
            total_tables: total_tables as usize,
            tagged_tables: self.tagged,
            indexed: self.indexed,
            dimensions: self.dimensions,
        })
    }

    /// Clear all data from the store
    pub fn clear(&mut self) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;

        self.tables.clear(&mut wtxn)?;
        self.names.clear(&mut wtxn)?;
        self.cosine.clear(&mut wtxn)?;
        self.euclidean.clear(&mut wtxn)?;
        self.dot_product.clear(&mut wtxn)?;
        self.tags.clear(&mut wtxn)?;

        wtxn.commit()?;

        self.next_id = 0;
        self.tagged = 0;
        self.indexed = false;
        Ok(())
    }

    /// Check if the index is built
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Flush and release the LMDB environment
    pub fn close(self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

/// Convert an arroy distance to the usual one for `metric`.
///
/// arroy reports cosine as `(1 - cos) / 2` and dot product as the positive
/// inner product. Callers expect `1 - cos` and the negated inner product;
/// Euclidean is already the plain L2 distance.
pub(crate) fn standard_distance(metric: DistanceMetric, distance: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 2.0 * distance,
        DistanceMetric::L2 => distance,
        DistanceMetric::DotProduct => -distance,
    }
}

/// Approximate nearest neighbours with a widened search for better recall
fn nns<D: Distance>(
    rtxn: &RoTxn,
    database: ArroyDatabase<D>,
    query: &[f32],
    limit: usize,
) -> Result<Vec<(ItemId, f32)>> {
    let reader = Reader::open(rtxn, 0, database)?;
    let mut builder = reader.nns(limit);

    if let Some(n_trees) = NonZeroUsize::new(reader.n_trees()) {
        if let Some(search_k) = NonZeroUsize::new(limit * n_trees.get() * 15) {
            builder.search_k(search_k);
        }
    }

    Ok(builder.by_vector(rtxn, query)?)
}

/// Statistics about the table store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_tables: usize,
    pub tagged_tables: usize,
    pub indexed: bool,
    pub dimensions: usize,
}

//! Tantivy-based keyword index
//!
//! Provides BM25 search over table keywords for hybrid search with RRF fusion.

use anyhow::{anyhow, Result};
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    query::QueryParser,
    schema::{Field, Schema, STORED, STRING, TEXT, Value},
    Index, IndexReader, IndexSettings, IndexWriter, TantivyDocument, Term,
};

/// Result from a keyword search
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub table_name: String,
    /// BM25 score from Tantivy
    pub score: f32,
}

/// Keyword index using Tantivy
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    table_name_field: Field,
    keywords_field: Field,
}

impl KeywordIndex {
    /// Create or open a keyword index under `data_dir/fts`
    pub fn open(data_dir: &Path) -> Result<Self> {
        let fts_path = data_dir.join("fts");
        std::fs::create_dir_all(&fts_path)?;

        let index = if fts_path.join("meta.json").exists() {
            Index::open_in_dir(&fts_path)?
        } else {
            let mut schema_builder = Schema::builder();
            // Table name - exact match for upserts, stored for results
            schema_builder.add_text_field("table_name", STRING | STORED);
            // Keywords - full text indexed for BM25 search
            schema_builder.add_text_field("keywords", TEXT);
            let schema = schema_builder.build();

            let dir = MmapDirectory::open(&fts_path)?;
            Index::create(dir, schema, IndexSettings::default())?
        };

        let schema = index.schema();
        let table_name_field = schema
            .get_field("table_name")
            .map_err(|_| anyhow!("Missing table_name field"))?;
        let keywords_field = schema
            .get_field("keywords")
            .map_err(|_| anyhow!("Missing keywords field"))?;

        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            writer: None,
            table_name_field,
            keywords_field,
        })
    }

    /// Writer is created lazily so read-only users never take the index lock
    fn writer(&mut self) -> Result<&mut IndexWriter> {
        if self.writer.is_none() {
            // 50MB heap for writer
            self.writer = Some(self.index.writer(50_000_000)?);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| anyhow!("Keyword index writer unavailable"))
    }

    /// Add or replace the keywords of a table
    pub fn upsert(&mut self, table_name: &str, keywords: &str) -> Result<()> {
        let table_name_field = self.table_name_field;
        let keywords_field = self.keywords_field;
        let writer = self.writer()?;

        writer.delete_term(Term::from_field_text(table_name_field, table_name));

        let mut doc = TantivyDocument::new();
        doc.add_text(table_name_field, table_name);
        doc.add_text(keywords_field, keywords);
        writer.add_document(doc)?;
        Ok(())
    }

    /// Remove a table
    pub fn delete(&mut self, table_name: &str) -> Result<()> {
        let table_name_field = self.table_name_field;
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(table_name_field, table_name));
        Ok(())
    }

    /// Commit pending changes
    pub fn commit(&mut self) -> Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.commit()?;
            self.reader.reload()?;
        }
        Ok(())
    }

    /// Search keywords with BM25, best match first
    ///
    /// Every query term must be present, matching plain text-search semantics.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let mut query_parser = QueryParser::for_index(&self.index, vec![self.keywords_field]);
        query_parser.set_conjunction_by_default();

        let parsed_query = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                let escaped = query.replace(
                    [':', '(', ')', '[', ']', '{', '}', '^', '"', '~', '*', '?', '\\', '/', '+', '-', '!'],
                    " ",
                );
                if escaped.trim().is_empty() {
                    return Ok(Vec::new());
                }
                query_parser.parse_query(&escaped)?
            }
        };

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;

            if let Some(name) = doc
                .get_first(self.table_name_field)
                .and_then(|value| value.as_str())
            {
                results.push(KeywordHit {
                    table_name: name.to_string(),
                    score,
                });
            }
        }

        Ok(results)
    }

    /// Get statistics about the index
    pub fn stats(&self) -> FtsStats {
        FtsStats {
            num_documents: self.reader.searcher().num_docs() as usize,
        }
    }

    /// Clear the entire index
    pub fn clear(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.delete_all_documents()?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Wait for pending merges and release the writer lock
    pub fn close(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.wait_merging_threads()?;
        }
        Ok(())
    }
}

/// Statistics about the keyword index
#[derive(Debug, Clone)]
pub struct FtsStats {
    pub num_documents: usize,
}

mod tantivy_store;

pub use tantivy_store::{FtsStats, KeywordHit, KeywordIndex};

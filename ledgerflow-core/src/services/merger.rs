//! Category cache merger - adds new classifications without overwriting

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Result;
use crate::domain::{Categorization, CategoryCacheEntry};

pub struct CategoryMerger {
    repository: Arc<DuckDbRepository>,
}

impl CategoryMerger {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Insert entries whose key is not cached yet, returning how many were inserted
    ///
    /// The first entry wins when a key repeats within `categorizations`.
    pub fn merge(&self, categorizations: Vec<Categorization>) -> Result<usize> {
        if categorizations.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut seen = HashSet::new();
        let entries: Vec<CategoryCacheEntry> = categorizations
            .into_iter()
            .filter(|c| seen.insert(c.description_key.clone()))
            .map(|c| CategoryCacheEntry::stamped(c, now))
            .collect();

        let inserted = self.repository.insert_category_entries(&entries)?;
        tracing::info!(offered = entries.len(), inserted, "merged category cache");
        Ok(inserted)
    }
}

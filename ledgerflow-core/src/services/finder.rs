//! Uncategorized finder - descriptions present in raw data but missing from the cache

use std::sync::Arc;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Result;
use crate::domain::DescriptionKey;

pub struct UncategorizedFinder {
    repository: Arc<DuckDbRepository>,
    limit: usize,
}

impl UncategorizedFinder {
    pub fn new(repository: Arc<DuckDbRepository>, limit: usize) -> Self {
        Self { repository, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Up to `limit` distinct normalized descriptions with no cache entry, ascending
    pub fn find_gap(&self) -> Result<Vec<DescriptionKey>> {
        self.repository.find_uncategorized(self.limit)
    }

    /// Full gap size, ignoring the limit
    pub fn gap_size(&self) -> Result<i64> {
        self.repository.count_uncategorized()
    }
}

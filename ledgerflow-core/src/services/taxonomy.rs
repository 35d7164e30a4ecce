//! Taxonomy service - seeds and reads `dim_categories`

use std::sync::Arc;

use serde::Serialize;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Result;
use crate::domain::{taxonomy_rows, Category};
use crate::services::{LogEvent, LoggingService};

#[derive(Debug, Clone, Serialize)]
pub struct InitCategoriesResult {
    pub inserted: usize,
    pub already_initialized: bool,
}

pub struct TaxonomyService {
    repository: Arc<DuckDbRepository>,
    logging: Arc<LoggingService>,
}

impl TaxonomyService {
    pub fn new(repository: Arc<DuckDbRepository>, logging: Arc<LoggingService>) -> Self {
        Self {
            repository,
            logging,
        }
    }

    /// Seed the static taxonomy. A populated table is left untouched.
    pub fn init(&self) -> Result<InitCategoriesResult> {
        let inserted = self.repository.seed_categories(&taxonomy_rows())?;
        let already_initialized = inserted == 0;
        if already_initialized {
            tracing::info!("category taxonomy already initialized");
        } else {
            tracing::info!(inserted, "seeded category taxonomy");
            self.logging.record(LogEvent::new("categories_initialized"));
        }
        Ok(InitCategoriesResult {
            inserted,
            already_initialized,
        })
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        self.repository.get_categories()
    }
}

//! Status service - warehouse summary

use std::sync::Arc;

use serde::Serialize;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Result;
use crate::domain::Institution;

/// Status service for warehouse summaries
pub struct StatusService {
    repository: Arc<DuckDbRepository>,
}

impl StatusService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Row counts, cache and taxonomy sizes, and the full uncategorized gap
    pub fn get_status(&self) -> Result<StatusSummary> {
        let mut institutions = Vec::with_capacity(Institution::ALL.len());
        for institution in Institution::ALL {
            institutions.push(InstitutionSummary {
                institution,
                raw_rows: self.repository.count_raw_rows(institution)?,
            });
        }
        let files = self.repository.list_ingested_files()?;

        Ok(StatusSummary {
            total_raw_rows: institutions.iter().map(|i| i.raw_rows).sum(),
            institutions,
            ingested_files: files.len() as i64,
            cached_descriptions: self.repository.count_category_entries()?,
            taxonomy_categories: self.repository.count_categories()?,
            uncategorized_descriptions: self.repository.count_uncategorized()?,
            last_ingested_at: files.first().and_then(|f| f.ingested_at.clone()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub institutions: Vec<InstitutionSummary>,
    pub total_raw_rows: i64,
    pub ingested_files: i64,
    pub cached_descriptions: i64,
    pub taxonomy_categories: i64,
    pub uncategorized_descriptions: i64,
    pub last_ingested_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InstitutionSummary {
    pub institution: Institution,
    pub raw_rows: i64,
}

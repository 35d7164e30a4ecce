//! Dedup ledger - which files have already been ingested

use std::sync::Arc;

use crate::adapters::duckdb::{DuckDbRepository, ForgottenFile, IngestedFile};
use crate::domain::result::Result;
use crate::domain::FileFingerprint;

/// File-level dedup backed by the `sys_ingested_files` ledger table
///
/// A fingerprint counts as ingested from the moment its load commits, even
/// when every row was skipped as overlap, until it is forgotten.
pub struct DedupLedger {
    repository: Arc<DuckDbRepository>,
}

impl DedupLedger {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    pub fn already_ingested(&self, fingerprint: &FileFingerprint) -> Result<bool> {
        self.repository.is_file_ingested(fingerprint)
    }

    /// Drop the file's rows and ledger entry
    ///
    /// The returned dependents are files whose overlap rows lived only under
    /// this one; the caller reloads them.
    pub fn forget(&self, fingerprint: &FileFingerprint) -> Result<ForgottenFile> {
        let forgotten = self.repository.forget_file(fingerprint)?;
        tracing::info!(
            fingerprint = %fingerprint.short(),
            rows_deleted = forgotten.rows_deleted,
            dependents = forgotten.dependents.len(),
            "forgot file"
        );
        Ok(forgotten)
    }

    pub fn ingested_files(&self) -> Result<Vec<IngestedFile>> {
        self.repository.list_ingested_files()
    }
}

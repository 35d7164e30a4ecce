//! Pipeline service - one statement processing run, end to end
//!
//! Filtering -> Loading -> StagingTransform -> FindingGap -> Classifying
//! -> Merging -> FinalTransform -> Done. Any error before Done moves the run
//! to Failed, is written to the run log, and is returned to the caller.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::duckdb::{DuckDbRepository, FileLoad, IngestedFile};
use crate::adapters::statement::{parse_statement, ParsedStatement};
use crate::config::PipelineSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{
    FileFingerprint, ForgetResult, Institution, PipelineState, ProcessingResult, RawRecord,
    RunTracker,
};
use crate::ports::{
    file_name, tag_set, FileSource, LlmClient, TransformOutcome, TransformRunner,
};
use crate::services::{
    CategoryMerger, Classifier, DedupLedger, LogEvent, LoggingService, UncategorizedFinder,
};

/// A request to ingest statement files for one institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub institution: Institution,
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub force_reprocess: bool,
}

/// A file that survived filtering, fetched once
struct StagedFile {
    path: String,
    bytes: Vec<u8>,
    fingerprint: FileFingerprint,
}

pub struct PipelineService {
    repository: Arc<DuckDbRepository>,
    files: Arc<dyn FileSource>,
    transforms: Arc<dyn TransformRunner>,
    logging: Arc<LoggingService>,
    ledger: DedupLedger,
    finder: UncategorizedFinder,
    classifier: Classifier,
    merger: CategoryMerger,
    settings: PipelineSettings,
}

impl PipelineService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        files: Arc<dyn FileSource>,
        transforms: Arc<dyn TransformRunner>,
        llm: Arc<dyn LlmClient>,
        logging: Arc<LoggingService>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger: DedupLedger::new(Arc::clone(&repository)),
            finder: UncategorizedFinder::new(Arc::clone(&repository), settings.gap_limit),
            classifier: Classifier::new(llm, settings.batch_size),
            merger: CategoryMerger::new(Arc::clone(&repository)),
            repository,
            files,
            transforms,
            logging,
            settings,
        }
    }

    /// Run the whole pipeline for one request
    pub fn process(&self, request: &ProcessRequest) -> Result<ProcessingResult> {
        let started = Instant::now();
        let mut tracker = RunTracker::new();
        let mut result = ProcessingResult {
            run_id: Uuid::new_v4().to_string(),
            ..Default::default()
        };

        let span = tracing::info_span!(
            "pipeline",
            run_id = %result.run_id,
            institution = %request.institution
        );
        let _guard = span.enter();
        tracing::info!(files = request.file_paths.len(), force = request.force_reprocess, "pipeline started");

        let outcome = self
            .run_stages(request, &mut tracker, &mut result)
            .and_then(|()| tracker.advance(PipelineState::Done));
        result.processing_time_seconds = started.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => {
                tracing::info!(
                    files_processed = result.files_processed,
                    files_skipped = result.files_skipped,
                    rows_inserted = result.rows_inserted,
                    rows_skipped = result.rows_skipped,
                    new_categories = result.new_categories,
                    models_built = result.transform_models_built,
                    gap_remaining = result.gap_remaining,
                    skipped_states = ?tracker.skipped(),
                    "pipeline completed"
                );
                self.logging.record(
                    LogEvent::new("pipeline_completed")
                        .with_result(&result)
                        .with_institution(request.institution.as_str())
                        .with_state(PipelineState::Done),
                );
                Ok(result)
            }
            Err(e) => {
                let failed_in = tracker.current();
                tracker.fail();
                tracing::error!(state = %failed_in, error = %e, "pipeline failed");

                let mut event = LogEvent::new("pipeline_failed")
                    .with_result(&result)
                    .with_institution(request.institution.as_str())
                    .with_state(failed_in)
                    .with_error(e.to_string());
                if let Error::Transform { output, .. } = &e {
                    if !output.is_empty() {
                        event = event.with_error_details(output.clone());
                    }
                }
                self.logging.record(event);
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        request: &ProcessRequest,
        tracker: &mut RunTracker,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let staged = self.filter(request, result)?;

        if staged.is_empty() {
            tracing::info!("no new files to load");
            tracker.skip(PipelineState::Loading);
            tracker.skip(PipelineState::StagingTransform);
        } else {
            tracker.advance(PipelineState::Loading)?;
            self.load(request, &staged, result)?;

            tracker.advance(PipelineState::StagingTransform)?;
            let outcome = self.run_transforms(&tag_set(&self.settings.staging_tags))?;
            result.transform_models_built += outcome.models_built;
        }

        tracker.advance(PipelineState::FindingGap)?;
        let gap = self.finder.find_gap()?;
        result.gap_remaining = gap.len() >= self.finder.limit();
        tracing::info!(gap = gap.len(), limit = self.finder.limit(), "found uncategorized descriptions");

        if gap.is_empty() {
            tracker.skip(PipelineState::Classifying);
            tracker.skip(PipelineState::Merging);
        } else {
            tracker.advance(PipelineState::Classifying)?;
            let categorizations = self.classifier.categorize(&gap);

            tracker.advance(PipelineState::Merging)?;
            result.new_categories = self.merger.merge(categorizations)?;
        }

        if result.rows_inserted > 0 || result.new_categories > 0 {
            tracker.advance(PipelineState::FinalTransform)?;
            let outcome = self.run_transforms(&tag_set(&self.settings.final_tags))?;
            result.transform_models_built += outcome.models_built;
        } else {
            tracker.skip(PipelineState::FinalTransform);
        }
        Ok(())
    }

    /// Fetch each path once and keep the files the ledger hasn't seen
    fn filter(&self, request: &ProcessRequest, result: &mut ProcessingResult) -> Result<Vec<StagedFile>> {
        let mut seen = HashSet::new();
        let mut staged = Vec::new();

        for path in &request.file_paths {
            let bytes = self.files.fetch(path)?;
            let fingerprint = FileFingerprint::of(&bytes);

            if !seen.insert(fingerprint.clone()) {
                tracing::info!(path = %path, fingerprint = %fingerprint.short(), "same content already in this request, skipping");
                result.files_skipped += 1;
                continue;
            }
            if !request.force_reprocess && self.ledger.already_ingested(&fingerprint)? {
                tracing::info!(path = %path, fingerprint = %fingerprint.short(), "already ingested, skipping");
                result.files_skipped += 1;
                continue;
            }
            staged.push(StagedFile {
                path: path.clone(),
                bytes,
                fingerprint,
            });
        }
        tracing::info!(to_process = staged.len(), requested = request.file_paths.len(), "filtered files");
        Ok(staged)
    }

    /// Parse every staged file, then load each one atomically
    fn load(
        &self,
        request: &ProcessRequest,
        staged: &[StagedFile],
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let institution = request.institution;
        let mut parsed = Vec::with_capacity(staged.len());
        for file in staged {
            let name = file_name(&file.path);
            let statement = parse_statement(name, &file.bytes, institution)
                .map_err(|e| with_file_context(e, &file.path))?;
            parsed.push((file, statement));
        }

        let ingested_at = Utc::now();
        for (file, statement) in parsed {
            let (inserted, skipped) =
                self.load_one(institution, &file.path, &file.fingerprint, statement, ingested_at)?;
            result.files_processed += 1;
            result.rows_inserted += inserted;
            result.rows_skipped += skipped;
        }
        Ok(())
    }

    /// Load one parsed file with its ledger entry, returning (inserted, skipped)
    ///
    /// Any rows this file already had in the warehouse are replaced.
    fn load_one(
        &self,
        institution: Institution,
        path: &str,
        fingerprint: &FileFingerprint,
        statement: ParsedStatement,
        ingested_at: DateTime<Utc>,
    ) -> Result<(usize, usize)> {
        let owners = if self.settings.row_dedup {
            self.repository
                .row_owners_from_other_files(institution, fingerprint)?
        } else {
            HashMap::new()
        };

        let name = file_name(path);
        let mut records = Vec::with_capacity(statement.row_count());
        let mut covered_by = BTreeSet::new();
        let mut skipped = 0;
        for row in statement.rows {
            let record = RawRecord::new(row, name, fingerprint.clone(), ingested_at);
            match owners.get(&record.row_fingerprint) {
                Some(owner) => {
                    covered_by.insert(owner.clone());
                    skipped += 1;
                }
                None => records.push(record),
            }
        }

        let load = FileLoad {
            covered_by,
            rows_skipped: skipped,
            ingested_at,
            ..FileLoad::new(institution, path, fingerprint.clone(), records)
        };
        let inserted = self.repository.load_file(&load)?;
        tracing::info!(path = %path, inserted, skipped, "loaded file");
        Ok((inserted, skipped))
    }

    /// Run dbt with the warehouse file released so it can take the lock
    fn run_transforms(&self, tags: &BTreeSet<String>) -> Result<TransformOutcome> {
        self.repository.release_while(|| self.transforms.run(tags))?
    }

    /// Delete a file's rows, reload the files that depended on them, and
    /// rebuild every transform layer
    pub fn forget_file(&self, path: &str) -> Result<ForgetResult> {
        let bytes = self.files.fetch(path)?;
        let fingerprint = FileFingerprint::of(&bytes);
        let forgotten = self.ledger.forget(&fingerprint)?;

        let mut reloaded_files = Vec::new();
        let mut stale_files = Vec::new();
        for dependent in &forgotten.dependents {
            match self.reload(dependent) {
                Ok(inserted) => {
                    tracing::info!(path = %dependent.file_path, inserted, "reloaded dependent file");
                    reloaded_files.push(dependent.file_path.clone());
                }
                Err(e) => {
                    tracing::warn!(path = %dependent.file_path, error = %e, "dependent file not reloaded");
                    stale_files.push(dependent.file_path.clone());
                }
            }
        }

        let mut tags = tag_set(&self.settings.staging_tags);
        tags.extend(tag_set(&self.settings.final_tags));
        if let Err(e) = self.run_transforms(&tags) {
            self.logging.record(
                LogEvent::new("forget_failed")
                    .with_command("forget")
                    .with_error(e.to_string()),
            );
            return Err(e);
        }

        let mut event = LogEvent::new("file_forgotten").with_command("forget");
        if !stale_files.is_empty() {
            event = event.with_error(format!("not reloaded: {}", stale_files.join(", ")));
        }
        self.logging.record(event);
        Ok(ForgetResult {
            file_path: path.to_string(),
            file_fingerprint: fingerprint.as_str().to_string(),
            rows_deleted: forgotten.rows_deleted,
            reloaded_files,
            stale_files,
        })
    }

    /// Fetch and load a ledger entry's file again, refusing changed content
    fn reload(&self, file: &IngestedFile) -> Result<usize> {
        let bytes = self.files.fetch(&file.file_path)?;
        let fingerprint = FileFingerprint::of(&bytes);
        if fingerprint.as_str() != file.file_fingerprint {
            return Err(Error::upstream(format!(
                "{} changed since it was ingested",
                file.file_path
            )));
        }
        let statement = parse_statement(file_name(&file.file_path), &bytes, file.institution)
            .map_err(|e| with_file_context(e, &file.file_path))?;
        let (inserted, _) =
            self.load_one(file.institution, &file.file_path, &fingerprint, statement, Utc::now())?;
        Ok(inserted)
    }
}

fn with_file_context(error: Error, path: &str) -> Error {
    match error {
        Error::Validation(msg) => Error::Validation(format!("{}: {}", path, msg)),
        other => other,
    }
}

//! Integration tests for the processing pipeline
//!
//! The warehouse and run log are real DuckDB files in a temp directory.
//! The file store, transform job and LLM are faked at the port level.
//!
//! Run with: cargo test --test pipeline_tests -- --nocapture

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tempfile::TempDir;

use ledgerflow_core::adapters::duckdb::DuckDbRepository;
use ledgerflow_core::config::Config;
use ledgerflow_core::domain::UNCATEGORIZED;
use ledgerflow_core::ports::{FileSource, LlmClient, TransformOutcome, TransformRunner};
use ledgerflow_core::{
    DescriptionKey, EntryPoint, Error, FileFingerprint, Institution, LedgerflowContext, Ports,
    ProcessRequest, Result,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct MemoryFiles {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFiles {
    fn put(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }
}

impl FileSource for MemoryFiles {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("no such object: {}", path)))
    }
}

/// Puts every description under Transportation / Rideshare
#[derive(Default)]
struct FakeLlm {
    calls: AtomicUsize,
    fail: bool,
}

impl LlmClient for FakeLlm {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Classification("HTTP 503".to_string()));
        }
        let count = prompt
            .split("**DESCRIPTIONS:**")
            .nth(1)
            .unwrap_or("")
            .lines()
            .filter(|l| l.split_once(". ").is_some_and(|(n, _)| n.parse::<usize>().is_ok()))
            .count();
        let items: Vec<_> = (1..=count)
            .map(|i| {
                serde_json::json!({
                    "description_number": i,
                    "general_category": "Transportation",
                    "detailed_category": "Rideshare",
                    "confidence_score": 0.9
                })
            })
            .collect();
        Ok(serde_json::to_string(&items).unwrap())
    }

    fn model_version(&self) -> &str {
        "fake-model"
    }
}

#[derive(Default)]
struct FakeTransforms {
    runs: Mutex<Vec<BTreeSet<String>>>,
    fail_on_tag: Option<String>,
}

impl FakeTransforms {
    fn runs(&self) -> Vec<BTreeSet<String>> {
        self.runs.lock().unwrap().clone()
    }
}

impl TransformRunner for FakeTransforms {
    fn run(&self, tags: &BTreeSet<String>) -> Result<TransformOutcome> {
        self.runs.lock().unwrap().push(tags.clone());
        if let Some(tag) = &self.fail_on_tag {
            if tags.contains(tag) {
                return Err(Error::transform(
                    "dbt run --select tag:staging exited with exit status: 1",
                    "Compilation Error in model stg_amex",
                ));
            }
        }
        Ok(TransformOutcome {
            models_built: tags.len(),
        })
    }
}

/// Writes a mart into the warehouse file from its own connection, like dbt does
#[derive(Default)]
struct WarehouseWriter {
    repository: OnceLock<Arc<DuckDbRepository>>,
    attached_during_run: Mutex<Vec<bool>>,
}

impl TransformRunner for WarehouseWriter {
    fn run(&self, tags: &BTreeSet<String>) -> Result<TransformOutcome> {
        let repository = self
            .repository
            .get()
            .ok_or_else(|| Error::internal("warehouse not wired"))?;
        self.attached_during_run
            .lock()
            .unwrap()
            .push(repository.is_attached());

        let conn = duckdb::Connection::open(repository.db_path())?;
        conn.execute_batch(
            "CREATE OR REPLACE TABLE fct_transactions AS
             SELECT description, amount FROM raw_amex_transactions",
        )?;
        Ok(TransformOutcome {
            models_built: tags.len(),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: TempDir,
    ctx: LedgerflowContext,
    files: Arc<MemoryFiles>,
    llm: Arc<FakeLlm>,
    transforms: Arc<FakeTransforms>,
}

fn harness_with(settings: &str, llm: FakeLlm, transforms: FakeTransforms) -> Harness {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("settings.json"), settings).unwrap();
    let config = Config::load_with_env(dir.path(), |_| None).unwrap();

    let files = Arc::new(MemoryFiles::default());
    let llm = Arc::new(llm);
    let transforms = Arc::new(transforms);
    let ctx = LedgerflowContext::with_config(dir.path(), config, EntryPoint::Cli)
        .unwrap()
        .with_ports(Ports {
            files: files.clone(),
            transforms: transforms.clone(),
            llm: llm.clone(),
        });

    Harness {
        _dir: dir,
        ctx,
        files,
        llm,
        transforms,
    }
}

fn harness() -> Harness {
    harness_with(
        r#"{"projectId":"test"}"#,
        FakeLlm::default(),
        FakeTransforms::default(),
    )
}

fn amex_request(paths: &[&str]) -> ProcessRequest {
    ProcessRequest {
        institution: Institution::Amex,
        file_paths: paths.iter().map(|p| p.to_string()).collect(),
        force_reprocess: false,
    }
}

const JAN: &str = "\
Date,Date Processed,Description,Cardmember,Amount
01/03/2024,01/04/2024,Uber Trip,J SMITH,23.50
01/05/2024,01/06/2024,UBER TRIP ,J SMITH,18.00
01/09/2024,01/10/2024,Starbucks Toronto,J SMITH,6.25
";

const FEB: &str = "\
Date,Date Processed,Description,Cardmember,Amount
01/09/2024,01/10/2024,Starbucks Toronto,J SMITH,6.25
02/02/2024,02/03/2024,Presto Fare,J SMITH,3.30
";

// ============================================================================
// Idempotence and file-level dedup
// ============================================================================

#[test]
fn test_second_run_on_same_file_is_noop() {
    let h = harness();
    h.files.put("amex/jan.csv", JAN);

    let first = h.ctx.pipeline().unwrap().process(&amex_request(&["amex/jan.csv"])).unwrap();
    assert_eq!(first.files_processed, 1);
    assert_eq!(first.rows_inserted, 3);
    assert_eq!(first.new_categories, 2);
    assert!(!first.gap_remaining);
    // staging + final
    assert_eq!(h.transforms.runs().len(), 2);

    let second = h.ctx.pipeline().unwrap().process(&amex_request(&["amex/jan.csv"])).unwrap();
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.new_categories, 0);
    assert_eq!(second.transform_models_built, 0);
    assert_ne!(first.run_id, second.run_id);

    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 3);
    assert_eq!(h.ctx.repository.count_category_entries().unwrap(), 2);
    // nothing new, so no transforms and no LLM calls the second time
    assert_eq!(h.transforms.runs().len(), 2);
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_same_bytes_under_another_name_are_skipped() {
    let h = harness();
    h.files.put("amex/jan.csv", JAN);
    h.files.put("uploads/copy-of-jan.csv", JAN);

    h.ctx.pipeline().unwrap().process(&amex_request(&["amex/jan.csv"])).unwrap();
    let result = h
        .ctx
        .pipeline()
        .unwrap()
        .process(&amex_request(&["uploads/copy-of-jan.csv"]))
        .unwrap();

    assert_eq!(result.files_processed, 0);
    assert_eq!(result.rows_inserted, 0);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 3);
}

#[test]
fn test_identical_files_in_one_request_load_once() {
    let h = harness();
    h.files.put("a.csv", JAN);
    h.files.put("b.csv", JAN);

    let result = h.ctx.pipeline().unwrap().process(&amex_request(&["a.csv", "b.csv"])).unwrap();
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.files_skipped, 1);
    assert_eq!(result.rows_inserted, 3);
}

#[test]
fn test_force_reprocess_converges() {
    let h = harness();
    h.files.put("jan.csv", JAN);
    let mut request = amex_request(&["jan.csv"]);

    h.ctx.pipeline().unwrap().process(&request).unwrap();
    request.force_reprocess = true;
    let result = h.ctx.pipeline().unwrap().process(&request).unwrap();

    assert_eq!(result.files_processed, 1);
    assert_eq!(result.rows_inserted, 3);
    assert_eq!(result.new_categories, 0);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 3);
}

// ============================================================================
// Row-level dedup
// ============================================================================

#[test]
fn test_overlapping_statement_rows_are_skipped() {
    let h = harness();
    h.files.put("jan.csv", JAN);
    h.files.put("feb.csv", FEB);

    h.ctx.pipeline().unwrap().process(&amex_request(&["jan.csv"])).unwrap();
    let result = h.ctx.pipeline().unwrap().process(&amex_request(&["feb.csv"])).unwrap();

    assert_eq!(result.files_processed, 1);
    assert_eq!(result.rows_inserted, 1);
    assert_eq!(result.rows_skipped, 1);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 4);
}

#[test]
fn test_row_dedup_can_be_disabled() {
    let h = harness_with(
        r#"{"projectId":"test","pipeline":{"rowDedup":false}}"#,
        FakeLlm::default(),
        FakeTransforms::default(),
    );
    h.files.put("jan.csv", JAN);
    h.files.put("feb.csv", FEB);

    h.ctx.pipeline().unwrap().process(&amex_request(&["jan.csv"])).unwrap();
    let result = h.ctx.pipeline().unwrap().process(&amex_request(&["feb.csv"])).unwrap();

    assert_eq!(result.rows_inserted, 2);
    assert_eq!(result.rows_skipped, 0);
}

#[test]
fn test_repeated_rows_within_one_file_are_kept() {
    let h = harness();
    h.files.put(
        "coffee.csv",
        "Date,Description,Amount\n01/03/2024,Tim Hortons,2.10\n01/03/2024,Tim Hortons,2.10\n",
    );

    let result = h.ctx.pipeline().unwrap().process(&amex_request(&["coffee.csv"])).unwrap();
    assert_eq!(result.rows_inserted, 2);
    assert_eq!(result.rows_skipped, 0);
}

// ============================================================================
// Forget
// ============================================================================

#[test]
fn test_forget_reverses_ingestion() {
    let h = harness();
    h.files.put("jan.csv", JAN);
    let pipeline = h.ctx.pipeline().unwrap();

    pipeline.process(&amex_request(&["jan.csv"])).unwrap();
    let forgotten = pipeline.forget_file("jan.csv").unwrap();

    assert_eq!(forgotten.rows_deleted, 3);
    assert_eq!(forgotten.file_fingerprint, FileFingerprint::of(JAN.as_bytes()).as_str());
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 0);
    assert!(!h
        .ctx
        .repository
        .is_file_ingested(&FileFingerprint::of(JAN.as_bytes()))
        .unwrap());

    // every layer is rebuilt after a forget
    let last = h.transforms.runs().pop().unwrap();
    assert!(last.contains("staging") && last.contains("intermediate") && last.contains("marts"));

    // the file is ingestible again and the cache survived
    let again = pipeline.process(&amex_request(&["jan.csv"])).unwrap();
    assert_eq!(again.rows_inserted, 3);
    assert_eq!(again.new_categories, 0);
}

#[test]
fn test_forget_reloads_files_that_overlapped_it() {
    let h = harness();
    h.files.put("amex/jan.csv", JAN);
    h.files.put("amex/feb.csv", FEB);
    let pipeline = h.ctx.pipeline().unwrap();

    pipeline.process(&amex_request(&["amex/jan.csv"])).unwrap();
    let feb = pipeline.process(&amex_request(&["amex/feb.csv"])).unwrap();
    assert_eq!(feb.rows_skipped, 1);

    // feb's Starbucks row was only stored under jan
    let forgotten = pipeline.forget_file("amex/jan.csv").unwrap();
    assert_eq!(forgotten.rows_deleted, 3);
    assert_eq!(forgotten.reloaded_files, vec!["amex/feb.csv".to_string()]);
    assert!(forgotten.stale_files.is_empty());
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 2);
    assert!(h
        .ctx
        .repository
        .is_file_ingested(&FileFingerprint::of(FEB.as_bytes()))
        .unwrap());

    let again = pipeline.process(&amex_request(&["amex/feb.csv"])).unwrap();
    assert_eq!(again.files_processed, 0);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 2);

    // jan comes back without duplicating feb's copy of the shared row
    let jan = pipeline.process(&amex_request(&["amex/jan.csv"])).unwrap();
    assert_eq!(jan.rows_inserted, 2);
    assert_eq!(jan.rows_skipped, 1);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 4);
}

#[test]
fn test_forget_reports_dependents_that_cannot_be_reloaded() {
    let h = harness();
    h.files.put("amex/jan.csv", JAN);
    h.files.put("amex/feb.csv", FEB);
    let pipeline = h.ctx.pipeline().unwrap();
    pipeline.process(&amex_request(&["amex/jan.csv"])).unwrap();
    pipeline.process(&amex_request(&["amex/feb.csv"])).unwrap();

    // feb was re-exported with different bytes since it was ingested
    let reexport = format!("{}02/04/2024,02/05/2024,Presto Fare,J SMITH,3.30\n", FEB);
    h.files.put("amex/feb.csv", &reexport);
    let forgotten = pipeline.forget_file("amex/jan.csv").unwrap();

    assert!(forgotten.reloaded_files.is_empty());
    assert_eq!(forgotten.stale_files, vec!["amex/feb.csv".to_string()]);
    // the old export keeps its own row; the new one restores the shared row
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 1);
    let result = pipeline.process(&amex_request(&["amex/feb.csv"])).unwrap();
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.rows_inserted, 2);
    assert_eq!(result.rows_skipped, 1);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 3);
}

#[test]
fn test_fully_overlapping_file_is_recorded_as_ingested() {
    let h = harness();
    h.files.put("amex/jan.csv", JAN);
    h.files.put(
        "amex/sub.csv",
        "Description,Amount,Date,Date Processed,Cardmember\n\
         Starbucks Toronto,6.25,01/09/2024,01/10/2024,J SMITH\n",
    );
    let pipeline = h.ctx.pipeline().unwrap();
    pipeline.process(&amex_request(&["amex/jan.csv"])).unwrap();

    let first = pipeline.process(&amex_request(&["amex/sub.csv"])).unwrap();
    assert_eq!(first.files_processed, 1);
    assert_eq!(first.rows_inserted, 0);
    assert_eq!(first.rows_skipped, 1);
    let runs_after_first = h.transforms.runs().len();

    let second = pipeline.process(&amex_request(&["amex/sub.csv"])).unwrap();
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(h.transforms.runs().len(), runs_after_first);

    let sub = h
        .ctx
        .repository
        .list_ingested_files()
        .unwrap()
        .into_iter()
        .find(|f| f.file_path == "amex/sub.csv")
        .unwrap();
    assert_eq!(sub.rows_inserted, 0);
    assert_eq!(sub.rows_skipped, 1);
}

#[test]
fn test_empty_statement_is_recorded_as_ingested() {
    let h = harness();
    h.files.put("amex/empty.csv", "Date,Date Processed,Description,Cardmember,Amount\n");
    let pipeline = h.ctx.pipeline().unwrap();

    assert_eq!(pipeline.process(&amex_request(&["amex/empty.csv"])).unwrap().files_processed, 1);
    assert_eq!(pipeline.process(&amex_request(&["amex/empty.csv"])).unwrap().files_processed, 0);
}

// ============================================================================
// Transforms and the warehouse file
// ============================================================================

#[test]
fn test_transforms_run_with_warehouse_file_released() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("settings.json"), r#"{"projectId":"test"}"#).unwrap();
    let config = Config::load_with_env(dir.path(), |_| None).unwrap();

    let files = Arc::new(MemoryFiles::default());
    files.put("amex/jan.csv", JAN);
    let writer = Arc::new(WarehouseWriter::default());
    let ctx = LedgerflowContext::with_config(dir.path(), config, EntryPoint::Cli)
        .unwrap()
        .with_ports(Ports {
            files: files.clone(),
            transforms: writer.clone(),
            llm: Arc::new(FakeLlm::default()),
        });
    assert!(writer.repository.set(Arc::clone(&ctx.repository)).is_ok());

    let pipeline = ctx.pipeline().unwrap();
    pipeline.process(&amex_request(&["amex/jan.csv"])).unwrap();
    pipeline.forget_file("amex/jan.csv").unwrap();

    // staging, final, then the rebuild after forget
    assert_eq!(*writer.attached_during_run.lock().unwrap(), vec![false, false, false]);
    assert!(ctx.repository.is_attached());
    assert_eq!(ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 0);
    assert_eq!(ctx.status_service.get_status().unwrap().ingested_files, 0);
}

// ============================================================================
// Gap handling
// ============================================================================

#[test]
fn test_gap_limit_leaves_remainder_for_next_run() {
    let h = harness_with(
        r#"{"projectId":"test","pipeline":{"gapLimit":2}}"#,
        FakeLlm::default(),
        FakeTransforms::default(),
    );
    h.files.put("jan.csv", JAN);
    h.files.put("feb.csv", FEB);
    let pipeline = h.ctx.pipeline().unwrap();

    let first = pipeline.process(&amex_request(&["jan.csv", "feb.csv"])).unwrap();
    assert_eq!(first.new_categories, 2);
    assert!(first.gap_remaining);

    // no new files: loading is skipped, the gap keeps draining
    let second = pipeline.process(&amex_request(&[])).unwrap();
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.new_categories, 1);
    assert!(!second.gap_remaining);

    let third = pipeline.process(&amex_request(&[])).unwrap();
    assert_eq!(third.new_categories, 0);
    assert_eq!(h.ctx.finder().find_gap().unwrap(), Vec::<DescriptionKey>::new());
}

#[test]
fn test_empty_request_skips_every_stage() {
    let h = harness();
    let result = h.ctx.pipeline().unwrap().process(&amex_request(&[])).unwrap();

    assert_eq!(result.files_processed, 0);
    assert_eq!(result.new_categories, 0);
    assert!(h.transforms.runs().is_empty());
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_llm_outage_caches_uncategorized() {
    let h = harness_with(
        r#"{"projectId":"test"}"#,
        FakeLlm {
            fail: true,
            ..Default::default()
        },
        FakeTransforms::default(),
    );
    h.files.put("jan.csv", JAN);

    let result = h.ctx.pipeline().unwrap().process(&amex_request(&["jan.csv"])).unwrap();
    assert_eq!(result.new_categories, 2);

    let entry = h
        .ctx
        .repository
        .get_category_entry(&DescriptionKey::from_normalized("UBER TRIP"))
        .unwrap()
        .unwrap();
    assert_eq!(entry.general_category, UNCATEGORIZED);
    assert_eq!(entry.confidence_score, 0.0);
    assert_eq!(entry.model_version, "fake-model");
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_transform_failure_fails_run_and_is_logged() {
    let h = harness_with(
        r#"{"projectId":"test"}"#,
        FakeLlm::default(),
        FakeTransforms {
            fail_on_tag: Some("staging".to_string()),
            ..Default::default()
        },
    );
    h.files.put("jan.csv", JAN);

    let err = h
        .ctx
        .pipeline()
        .unwrap()
        .process(&amex_request(&["jan.csv"]))
        .unwrap_err();
    assert!(matches!(err, Error::Transform { .. }));

    // rows appended before the failure stay, and the ledger stops a re-append
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 3);
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);

    let errors = h.ctx.logging.get_errors(10).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].event, "pipeline_failed");
    assert_eq!(errors[0].state.as_deref(), Some("STAGING_TRANSFORM"));
    assert_eq!(
        errors[0].error_details.as_deref(),
        Some("Compilation Error in model stg_amex")
    );
}

#[test]
fn test_unsupported_file_type_is_validation_error_and_loads_nothing() {
    let h = harness();
    h.files.put("jan.csv", JAN);
    h.files.put("notes.pdf", "%PDF-1.7");

    let err = h
        .ctx
        .pipeline()
        .unwrap()
        .process(&amex_request(&["jan.csv", "notes.pdf"]))
        .unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Amex).unwrap(), 0);

    let errors = h.ctx.logging.get_errors(10).unwrap();
    assert_eq!(errors[0].state.as_deref(), Some("LOADING"));
}

#[test]
fn test_missing_file_is_upstream_error() {
    let h = harness();
    let err = h
        .ctx
        .pipeline()
        .unwrap()
        .process(&amex_request(&["missing.csv"]))
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
}

#[test]
fn test_missing_columns_named_in_error() {
    let h = harness();
    h.files.put("bad.csv", "Date,Desc,Amount\n01/03/2024,Uber,1.00\n");

    let err = h
        .ctx
        .pipeline()
        .unwrap()
        .process(&amex_request(&["bad.csv"]))
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("Description"));
}

// ============================================================================
// Institutions, taxonomy, run log
// ============================================================================

#[test]
fn test_wealthsimple_rows_share_the_category_cache() {
    let h = harness();
    h.files.put("jan.csv", JAN);
    h.files.put(
        "ws.csv",
        " Date ,Transaction,Description,Amount,Balance\n2024-01-07,SPEND,uber trip,-12.00,500.00\n2024-01-08,SPEND,Presto Fare,-3.30,496.70\n",
    );

    h.ctx.pipeline().unwrap().process(&amex_request(&["jan.csv"])).unwrap();
    let result = h
        .ctx
        .pipeline()
        .unwrap()
        .process(&ProcessRequest {
            institution: Institution::Wealthsimple,
            file_paths: vec!["ws.csv".to_string()],
            force_reprocess: false,
        })
        .unwrap();

    assert_eq!(result.rows_inserted, 2);
    // UBER TRIP is already cached from the Amex file
    assert_eq!(result.new_categories, 1);
    assert_eq!(h.ctx.repository.count_raw_rows(Institution::Wealthsimple).unwrap(), 2);
}

#[test]
fn test_taxonomy_init_twice_is_noop() {
    let h = harness();
    assert_eq!(h.ctx.taxonomy_service.init().unwrap().inserted, 60);
    assert_eq!(h.ctx.taxonomy_service.init().unwrap().inserted, 0);
    assert_eq!(h.ctx.repository.count_categories().unwrap(), 60);
}

#[test]
fn test_completed_run_is_logged_without_row_content() {
    let h = harness();
    h.files.put("jan.csv", JAN);
    let result = h.ctx.pipeline().unwrap().process(&amex_request(&["jan.csv"])).unwrap();

    let entries = h.ctx.logging.get_run(&result.run_id).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.event, "pipeline_completed");
    assert_eq!(entry.institution.as_deref(), Some("amex"));
    assert_eq!(entry.state.as_deref(), Some("DONE"));
    assert_eq!(entry.rows_inserted, Some(3));
    assert_eq!(entry.new_categories, Some(2));

    let serialized = serde_json::to_string(&entries).unwrap();
    assert!(!serialized.to_uppercase().contains("STARBUCKS"));
}

//! DuckDB warehouse: raw statement tables, taxonomy and category cache

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection, Transaction};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Category, CategoryCacheEntry, DescriptionKey, FileFingerprint, Institution, RawRecord,
    StatementRow,
};
use crate::migrations::MIGRATIONS;
use crate::ports::file_name;
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of attempts when the database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Whether an open error looks like a transient file lock
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

fn base_config() -> duckdb::Result<duckdb::Config> {
    // Extensions are statically linked; never autoload from ~/.duckdb
    duckdb::Config::default().enable_autoload_extension(false)
}

fn try_open_connection(db_path: &Path) -> duckdb::Result<Connection> {
    Connection::open_with_flags(db_path, base_config()?)
}

/// Open the warehouse file, backing off while another process holds its lock
fn open_with_retry(db_path: &Path) -> Result<Connection> {
    let mut attempt = 0;
    loop {
        match try_open_connection(db_path) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                let err_msg = e.to_string();
                if !is_retryable_error(&err_msg) || attempt + 1 >= MAX_RETRIES {
                    return Err(e.into());
                }
                let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                tracing::warn!(
                    attempt = attempt + 1,
                    max = MAX_RETRIES,
                    delay_ms = delay.as_millis() as u64,
                    error = %err_msg,
                    "warehouse busy, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// An entry in the file ingestion ledger
#[derive(Debug, Clone, Serialize)]
pub struct IngestedFile {
    pub institution: Institution,
    pub file_path: String,
    pub file_name: String,
    pub file_fingerprint: String,
    pub rows_inserted: i64,
    pub rows_skipped: i64,
    pub ingested_at: Option<String>,
}

/// One file's rows and ledger entry, written together by [`DuckDbRepository::load_file`]
#[derive(Debug, Clone)]
pub struct FileLoad {
    pub institution: Institution,
    pub file_path: String,
    pub file_fingerprint: FileFingerprint,
    pub records: Vec<RawRecord>,
    /// Files already holding the rows this load skipped as overlap
    pub covered_by: BTreeSet<String>,
    pub rows_skipped: usize,
    pub ingested_at: DateTime<Utc>,
}

impl FileLoad {
    pub fn new(
        institution: Institution,
        file_path: impl Into<String>,
        file_fingerprint: FileFingerprint,
        records: Vec<RawRecord>,
    ) -> Self {
        Self {
            institution,
            file_path: file_path.into(),
            file_fingerprint,
            records,
            covered_by: BTreeSet::new(),
            rows_skipped: 0,
            ingested_at: Utc::now(),
        }
    }
}

/// What forgetting one file removed
#[derive(Debug, Clone, Default)]
pub struct ForgottenFile {
    pub rows_deleted: usize,
    /// Files that skipped rows as copies of the forgotten file's rows.
    /// Those rows are gone until the dependents are loaded again.
    pub dependents: Vec<IngestedFile>,
}

/// Warehouse handle. Statements are serialized through one connection.
///
/// The connection can be parked on an in-memory database while an external
/// process (dbt) needs the warehouse file, see [`DuckDbRepository::release_while`].
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    attached: AtomicBool,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the warehouse file
    ///
    /// Retries with exponential backoff while another process holds the file lock.
    pub fn new(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_with_retry(db_path)?),
            attached: AtomicBool::new(true),
            db_path: db_path.to_path_buf(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::upstream(format!("warehouse lock poisoned: {}", e)))?;
        if !self.attached.load(Ordering::Acquire) {
            *conn = open_with_retry(&self.db_path)?;
            self.attached.store(true, Ordering::Release);
            tracing::debug!(path = %self.db_path.display(), "warehouse reattached");
        }
        Ok(conn)
    }

    /// Close the warehouse file while `f` runs, then reopen it
    ///
    /// Other threads block on the connection until `f` returns. `f` must not
    /// call back into the repository except for [`Self::is_attached`].
    pub fn release_while<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::upstream(format!("warehouse lock poisoned: {}", e)))?;
        // dropping the file connection releases DuckDB's file lock
        *conn = Connection::open_in_memory_with_flags(base_config()?)?;
        self.attached.store(false, Ordering::Release);
        tracing::debug!(path = %self.db_path.display(), "warehouse released");

        let out = f();

        *conn = open_with_retry(&self.db_path)?;
        self.attached.store(true, Ordering::Release);
        tracing::debug!(path = %self.db_path.display(), "warehouse reattached");
        Ok(out)
    }

    /// Whether the warehouse file is currently held open by this repository
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Apply pending warehouse migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn, MIGRATIONS).run_pending()
    }

    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            tracing::info!(applied = ?result.applied, "warehouse migrated");
        }
        Ok(())
    }

    // ========================================================================
    // File ledger
    // ========================================================================

    /// True once the file has a ledger entry, whether or not it inserted rows
    pub fn is_file_ingested(&self, fingerprint: &FileFingerprint) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sys_ingested_files WHERE file_fingerprint = ?",
            params![fingerprint.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Write a file's rows and its ledger entry in one transaction
    ///
    /// Rows and overlaps previously stored for the same fingerprint are
    /// replaced, so loading a file again never duplicates it. Returns the
    /// number of rows inserted.
    pub fn load_file(&self, load: &FileLoad) -> Result<usize> {
        for record in &load.records {
            if record.institution() != load.institution {
                return Err(Error::internal(format!(
                    "{} row cannot be appended to {}",
                    record.institution(),
                    load.institution.raw_table()
                )));
            }
            if record.file_fingerprint != load.file_fingerprint {
                return Err(Error::internal(format!(
                    "row from {} cannot be loaded as {}",
                    record.file_fingerprint.short(),
                    load.file_fingerprint.short()
                )));
            }
        }

        let fingerprint = load.file_fingerprint.as_str();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let replaced = delete_raw_rows(&tx, fingerprint)?;
        tx.execute(
            "DELETE FROM sys_file_overlaps WHERE file_fingerprint = ?",
            params![fingerprint],
        )?;
        tx.execute(
            "DELETE FROM sys_ingested_files WHERE file_fingerprint = ?",
            params![fingerprint],
        )?;

        for record in &load.records {
            insert_record(&tx, record)?;
        }
        tx.execute(
            "INSERT INTO sys_ingested_files (
                 file_fingerprint, institution, file_path, file_name,
                 rows_inserted, rows_skipped, ingested_at
             ) VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            params![
                fingerprint,
                load.institution.as_str(),
                load.file_path,
                file_name(&load.file_path),
                load.records.len() as i64,
                load.rows_skipped as i64,
                format_timestamp(&load.ingested_at),
            ],
        )?;
        for owner in load.covered_by.iter().filter(|owner| owner.as_str() != fingerprint) {
            tx.execute(
                "INSERT INTO sys_file_overlaps (file_fingerprint, covered_by) VALUES (?, ?)",
                params![fingerprint, owner],
            )?;
        }
        tx.commit()?;

        if replaced > 0 {
            tracing::debug!(fingerprint = %load.file_fingerprint.short(), replaced, "replaced earlier rows");
        }
        Ok(load.records.len())
    }

    /// Delete a file's rows and ledger entry in one transaction
    ///
    /// Files that skipped rows as copies of this one's are returned as
    /// dependents. Their entries and their links to this file stay until
    /// [`Self::load_file`] replaces them.
    pub fn forget_file(&self, fingerprint: &FileFingerprint) -> Result<ForgottenFile> {
        let fingerprint = fingerprint.as_str();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let dependents = tx
            .prepare(&format!(
                "{} WHERE file_fingerprint IN (
                     SELECT file_fingerprint FROM sys_file_overlaps WHERE covered_by = ?
                 ) AND file_fingerprint <> ?
                 ORDER BY ingested_at, file_path",
                SELECT_INGESTED_FILES
            ))?
            .query_map(params![fingerprint, fingerprint], ingested_file_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let rows_deleted = delete_raw_rows(&tx, fingerprint)?;
        tx.execute(
            "DELETE FROM sys_file_overlaps WHERE file_fingerprint = ?",
            params![fingerprint],
        )?;
        tx.execute(
            "DELETE FROM sys_ingested_files WHERE file_fingerprint = ?",
            params![fingerprint],
        )?;
        tx.commit()?;

        Ok(ForgottenFile {
            rows_deleted,
            dependents,
        })
    }

    /// Ledger entries, newest first
    pub fn list_ingested_files(&self) -> Result<Vec<IngestedFile>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY ingested_at DESC, file_path",
            SELECT_INGESTED_FILES
        ))?;
        let files = stmt
            .query_map([], ingested_file_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(files)
    }

    // ========================================================================
    // Raw store
    // ========================================================================

    /// Which file already stores each row fingerprint, ignoring `fingerprint` itself
    ///
    /// When several files hold the same row the smallest file fingerprint wins.
    pub fn row_owners_from_other_files(
        &self,
        institution: Institution,
        fingerprint: &FileFingerprint,
    ) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT row_fingerprint, MIN(file_fingerprint) FROM {}
             WHERE file_fingerprint <> ?
             GROUP BY row_fingerprint",
            institution.raw_table()
        ))?;
        let owners = stmt
            .query_map(params![fingerprint.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<duckdb::Result<HashMap<_, _>>>()?;
        Ok(owners)
    }

    pub fn count_raw_rows(&self, institution: Institution) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", institution.raw_table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // Uncategorized gap
    // ========================================================================

    /// Normalized descriptions with no cache entry, ascending, at most `limit`
    pub fn find_uncategorized(&self, limit: usize) -> Result<Vec<DescriptionKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} SELECT r.description_key FROM raw_keys r
             WHERE NOT EXISTS (
                 SELECT 1 FROM dim_description_categories dc
                 WHERE UPPER(TRIM(dc.description_key)) = r.description_key
             )
             ORDER BY r.description_key
             LIMIT ?",
            raw_keys_cte()
        ))?;
        let keys = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .map(|r| r.map(DescriptionKey::from_normalized))
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(keys)
    }

    /// Size of the whole gap, without the ceiling
    pub fn count_uncategorized(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "{} SELECT COUNT(*) FROM raw_keys r
                 WHERE NOT EXISTS (
                     SELECT 1 FROM dim_description_categories dc
                     WHERE UPPER(TRIM(dc.description_key)) = r.description_key
                 )",
                raw_keys_cte()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // Category cache
    // ========================================================================

    /// Insert entries whose key is not cached yet; returns rows inserted
    ///
    /// Each insert is guarded by an anti-join on the normalized key, and all
    /// inserts share one transaction.
    pub fn insert_category_entries(&self, entries: &[CategoryCacheEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for entry in entries {
            inserted += tx.execute(
                "INSERT INTO dim_description_categories (
                     description_key, original_description, general_category,
                     detailed_category, confidence_score, model_version, created_at, updated_at
                 )
                 SELECT ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP)
                 WHERE NOT EXISTS (
                     SELECT 1 FROM dim_description_categories
                     WHERE UPPER(TRIM(description_key)) = UPPER(TRIM(?))
                 )",
                params![
                    entry.description_key.as_str(),
                    entry.original_description,
                    entry.general_category,
                    entry.detailed_category,
                    entry.confidence_score,
                    entry.model_version,
                    format_timestamp(&entry.created_at),
                    format_timestamp(&entry.updated_at),
                    entry.description_key.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Cached entry for a key (first by creation time if duplicates slipped in)
    pub fn get_category_entry(&self, key: &DescriptionKey) -> Result<Option<CategoryCacheEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT description_key, original_description, general_category, detailed_category,
                    confidence_score, model_version, created_at::VARCHAR, updated_at::VARCHAR
             FROM dim_description_categories
             WHERE UPPER(TRIM(description_key)) = ?
             ORDER BY created_at
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![key.as_str()], |row| {
            Ok(CategoryCacheEntry {
                description_key: DescriptionKey::from_normalized(row.get::<_, String>(0)?),
                original_description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                general_category: row.get(2)?,
                detailed_category: row.get(3)?,
                confidence_score: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                model_version: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                created_at: parse_timestamp(&row.get::<_, String>(6)?),
                updated_at: parse_timestamp(&row.get::<_, String>(7)?),
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn count_category_entries(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dim_description_categories",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // Taxonomy
    // ========================================================================

    pub fn count_categories(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM dim_categories", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Seed `dim_categories` unless it already has rows; returns rows inserted
    pub fn seed_categories(&self, categories: &[Category]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing: i64 =
            tx.query_row("SELECT COUNT(*) FROM dim_categories", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }
        for category in categories {
            tx.execute(
                "INSERT INTO dim_categories (category_id, general_category, detailed_category, is_active)
                 VALUES (?, ?, ?, ?)",
                params![
                    category.category_id,
                    category.general_category,
                    category.detailed_category,
                    category.is_active,
                ],
            )?;
        }
        tx.commit()?;
        Ok(categories.len())
    }

    pub fn get_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT category_id, general_category, detailed_category, is_active
             FROM dim_categories ORDER BY category_id",
        )?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    category_id: row.get(0)?,
                    general_category: row.get(1)?,
                    detailed_category: row.get(2)?,
                    is_active: row.get(3)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(categories)
    }
}

/// `raw_keys` CTE: distinct non-empty normalized descriptions across every raw table
fn raw_keys_cte() -> String {
    let selects: Vec<String> = Institution::ALL
        .iter()
        .map(|i| {
            format!(
                "SELECT UPPER(TRIM(description)) AS description_key FROM {} WHERE description IS NOT NULL",
                i.raw_table()
            )
        })
        .collect();
    format!(
        "WITH raw_keys AS (SELECT DISTINCT description_key FROM ({}) WHERE description_key <> '')",
        selects.join(" UNION ALL ")
    )
}

const SELECT_INGESTED_FILES: &str = "SELECT institution, file_path, file_name, file_fingerprint,
        rows_inserted, rows_skipped, ingested_at::VARCHAR
 FROM sys_ingested_files";

fn ingested_file_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<IngestedFile> {
    let institution = row.get::<_, String>(0)?.parse::<Institution>().map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(0, duckdb::types::Type::Text, Box::new(e))
    })?;
    Ok(IngestedFile {
        institution,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_fingerprint: row.get(3)?,
        rows_inserted: row.get(4)?,
        rows_skipped: row.get(5)?,
        ingested_at: row.get(6)?,
    })
}

/// Delete every raw row carrying this file fingerprint, in every table
fn delete_raw_rows(tx: &Transaction<'_>, fingerprint: &str) -> Result<usize> {
    let mut deleted = 0;
    for institution in Institution::ALL {
        deleted += tx.execute(
            &format!("DELETE FROM {} WHERE file_fingerprint = ?", institution.raw_table()),
            params![fingerprint],
        )?;
    }
    Ok(deleted)
}

fn insert_record(tx: &Transaction<'_>, record: &RawRecord) -> Result<()> {
    let ingested_at = format_timestamp(&record.ingested_at);
    match &record.row {
        StatementRow::Amex(row) => {
            tx.execute(
                "INSERT INTO raw_amex_transactions (
                     file_name, file_fingerprint, row_fingerprint, ingested_at, is_processed,
                     date, date_processed, description, cardmember, amount,
                     foreign_spend_amount, commission, exchange_rate, merchant,
                     merchant_address, additional_information
                 ) VALUES (
                     ?, ?, ?, CAST(? AS TIMESTAMP), ?,
                     CAST(? AS DATE), CAST(? AS DATE), ?, ?, CAST(? AS DECIMAL(18, 2)),
                     CAST(? AS DECIMAL(18, 2)), CAST(? AS DECIMAL(18, 2)), CAST(? AS DECIMAL(18, 6)), ?,
                     ?, ?
                 )",
                params![
                    record.file_name,
                    record.file_fingerprint.as_str(),
                    record.row_fingerprint,
                    ingested_at,
                    record.processed,
                    format_date(row.date),
                    format_date(row.date_processed),
                    row.description,
                    row.cardmember,
                    row.amount.to_string(),
                    format_decimal(row.foreign_spend_amount),
                    format_decimal(row.commission),
                    format_decimal(row.exchange_rate),
                    row.merchant,
                    row.merchant_address,
                    row.additional_information,
                ],
            )?;
        }
        StatementRow::Wealthsimple(row) => {
            tx.execute(
                "INSERT INTO raw_wealthsimple_transactions (
                     file_name, file_fingerprint, row_fingerprint, ingested_at, is_processed,
                     date, \"transaction\", description, amount, balance
                 ) VALUES (
                     ?, ?, ?, CAST(? AS TIMESTAMP), ?,
                     CAST(? AS DATE), ?, ?, CAST(? AS DECIMAL(18, 2)), CAST(? AS DECIMAL(18, 2))
                 )",
                params![
                    record.file_name,
                    record.file_fingerprint.as_str(),
                    record.row_fingerprint,
                    ingested_at,
                    record.processed,
                    format_date(row.date),
                    row.transaction,
                    row.description,
                    row.amount.to_string(),
                    format_decimal(row.balance),
                ],
            )?;
        }
    }
    Ok(())
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn format_decimal(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AmexRow, WealthsimpleRow};
    use tempfile::TempDir;

    fn open() -> (TempDir, DuckDbRepository) {
        let dir = TempDir::new().unwrap();
        let repo = DuckDbRepository::new(&dir.path().join("test.duckdb")).unwrap();
        repo.ensure_schema().unwrap();
        (dir, repo)
    }

    fn amex(description: &str, amount: &str) -> StatementRow {
        StatementRow::Amex(AmexRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 15),
            date_processed: None,
            description: description.to_string(),
            cardmember: "J SMITH".to_string(),
            amount: amount.parse().unwrap(),
            foreign_spend_amount: None,
            commission: None,
            exchange_rate: None,
            merchant: None,
            merchant_address: None,
            additional_information: None,
        })
    }

    fn record(row: StatementRow, file: &[u8]) -> RawRecord {
        RawRecord::new(row, "file.csv", FileFingerprint::of(file), Utc::now())
    }

    fn file_load(file: &[u8], rows: Vec<StatementRow>) -> FileLoad {
        let institution = rows
            .first()
            .map(StatementRow::institution)
            .unwrap_or(Institution::Amex);
        let records = rows.into_iter().map(|row| record(row, file)).collect();
        let path = format!("statements/{}.csv", String::from_utf8_lossy(file));
        FileLoad::new(institution, path, FileFingerprint::of(file), records)
    }

    fn load(repo: &DuckDbRepository, file: &[u8], rows: Vec<StatementRow>) -> usize {
        repo.load_file(&file_load(file, rows)).unwrap()
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error("IO Error: Could not set lock on file"));
        assert!(is_retryable_error("The process cannot access the file"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_load_file_writes_rows_and_ledger_entry() {
        let (_dir, repo) = open();
        let fp = FileFingerprint::of(b"a");

        assert!(!repo.is_file_ingested(&fp).unwrap());
        assert_eq!(load(&repo, b"a", vec![amex("UBER", "12.50"), amex("LYFT", "8")]), 2);
        assert!(repo.is_file_ingested(&fp).unwrap());
        assert_eq!(repo.count_raw_rows(Institution::Amex).unwrap(), 2);
        assert_eq!(repo.count_raw_rows(Institution::Wealthsimple).unwrap(), 0);
    }

    #[test]
    fn test_load_file_twice_replaces_rows() {
        let (_dir, repo) = open();
        load(&repo, b"a", vec![amex("UBER", "12.50"), amex("LYFT", "8")]);
        load(&repo, b"a", vec![amex("UBER", "12.50"), amex("LYFT", "8")]);

        assert_eq!(repo.count_raw_rows(Institution::Amex).unwrap(), 2);
        assert_eq!(repo.list_ingested_files().unwrap().len(), 1);
    }

    #[test]
    fn test_file_with_no_inserted_rows_is_still_ingested() {
        let (_dir, repo) = open();
        let mut covered = file_load(b"sub", Vec::new());
        covered.rows_skipped = 1;
        covered.covered_by.insert(FileFingerprint::of(b"full").as_str().to_string());

        assert_eq!(repo.load_file(&covered).unwrap(), 0);
        assert!(repo.is_file_ingested(&FileFingerprint::of(b"sub")).unwrap());
        let files = repo.list_ingested_files().unwrap();
        assert_eq!(files[0].rows_inserted, 0);
        assert_eq!(files[0].rows_skipped, 1);
    }

    #[test]
    fn test_load_file_rejects_foreign_rows() {
        let (_dir, repo) = open();
        let mut wrong_table = file_load(b"a", vec![amex("UBER", "1")]);
        wrong_table.institution = Institution::Wealthsimple;
        let err = repo.load_file(&wrong_table).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let mut wrong_file = file_load(b"a", vec![amex("UBER", "1")]);
        wrong_file.file_fingerprint = FileFingerprint::of(b"b");
        assert!(!repo.load_file(&wrong_file).unwrap_err().is_client_error());

        assert_eq!(repo.count_raw_rows(Institution::Amex).unwrap(), 0);
        assert!(repo.list_ingested_files().unwrap().is_empty());
    }

    #[test]
    fn test_forget_file_only_touches_that_file() {
        let (_dir, repo) = open();
        load(&repo, b"one", vec![amex("A", "1")]);
        load(&repo, b"two", vec![amex("B", "2")]);

        let forgotten = repo.forget_file(&FileFingerprint::of(b"one")).unwrap();
        assert_eq!(forgotten.rows_deleted, 1);
        assert!(forgotten.dependents.is_empty());
        assert!(!repo.is_file_ingested(&FileFingerprint::of(b"one")).unwrap());
        assert!(repo.is_file_ingested(&FileFingerprint::of(b"two")).unwrap());

        let again = repo.forget_file(&FileFingerprint::of(b"one")).unwrap();
        assert_eq!(again.rows_deleted, 0);
    }

    #[test]
    fn test_forget_file_hands_back_files_it_covered() {
        let (_dir, repo) = open();
        load(&repo, b"one", vec![amex("NETFLIX", "16.99"), amex("A", "1")]);

        let mut overlapping = file_load(b"two", vec![amex("B", "2")]);
        overlapping.rows_skipped = 1;
        overlapping
            .covered_by
            .insert(FileFingerprint::of(b"one").as_str().to_string());
        repo.load_file(&overlapping).unwrap();

        let forgotten = repo.forget_file(&FileFingerprint::of(b"one")).unwrap();
        assert_eq!(forgotten.rows_deleted, 2);
        assert_eq!(forgotten.dependents.len(), 1);
        assert_eq!(forgotten.dependents[0].file_path, "statements/two.csv");
        assert_eq!(forgotten.dependents[0].institution, Institution::Amex);

        // the dependent keeps its rows and entry until it is loaded again
        assert!(repo.is_file_ingested(&FileFingerprint::of(b"two")).unwrap());
        assert_eq!(repo.count_raw_rows(Institution::Amex).unwrap(), 1);
        let again = repo.forget_file(&FileFingerprint::of(b"one")).unwrap();
        assert_eq!(again.dependents.len(), 1);

        repo.load_file(&file_load(b"two", vec![amex("NETFLIX", "16.99"), amex("B", "2")]))
            .unwrap();
        assert!(repo
            .forget_file(&FileFingerprint::of(b"one"))
            .unwrap()
            .dependents
            .is_empty());
    }

    #[test]
    fn test_row_owners_from_other_files() {
        let (_dir, repo) = open();
        let shared = amex("NETFLIX", "16.99");
        load(&repo, b"one", vec![shared.clone()]);

        let from_other = repo
            .row_owners_from_other_files(Institution::Amex, &FileFingerprint::of(b"two"))
            .unwrap();
        assert_eq!(
            from_other.get(&shared.fingerprint()).map(String::as_str),
            Some(FileFingerprint::of(b"one").as_str())
        );

        let from_self = repo
            .row_owners_from_other_files(Institution::Amex, &FileFingerprint::of(b"one"))
            .unwrap();
        assert!(from_self.is_empty());
    }

    #[test]
    fn test_release_while_frees_the_file() {
        let (dir, repo) = open();
        let path = dir.path().join("test.duckdb");
        assert!(repo.is_attached());

        let attached_inside = repo
            .release_while(|| {
                let other = Connection::open(&path).unwrap();
                other
                    .execute_batch("CREATE TABLE fct_transactions AS SELECT 42 AS id")
                    .unwrap();
                repo.is_attached()
            })
            .unwrap();

        assert!(!attached_inside);
        assert!(repo.is_attached());
        let id: i32 = repo
            .conn()
            .unwrap()
            .query_row("SELECT id FROM fct_transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(id, 42);
    }

    #[test]
    fn test_find_uncategorized_normalizes_and_excludes_cached() {
        let (_dir, repo) = open();
        load(
            &repo,
            b"f",
            vec![
                amex("UBER", "1"),
                amex("uber ", "2"),
                amex("STARBUCKS", "3"),
                amex("", "4"),
            ],
        );
        let now = Utc::now();
        repo.insert_category_entries(&[CategoryCacheEntry {
            description_key: DescriptionKey::from_normalized("UBER"),
            original_description: "UBER".to_string(),
            general_category: "Transportation".to_string(),
            detailed_category: "Rideshare".to_string(),
            confidence_score: 0.9,
            model_version: "test".to_string(),
            created_at: now,
            updated_at: now,
        }])
        .unwrap();

        let gap = repo.find_uncategorized(100).unwrap();
        assert_eq!(gap, vec![DescriptionKey::from_normalized("STARBUCKS")]);
        assert_eq!(repo.count_uncategorized().unwrap(), 1);
    }

    #[test]
    fn test_find_uncategorized_spans_institutions_and_respects_limit() {
        let (_dir, repo) = open();
        load(&repo, b"a", vec![amex("ZARA", "1")]);
        let ws = StatementRow::Wealthsimple(WealthsimpleRow {
            date: None,
            transaction: "SPEND".to_string(),
            description: "apple store".to_string(),
            amount: "5".parse().unwrap(),
            balance: None,
        });
        load(&repo, b"w", vec![ws]);

        let gap = repo.find_uncategorized(100).unwrap();
        assert_eq!(
            gap,
            vec![
                DescriptionKey::from_normalized("APPLE STORE"),
                DescriptionKey::from_normalized("ZARA"),
            ]
        );
        assert_eq!(repo.find_uncategorized(1).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_category_entries_skips_existing_keys() {
        let (_dir, repo) = open();
        let now = Utc::now();
        let entry = |key: &str, general: &str| CategoryCacheEntry {
            description_key: DescriptionKey::from_normalized(key),
            original_description: key.to_string(),
            general_category: general.to_string(),
            detailed_category: general.to_string(),
            confidence_score: 0.5,
            model_version: "test".to_string(),
            created_at: now,
            updated_at: now,
        };

        assert_eq!(repo.insert_category_entries(&[entry("UBER", "Transportation")]).unwrap(), 1);
        let inserted = repo
            .insert_category_entries(&[entry("UBER", "Shopping"), entry("LYFT", "Transportation")])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(repo.count_category_entries().unwrap(), 2);

        let cached = repo
            .get_category_entry(&DescriptionKey::from_normalized("UBER"))
            .unwrap()
            .unwrap();
        assert_eq!(cached.general_category, "Transportation");
    }

    #[test]
    fn test_seed_categories_once() {
        let (_dir, repo) = open();
        let rows = crate::domain::taxonomy_rows();
        assert_eq!(repo.seed_categories(&rows).unwrap(), rows.len());
        assert_eq!(repo.seed_categories(&rows).unwrap(), 0);
        assert_eq!(repo.count_categories().unwrap(), rows.len() as i64);
        assert_eq!(repo.get_categories().unwrap()[0].category_id, "cat_001");
    }

    #[test]
    fn test_list_ingested_files() {
        let (_dir, repo) = open();
        load(&repo, b"f", vec![amex("A", "1"), amex("B", "2")]);

        let files = repo.list_ingested_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rows_inserted, 2);
        assert_eq!(files[0].file_path, "statements/f.csv");
        assert_eq!(files[0].file_name, "f.csv");
        assert_eq!(files[0].institution, Institution::Amex);
        assert_eq!(files[0].file_fingerprint, FileFingerprint::of(b"f").as_str());
    }
}

//! Run log - durable event log in logs.duckdb
//!
//! Records what each pipeline run did and how it ended. Descriptions, amounts
//! and file contents are never written here, only counts, states and errors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::{PipelineState, ProcessingResult};
use crate::log_migrations::LOG_MIGRATIONS;
use crate::services::MigrationService;

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique ID: millisecond timestamp in the high bits, counter in the low 16
fn generate_id() -> u64 {
    let timestamp = Utc::now().timestamp_millis() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (timestamp << 16) | counter
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Which surface started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    Server,
}

impl EntryPoint {
    fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Server => "server",
        }
    }
}

/// A log event to be recorded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_inserted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_categories: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }

    pub fn with_state(mut self, state: PipelineState) -> Self {
        self.state = Some(state.as_str().to_string());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Copy the counters of a finished run
    pub fn with_result(mut self, result: &ProcessingResult) -> Self {
        self.run_id = Some(result.run_id.clone());
        self.files_processed = Some(result.files_processed as i64);
        self.rows_inserted = Some(result.rows_inserted as i64);
        self.new_categories = Some(result.new_categories as i64);
        self.duration_ms = Some((result.processing_time_seconds * 1000.0) as i64);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}

/// A log entry as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: i64,
    pub entry_point: String,
    pub app_version: String,
    pub event: String,
    pub run_id: Option<String>,
    pub institution: Option<String>,
    pub state: Option<String>,
    pub command: Option<String>,
    pub files_processed: Option<i64>,
    pub rows_inserted: Option<i64>,
    pub new_categories: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
}

const SELECT_COLUMNS: &str = "SELECT id, timestamp, entry_point, app_version, event, run_id,
        institution, state, command, files_processed, rows_inserted, new_categories,
        duration_ms, error_message, error_details
 FROM sys_logs";

fn row_to_entry(row: &duckdb::Row) -> duckdb::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        entry_point: row.get(2)?,
        app_version: row.get(3)?,
        event: row.get(4)?,
        run_id: row.get(5)?,
        institution: row.get(6)?,
        state: row.get(7)?,
        command: row.get(8)?,
        files_processed: row.get(9)?,
        rows_inserted: row.get(10)?,
        new_categories: row.get(11)?,
        duration_ms: row.get(12)?,
        error_message: row.get(13)?,
        error_details: row.get(14)?,
    })
}

/// Service owning logs.duckdb
pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
}

impl LoggingService {
    /// Open or create logs.duckdb in the data directory and migrate it
    pub fn new(
        data_dir: &Path,
        entry_point: EntryPoint,
        app_version: impl Into<String>,
    ) -> Result<Self> {
        let db_path = data_dir.join("logs.duckdb");
        let conn = Connection::open(&db_path)?;
        MigrationService::new(&conn, LOG_MIGRATIONS).run_pending()?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            entry_point,
            app_version: app_version.into(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::upstream(format!("log database lock poisoned: {}", e)))
    }

    /// Record an event, stamping entry point, version and time
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_logs (
                id, timestamp, entry_point, app_version, event, run_id, institution,
                state, command, files_processed, rows_inserted, new_categories,
                duration_ms, error_message, error_details
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![
                generate_id(),
                now_ms(),
                self.entry_point.as_str(),
                &self.app_version,
                &event.event,
                &event.run_id,
                &event.institution,
                &event.state,
                &event.command,
                event.files_processed,
                event.rows_inserted,
                event.new_categories,
                event.duration_ms,
                &event.error_message,
                &event.error_details,
            ],
        )?;
        Ok(())
    }

    /// Record an event, downgrading a write failure to a warning
    ///
    /// A broken run log must never fail the pipeline it is describing.
    pub fn record(&self, event: LogEvent) {
        let name = event.event.clone();
        if let Err(e) = self.log(event) {
            tracing::warn!(event = %name, error = %e, "failed to write run log");
        }
    }

    /// Most recent entries first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?", SELECT_COLUMNS))?;
        let entries = stmt
            .query_map([limit as i64], row_to_entry)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Most recent entries carrying an error
    pub fn get_errors(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE error_message IS NOT NULL ORDER BY id DESC LIMIT ?",
            SELECT_COLUMNS
        ))?;
        let entries = stmt
            .query_map([limit as i64], row_to_entry)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// All entries belonging to one run, oldest first
    pub fn get_run(&self, run_id: &str) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE run_id = ? ORDER BY id", SELECT_COLUMNS))?;
        let entries = stmt
            .query_map([run_id], row_to_entry)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_logs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_errors(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sys_logs WHERE error_message IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete entries older than the given unix-ms timestamp
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM sys_logs WHERE timestamp < ?", [timestamp_ms])?;
        Ok(deleted as u64)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

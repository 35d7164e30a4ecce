//! Run log migrations - embedded SQL files
//!
//! Same layout as the warehouse migrations, applied to logs.duckdb.

/// All run log migrations, embedded at compile time.
/// Format: (filename, sql_content)
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_run_log.sql", include_str!("001_run_log.sql")),
];

//! Warehouse migrations - embedded SQL files
//!
//! Migrations are compiled into the binary at build time using include_str!.
//! Each migration is a tuple of (name, sql_content), applied in order.

/// All warehouse migrations, embedded at compile time.
/// Format: (filename, sql_content)
///
/// When adding a migration, create `NNN_description.sql` and append it here.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_raw_tables.sql", include_str!("001_raw_tables.sql")),
    ("002_categories.sql", include_str!("002_categories.sql")),
    ("003_file_ledger.sql", include_str!("003_file_ledger.sql")),
];

//! Migration service - applies embedded SQL migrations
//!
//! Each migration is tracked in the sys_migrations table so applying is
//! idempotent. The same runner serves the warehouse and the run log.

use duckdb::Connection;

use crate::domain::result::Result;

const BOOTSTRAP: &str = "000_migrations.sql";

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Names of newly applied migrations
    pub applied: Vec<String>,
    /// Count of migrations that were already applied
    pub already_applied: usize,
}

/// Applies one ordered set of migrations to a connection
pub struct MigrationService<'a> {
    conn: &'a Connection,
    migrations: &'static [(&'static str, &'static str)],
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection, migrations: &'static [(&'static str, &'static str)]) -> Self {
        Self { conn, migrations }
    }

    /// Run all pending migrations
    ///
    /// Bootstraps sys_migrations from `000_migrations.sql` on a fresh database,
    /// then applies and records every migration not yet applied, in order.
    pub fn run_pending(&self) -> Result<MigrationResult> {
        let mut newly_applied = Vec::new();

        let bootstrapped = if !self.migrations_table_exists()? {
            match self.migrations.iter().find(|(n, _)| *n == BOOTSTRAP) {
                Some((name, sql)) => {
                    self.conn.execute_batch(sql)?;
                    self.record_migration(name)?;
                    newly_applied.push(name.to_string());
                    true
                }
                None => false,
            }
        } else {
            false
        };

        let applied_set = self.get_applied()?;
        let already_applied = if bootstrapped {
            applied_set.len().saturating_sub(1)
        } else {
            applied_set.len()
        };

        for (name, sql) in self.migrations.iter() {
            if *name == BOOTSTRAP || applied_set.iter().any(|a| a == name) {
                continue;
            }
            self.conn.execute_batch(sql)?;
            self.record_migration(name)?;
            tracing::debug!(migration = %name, "applied migration");
            newly_applied.push(name.to_string());
        }

        Ok(MigrationResult {
            applied: newly_applied,
            already_applied,
        })
    }

    fn migrations_table_exists(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        Ok(count > 0)
    }

    /// Names of already applied migrations
    pub fn get_applied(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT migration_name FROM sys_migrations ORDER BY migration_name")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut result = Vec::new();
        for name in names {
            result.push(name?);
        }
        Ok(result)
    }

    /// Names of migrations not yet applied
    pub fn get_pending(&self) -> Result<Vec<String>> {
        let applied = self.get_applied()?;
        Ok(self
            .migrations
            .iter()
            .filter(|(name, _)| !applied.iter().any(|a| a == name))
            .map(|(name, _)| name.to_string())
            .collect())
    }

    fn record_migration(&self, name: &str) -> Result<()> {
        self.conn
            .execute("INSERT INTO sys_migrations (migration_name) VALUES (?)", [name])?;
        Ok(())
    }
}

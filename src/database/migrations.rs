//! Schema migration engine
//!
//! Brings the database to the latest schema by executing SQL scripts from
//! the configured migrations directory, each at most once. This is the
//! single writer of schema; no repository issues DDL.
//!
//! Scripts are named `NNN_description.sql` and applied in ascending prefix
//! order. Each pending script runs inside its own transaction together with
//! the insert into `schema_migrations`, so a failed script leaves no trace.
//! Two scripts sharing a numeric prefix are rejected outright rather than
//! applied in an undefined order.

use crate::errors::{AppError, AppResult};
use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A migration script discovered on disk
#[derive(Debug, Clone)]
pub struct MigrationScript {
    /// Numeric prefix governing execution order
    pub prefix: u32,
    /// File name, recorded verbatim in `schema_migrations`
    pub name: String,
    pub path: PathBuf,
}

/// File-based schema migrator
pub struct SchemaMigrator {
    migrations_path: PathBuf,
}

impl SchemaMigrator {
    pub fn new(migrations_path: impl Into<PathBuf>) -> Self {
        Self {
            migrations_path: migrations_path.into(),
        }
    }

    /// Apply every pending migration script, in order.
    ///
    /// Returns the number of scripts applied during this run. Running twice
    /// on the same database is a no-op the second time.
    pub fn run(&self, conn: &Connection) -> AppResult<usize> {
        self.ensure_migrations_table(conn)?;

        let scripts = self.discover()?;
        if scripts.is_empty() {
            info!(
                "No migration scripts found in {:?}",
                self.migrations_path
            );
            return Ok(0);
        }

        let applied = self.applied_names(conn)?;
        let mut count = 0;
        for script in &scripts {
            if applied.contains(&script.name) {
                debug!("Skipping already applied migration {}", script.name);
                continue;
            }
            info!("Applying migration {}", script.name);
            self.apply(conn, script)?;
            count += 1;
        }

        Ok(count)
    }

    /// Enumerate migration scripts, sorted by numeric prefix.
    ///
    /// Files that do not match `NNN_*.sql` are ignored. Prefix collisions
    /// are an error.
    pub fn discover(&self) -> AppResult<Vec<MigrationScript>> {
        let entries = fs::read_dir(&self.migrations_path).map_err(|e| {
            AppError::configuration(
                self.migrations_path.display().to_string(),
                format!("cannot read migrations directory: {}", e),
            )
        })?;

        let mut scripts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                AppError::configuration(
                    self.migrations_path.display().to_string(),
                    e.to_string(),
                )
            })?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(prefix) = Self::numeric_prefix(name) else {
                debug!("Ignoring non-migration file {}", name);
                continue;
            };
            scripts.push(MigrationScript {
                prefix,
                name: name.to_string(),
                path,
            });
        }

        scripts.sort_by(|a, b| a.prefix.cmp(&b.prefix).then_with(|| a.name.cmp(&b.name)));

        for pair in scripts.windows(2) {
            if pair[0].prefix == pair[1].prefix {
                return Err(AppError::DatabaseMigration {
                    file: pair[1].name.clone(),
                    reason: format!(
                        "prefix {:03} collides with {}",
                        pair[1].prefix, pair[0].name
                    ),
                });
            }
        }

        Ok(scripts)
    }

    fn numeric_prefix(name: &str) -> Option<u32> {
        let stem = name.strip_suffix(".sql")?;
        let (digits, _) = stem.split_once('_')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    fn ensure_migrations_table(&self, conn: &Connection) -> AppResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                migration_name TEXT NOT NULL UNIQUE,
                executed_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schema_migrations_name
            ON schema_migrations(migration_name);",
        )
        .map_err(|e| AppError::database(format!("Failed to create schema_migrations: {}", e)))?;
        Ok(())
    }

    fn applied_names(&self, conn: &Connection) -> AppResult<HashSet<String>> {
        let mut stmt = conn.prepare("SELECT migration_name FROM schema_migrations")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    /// Execute one script and record it, atomically.
    fn apply(&self, conn: &Connection, script: &MigrationScript) -> AppResult<()> {
        let sql = fs::read_to_string(&script.path).map_err(|e| AppError::DatabaseMigration {
            file: script.name.clone(),
            reason: format!("cannot read script: {}", e),
        })?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| AppError::DatabaseMigration {
                file: script.name.clone(),
                reason: format!("cannot start transaction: {}", e),
            })?;

        if let Err(e) = tx.execute_batch(&sql) {
            let _ = tx.rollback();
            return Err(AppError::DatabaseMigration {
                file: script.name.clone(),
                reason: e.to_string(),
            });
        }

        if let Err(e) = tx.execute(
            "INSERT INTO schema_migrations (migration_name, executed_at) VALUES (?1, ?2)",
            params![script.name, Utc::now()],
        ) {
            let _ = tx.rollback();
            return Err(AppError::DatabaseMigration {
                file: script.name.clone(),
                reason: format!("cannot record migration: {}", e),
            });
        }

        tx.commit().map_err(|e| AppError::DatabaseMigration {
            file: script.name.clone(),
            reason: format!("cannot commit: {}", e),
        })?;

        Ok(())
    }
}

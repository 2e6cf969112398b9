//! Core database module
//!
//! Handles connection pooling, transactions and startup initialization.
//! Schema migration runs to completion inside [`Database::init`] before any
//! repository call is served.
//!
//! Repository calls are synchronous and may block up to the configured busy
//! timeout on the SQLite write lock; mutual exclusion is delegated to the
//! database engine.

use crate::config::{DatabaseConfig, DEFAULT_BUSY_TIMEOUT_MS};
use crate::database::migrations::SchemaMigrator;
use crate::errors::{AppError, AppResult};
use log::{debug, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Database connection pool size
const POOL_SIZE: usize = 10;

/// Database connection pool
pub struct DatabasePool {
    connections: Arc<Mutex<Vec<Connection>>>,
    locator: String,
    in_memory: bool,
    busy_timeout: Duration,
}

impl DatabasePool {
    /// Create a new pool backed by a database file
    pub fn new(db_path: &Path, busy_timeout: Duration) -> AppResult<Self> {
        let locator = db_path.to_string_lossy().into_owned();
        Self::with_locator(locator, false, busy_timeout)
    }

    /// Create a new in-memory pool for testing.
    ///
    /// A shared-cache URI is used so that every pooled connection sees the
    /// same database; the pool keeps its connections alive for the lifetime
    /// of the store.
    pub fn new_in_memory(busy_timeout: Duration) -> AppResult<Self> {
        let locator = format!(
            "file:memdb-{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        );
        Self::with_locator(locator, true, busy_timeout)
    }

    fn with_locator(locator: String, in_memory: bool, busy_timeout: Duration) -> AppResult<Self> {
        let mut connections = Vec::with_capacity(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            connections.push(Self::create_connection(&locator, in_memory, busy_timeout)?);
        }

        Ok(DatabasePool {
            connections: Arc::new(Mutex::new(connections)),
            locator,
            in_memory,
            busy_timeout,
        })
    }

    fn create_connection(
        locator: &str,
        in_memory: bool,
        busy_timeout: Duration,
    ) -> AppResult<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        if in_memory {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }

        let conn = Connection::open_with_flags(locator, flags).map_err(|e| {
            AppError::DatabaseConnection {
                reason: format!("{}: {}", locator, e),
            }
        })?;

        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        if !in_memory {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(conn)
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<Connection> {
        let mut pool = self
            .connections
            .lock()
            .map_err(|_| AppError::database("Failed to acquire connection pool lock"))?;

        if let Some(conn) = pool.pop() {
            Ok(conn)
        } else {
            // Pool exhausted, open an extra connection
            Self::create_connection(&self.locator, self.in_memory, self.busy_timeout)
        }
    }

    /// Return a connection to the pool
    pub fn return_connection(&self, conn: Connection) {
        if let Ok(mut pool) = self.connections.lock() {
            if pool.len() < POOL_SIZE {
                pool.push(conn);
                return;
            }
        }
        // Surplus connections are simply dropped
    }
}

/// Main database service
pub struct Database {
    pool: DatabasePool,
}

impl Database {
    /// Open the configured database file and bring it to the latest schema.
    ///
    /// Migration failure is fatal: the error propagates and the process must
    /// not start serving.
    pub fn init(config: &DatabaseConfig) -> AppResult<Self> {
        info!("Initializing database at {:?}", config.path);

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AppError::DatabaseConnection {
                    reason: format!("cannot create {}: {}", parent.display(), e),
                })?;
            }
        }

        let pool = DatabasePool::new(&config.path, Duration::from_millis(config.timeout_ms))?;
        let db = Self { pool };
        db.migrate(&config.migrations_path)?;
        Ok(db)
    }

    /// Initialize an in-memory database for testing
    pub fn new_in_memory(migrations_path: &Path) -> AppResult<Self> {
        info!("Initializing in-memory database");

        let pool = DatabasePool::new_in_memory(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        let db = Self { pool };
        db.migrate(migrations_path)?;
        Ok(db)
    }

    fn migrate(&self, migrations_path: &Path) -> AppResult<()> {
        let conn = self.pool.get_connection()?;
        let result = SchemaMigrator::new(migrations_path).run(&conn);
        self.pool.return_connection(conn);

        let applied = result?;
        info!("Schema migration complete, {} script(s) applied", applied);
        Ok(())
    }

    /// Execute a closure inside a transaction
    pub fn with_transaction<F, R>(&self, f: F) -> AppResult<R>
    where
        F: FnOnce(&Connection) -> AppResult<R>,
    {
        let conn = self.pool.get_connection()?;

        let outcome = (|| -> AppResult<R> {
            let transaction = conn.unchecked_transaction()?;

            match f(&conn) {
                Ok(result) => {
                    transaction.commit()?;
                    debug!("Transaction committed");
                    Ok(result)
                }
                Err(err) => {
                    let _ = transaction.rollback();
                    Err(err)
                }
            }
        })();

        self.pool.return_connection(conn);
        outcome
    }

    /// Get a database connection for read operations
    pub fn get_connection(&self) -> AppResult<Connection> {
        self.pool.get_connection()
    }

    /// Return a connection to the pool
    pub fn return_connection(&self, conn: Connection) {
        self.pool.return_connection(conn);
    }
}

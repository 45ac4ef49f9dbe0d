//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite persistence shared by the cache tiers and run status store:
//! - Connection pooling via r2d2 for concurrent runs
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode for concurrent readers during writes

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::types::{ForgeError, Result, ResultExt};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Index cache entries for purge",
    up: "CREATE INDEX IF NOT EXISTS idx_cache_entries_ttl
         ON cache_entries (tier, ttl_class, created_at)",
}];

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 4;
    const MAX_POOL_SIZE: u32 = 16;

    /// Two connections per core, clamped.
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        (cores * 2).clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(1),
            connection_timeout_secs: 30,
        }
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| ForgeError::Storage(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        // One connection: every in-memory connection is a separate database.
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| ForgeError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            ForgeError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Create tables and bring an existing database up to date.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        if current_version == 0 {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
            return Ok(());
        }

        drop(conn);
        self.migrate(current_version)
    }

    fn migrate(&self, current_version: u32) -> Result<()> {
        let conn = self.conn()?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a single SQL statement.
    pub fn execute(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(sql, params).with_context("Failed to execute SQL")
    }

    /// Execute operations within a transaction.
    ///
    /// All operations within the closure are atomic. If the closure panics,
    /// the transaction is rolled back and an error is returned instead of
    /// poisoning the connection pool.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(ForgeError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }
}

/// Run a blocking database closure off the async runtime.
pub async fn run_blocking<F, T>(db: &SharedDatabase, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ForgeError::Storage(format!("Database task failed: {}", e)))?
}

//! # Repository Database
//!
//! Opens the SQLite database holding items, metadata, bitstreams and checksum
//! history, and brings its schema up to date.
//!
//! Every pool is opened in WAL mode with foreign keys on. The schema lives in
//! `migrations/` and is embedded at compile time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("repository.db")).await?;
//! let items = SqliteItemRepository::new(pool.clone());
//! ```
//!
//! Tests use [`create_test_pool`]. SQLite gives each connection its own
//! in-memory database, so that pool has exactly one connection and anything
//! holding it (an open item session) blocks every other query.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_URL: &str = "sqlite::memory:";

/// Where the repository database lives and how many connections to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `sqlite:` URL of the database file, or the in-memory URL
    pub database_url: String,
    pub max_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
    /// How long SQLite retries a locked database before failing
    pub busy_timeout: Duration,
    /// Connections are recycled after this long; `None` keeps them forever
    pub max_lifetime: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
        }
    }

    /// Private in-memory database on a single, never recycled connection.
    pub fn in_memory() -> Self {
        Self {
            database_url: MEMORY_URL.to_string(),
            max_connections: 1,
            max_lifetime: None,
            ..Self::new("")
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == MEMORY_URL
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        Ok(SqliteConnectOptions::from_str(&self.database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true)
            .busy_timeout(self.busy_timeout))
    }
}

/// Open the repository database, migrate it and check it answers.
///
/// # Errors
///
/// - [`LibraryError::Database`] when the file cannot be opened
/// - [`LibraryError::Migration`] when the schema cannot be brought up to date
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening repository database"
    );

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.max_lifetime)
        .connect_with(config.connect_options()?)
        .await
        .inspect_err(|e| warn!(error = %e, "Cannot open repository database"))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| LibraryError::Migration(e.to_string()))?;
    debug!("Schema up to date");

    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

/// Migrated in-memory pool for tests.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

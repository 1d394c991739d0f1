//! SQLite persistence for the proxy directory and the crawl frontier
//!
//! [`Database`] owns the connection pool and applies the embedded migrations;
//! [`SqliteStore`] implements the [`crate::store`] traits on top of it.
//!
//! Timestamps are kept as Unix milliseconds and latencies as milliseconds so
//! freshness arithmetic can run inside SQL.

mod links;
mod proxies;

use crate::error::{DirectoryError, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Connections kept by default; SQLite serializes writers anyway.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool with the directory schema applied
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `url`.
    ///
    /// `url` may be a plain file path or a `sqlite:` URL.
    #[instrument(skip(url), fields(url = %url))]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{url}")
        };

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("database ready");

        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests
    #[instrument]
    pub async fn new_in_memory() -> Result<Self> {
        // One connection: every in-memory connection would see its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// [`crate::store::ProxyStore`] and [`crate::store::LinkStore`] over SQLite
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DirectoryError::Store(format!("timestamp out of range: {ms}")))
}

fn to_count(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| DirectoryError::Store(format!("negative {column}: {value}")))
}

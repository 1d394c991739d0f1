//! Proxy Directory - persistence layer for proxy discovery and rotation
//!
//! Stores candidate proxies and crawl-frontier hosts, tracks their freshness,
//! and answers the selection and reconciliation queries used by a rotation
//! client and a crawler.

pub mod database;
pub mod error;
pub mod links;
pub mod proxy;
pub mod store;

pub use database::{Database, SqliteStore};
pub use error::DirectoryError;
pub use links::{FrontierTracker, LinkRecord};
pub use proxy::*;
pub use store::{LinkFilter, LinkStore, PortFrequency, ProxyFilter, ProxyStore};

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path or `sqlite:` URL
    pub database_url: String,
    pub max_connections: u32,
    /// Log failed operations before returning them
    pub log_errors: bool,
    pub freshness: FreshnessPolicy,
    /// Rows per reconciliation page
    pub chunk_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "proxies.db".to_string(),
            max_connections: database::DEFAULT_MAX_CONNECTIONS,
            log_errors: false,
            freshness: FreshnessPolicy::default(),
            chunk_size: proxy::reconciler::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database_url(mut self, database_url: String) -> Self {
        self.database_url = database_url;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Connect to the configured database
    pub async fn open_store(&self) -> error::Result<SqliteStore> {
        let db = Database::connect(&self.database_url, self.max_connections).await?;
        Ok(SqliteStore::new(db))
    }

    pub fn directory<S: ProxyStore + Clone>(&self, store: S) -> ProxyDirectory<S> {
        ProxyDirectory::new(store, self)
    }

    pub fn frontier<S: LinkStore>(&self, store: S) -> FrontierTracker<S> {
        FrontierTracker::new(store, self.freshness).with_log_errors(self.log_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.database_url, "proxies.db");
        assert_eq!(config.chunk_size, 100_000);
        assert!(!config.log_errors);
        assert_eq!(config.freshness, FreshnessPolicy::default());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_database_url("sqlite::memory:".to_string())
            .with_max_connections(1)
            .with_log_errors(true)
            .with_freshness(FreshnessPolicy::new().with_base_interval(Duration::hours(6)))
            .with_chunk_size(500);

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_connections, 1);
        assert!(config.log_errors);
        assert_eq!(config.freshness.base_interval, Duration::hours(6));
        assert_eq!(config.chunk_size, 500);
    }
}

//! Frontier tracker deciding which hosts to crawl again

use crate::error::{log_failure, Result};
use crate::links::models::LinkRecord;
use crate::proxy::freshness::FreshnessPolicy;
use crate::store::{LinkFilter, LinkStore};
use chrono::{DateTime, Utc};
use tracing::instrument;

/// Crawl frontier over a [`LinkStore`]
pub struct FrontierTracker<S> {
    store: S,
    policy: FreshnessPolicy,
    log_errors: bool,
}

impl<S: LinkStore> FrontierTracker<S> {
    pub fn new(store: S, policy: FreshnessPolicy) -> Self {
        Self {
            store,
            policy,
            log_errors: false,
        }
    }

    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    /// Insert the link or overwrite the existing one, stamping `updated_at` now
    pub async fn upsert(&self, link: LinkRecord) -> Result<LinkRecord> {
        self.upsert_at(link, Utc::now()).await
    }

    #[instrument(skip(self, link), fields(hostname = %link.hostname))]
    pub async fn upsert_at(&self, mut link: LinkRecord, now: DateTime<Utc>) -> Result<LinkRecord> {
        link.updated_at = now;
        let result = self.store.upsert_link(&link).await.map(|()| link);
        log_failure(self.log_errors, "upsert_link", result)
    }

    pub async fn get(&self, hostname: &str) -> Result<LinkRecord> {
        log_failure(self.log_errors, "get_link", self.store.get_link(hostname).await)
    }

    pub async fn list_all(&self) -> Result<Vec<String>> {
        let result = self.store.link_hostnames(&LinkFilter::All).await;
        log_failure(self.log_errors, "list_links", result)
    }

    /// Hosts flagged for repeated crawling
    pub async fn list_iterable(&self) -> Result<Vec<String>> {
        let result = self.store.link_hostnames(&LinkFilter::Iterable).await;
        log_failure(self.log_errors, "list_iterable_links", result)
    }

    /// Iterable hosts not updated within the re-crawl window
    pub async fn list_stale_links(&self) -> Result<Vec<String>> {
        self.list_stale_links_at(Utc::now()).await
    }

    pub async fn list_stale_links_at(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let filter = LinkFilter::StaleAsOf {
            policy: self.policy,
            as_of: now,
        };
        let result = self.store.link_hostnames(&filter).await;
        log_failure(self.log_errors, "list_stale_links", result)
    }

    /// Count one more crawl of `hostname`
    pub async fn record_crawl(&self, hostname: &str) -> Result<LinkRecord> {
        let result = self.store.record_crawl(hostname, Utc::now()).await;
        log_failure(self.log_errors, "record_crawl", result)
    }
}

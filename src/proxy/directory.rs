//! Proxy directory: writes, lookups and list imports over a [`ProxyStore`]

use crate::error::{log_failure, DirectoryError, Result};
use crate::proxy::models::{CheckOutcome, Proxy, ProxyRecord};
use crate::proxy::reconciler::Reconciler;
use crate::proxy::selector::ProxySelector;
use crate::store::ProxyStore;
use crate::Config;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Inserts in flight at once during an import
const IMPORT_CONCURRENCY: usize = 8;

/// Outcome of merging a discovered list into the directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Distinct candidate hostnames
    pub candidates: usize,
    /// Hostnames the directory did not know
    pub unknown: usize,
    /// Hostnames inserted as new records
    pub inserted: Vec<String>,
    /// Hostnames another writer inserted between reconciliation and insert
    pub conflicts: Vec<String>,
}

/// The proxy directory.
///
/// Groups the selector and reconciler over one store and owns the write path.
pub struct ProxyDirectory<S> {
    store: S,
    selector: ProxySelector<S>,
    reconciler: Reconciler<S>,
    log_errors: bool,
}

impl<S: ProxyStore + Clone> ProxyDirectory<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            selector: ProxySelector::new(store.clone(), config.freshness)
                .with_log_errors(config.log_errors),
            reconciler: Reconciler::new(store.clone())
                .with_chunk_size(config.chunk_size)
                .with_log_errors(config.log_errors),
            store,
            log_errors: config.log_errors,
        }
    }

    pub fn selector(&self) -> &ProxySelector<S> {
        &self.selector
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Point lookup; a miss is [`DirectoryError::NotFound`]
    pub async fn get(&self, hostname: &str) -> Result<ProxyRecord> {
        log_failure(self.log_errors, "get", self.store.get(hostname).await)
    }

    /// Add a newly discovered, unverified proxy.
    ///
    /// Discovering a hostname twice is a [`DirectoryError::ConstraintViolation`].
    #[instrument(skip(self), fields(hostname = %proxy.hostname()))]
    pub async fn discover(&self, proxy: &Proxy) -> Result<ProxyRecord> {
        let record = ProxyRecord::discovered(proxy, Utc::now());
        let result = self.store.insert(&record).await.map(|()| record);
        log_failure(self.log_errors, "discover", result)
    }

    /// Store a verification result, creating the record on first sight
    pub async fn record_check(&self, proxy: &Proxy, outcome: CheckOutcome) -> Result<ProxyRecord> {
        self.record_check_at(proxy, outcome, Utc::now()).await
    }

    /// [`Self::record_check`] with an explicit clock.
    ///
    /// Concurrent checks of one hostname are last-writer-wins.
    #[instrument(
        skip(self, outcome),
        fields(hostname = %proxy.hostname(), working = outcome.working)
    )]
    pub async fn record_check_at(
        &self,
        proxy: &Proxy,
        outcome: CheckOutcome,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord> {
        let result = self.upsert_check(proxy, &outcome, now).await;
        log_failure(self.log_errors, "record_check", result)
    }

    async fn upsert_check(
        &self,
        proxy: &Proxy,
        outcome: &CheckOutcome,
        now: DateTime<Utc>,
    ) -> Result<ProxyRecord> {
        match self.store.get(&proxy.hostname()).await {
            Ok(mut record) => {
                record.apply_check(outcome, now);
                self.store.update(&record).await?;
                Ok(record)
            }
            Err(DirectoryError::NotFound(_)) => {
                let mut record = ProxyRecord::discovered(proxy, now);
                record.apply_check(outcome, now);
                self.store.insert(&record).await?;
                Ok(record)
            }
            Err(err) => Err(err),
        }
    }

    /// Merge a discovered list: reconcile it, then insert only unknown hostnames
    #[instrument(skip_all, fields(proxies = proxies.len()))]
    pub async fn import(&self, proxies: Vec<Proxy>) -> Result<ImportReport> {
        let by_hostname: HashMap<String, Proxy> = proxies
            .into_iter()
            .map(|proxy| (proxy.hostname(), proxy))
            .collect();
        let candidates = by_hostname.len();

        let unknown = self
            .reconciler
            .find_unknown(by_hostname.keys().cloned())
            .await?;

        let now = Utc::now();
        let records: Vec<ProxyRecord> = unknown
            .iter()
            .filter_map(|hostname| by_hostname.get(hostname))
            .map(|proxy| ProxyRecord::discovered(proxy, now))
            .collect();

        let store = &self.store;
        let results = stream::iter(records)
            .map(|record| async move {
                let result = store.insert(&record).await;
                (record.hostname, result)
            })
            .buffer_unordered(IMPORT_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut report = ImportReport {
            candidates,
            unknown: unknown.len(),
            ..Default::default()
        };
        for (hostname, result) in results {
            match result {
                Ok(()) => report.inserted.push(hostname),
                Err(DirectoryError::ConstraintViolation(_)) => {
                    warn!(%hostname, "proxy inserted concurrently during import");
                    report.conflicts.push(hostname);
                }
                Err(err) => return log_failure(self.log_errors, "import", Err(err)),
            }
        }
        report.inserted.sort();
        report.conflicts.sort();

        info!(
            candidates = report.candidates,
            unknown = report.unknown,
            inserted = report.inserted.len(),
            "import finished"
        );
        Ok(report)
    }
}

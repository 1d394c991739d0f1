//! Read-only selection queries over the proxy directory

use crate::error::{log_failure, Result};
use crate::proxy::freshness::FreshnessPolicy;
use crate::proxy::models::ProxyType;
use crate::store::{PortFrequency, ProxyFilter, ProxyStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of ports reported by default
pub const DEFAULT_TOP_PORTS: usize = 20;

/// Counts for one scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeStats {
    pub total: u64,
    pub working: u64,
}

/// Snapshot of directory counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub total: u64,
    pub working: u64,
    /// Working and anonymous
    pub anonymous: u64,
    pub stale: u64,
    pub by_scheme: BTreeMap<String, SchemeStats>,
}

/// Query front for a [`ProxyStore`].
///
/// Every call is a single attempt: store failures are returned, not retried
/// and never replaced by an empty result.
pub struct ProxySelector<S> {
    store: S,
    policy: FreshnessPolicy,
    log_errors: bool,
}

impl<S: ProxyStore> ProxySelector<S> {
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

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Filter selecting records due for re-verification right now
    pub fn stale_filter(&self) -> ProxyFilter {
        ProxyFilter::new().stale_as_of(self.policy, Utc::now())
    }

    /// Every matching hostname; callers must not rely on the order
    pub async fn list_all(&self, filter: &ProxyFilter) -> Result<Vec<String>> {
        log_failure(self.log_errors, "list_all", self.store.hostnames(filter).await)
    }

    pub async fn count_matching(&self, filter: &ProxyFilter) -> Result<u64> {
        log_failure(self.log_errors, "count_matching", self.store.count(filter).await)
    }

    /// Up to `n` matching hostnames drawn without replacement.
    ///
    /// Fewer matches than `n` returns all of them.
    pub async fn sample_random(&self, filter: &ProxyFilter, n: usize) -> Result<Vec<String>> {
        log_failure(self.log_errors, "sample_random", self.store.sample(filter, n).await)
    }

    /// Most common ports among working proxies, most frequent first.
    ///
    /// Order between ports with equal frequency is unspecified.
    pub async fn top_ports(&self, limit: usize) -> Result<Vec<PortFrequency>> {
        let result = self
            .store
            .port_frequencies(&ProxyFilter::working_only(), limit)
            .await;
        log_failure(self.log_errors, "top_ports", result)
    }

    /// Hostnames ordered by most recent update
    pub async fn recent(&self, limit: usize) -> Result<Vec<String>> {
        log_failure(self.log_errors, "recent", self.store.recent(limit).await)
    }

    /// Distinct hosts among working proxies
    pub async fn unique_hosts(&self) -> Result<Vec<String>> {
        let result = self.store.distinct_hosts(&ProxyFilter::working_only()).await;
        log_failure(self.log_errors, "unique_hosts", result)
    }

    pub async fn stats(&self) -> Result<DirectoryStats> {
        let mut stats = DirectoryStats {
            total: self.count_matching(&ProxyFilter::new()).await?,
            working: self.count_matching(&ProxyFilter::working_only()).await?,
            anonymous: self.count_matching(&ProxyFilter::anonymous_only()).await?,
            stale: self.count_matching(&self.stale_filter()).await?,
            by_scheme: BTreeMap::new(),
        };

        for scheme in ProxyType::all() {
            let total = self
                .count_matching(&ProxyFilter::new().scheme(scheme))
                .await?;
            let working = self
                .count_matching(&ProxyFilter::working_only().scheme(scheme))
                .await?;
            stats
                .by_scheme
                .insert(scheme.to_string(), SchemeStats { total, working });
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, SqliteStore};
    use crate::proxy::models::{CheckOutcome, Proxy, ProxyRecord};
    use chrono::{DateTime, TimeZone};
    use std::collections::HashSet;
    use std::time::Duration;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    async fn seeded() -> (SqliteStore, Vec<ProxyRecord>) {
        let store = SqliteStore::new(Database::new_in_memory().await.unwrap());
        let ports = [8080u16, 8080, 8080, 3128, 3128, 1080, 80, 443];
        let mut records = Vec::new();

        for (i, port) in ports.iter().enumerate() {
            let scheme = if i % 2 == 0 { ProxyType::Http } else { ProxyType::Socks5 };
            let proxy = Proxy::new(format!("172.16.0.{i}"), *port, scheme);
            let mut record = ProxyRecord::discovered(&proxy, at());
            if i != 7 {
                record.apply_check(&CheckOutcome::working(i % 3 == 0, Duration::ZERO), at());
            }
            store.insert(&record).await.unwrap();
            records.push(record);
        }

        (store, records)
    }

    #[tokio::test]
    async fn test_list_all_contains_each_hostname_once() {
        let (store, records) = seeded().await;
        let selector = ProxySelector::new(store, FreshnessPolicy::default());

        let listed = selector.list_all(&ProxyFilter::new()).await.unwrap();
        assert_eq!(listed.len(), records.len());
        for record in &records {
            assert_eq!(listed.iter().filter(|h| **h == record.hostname).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_count_matching() {
        let (store, records) = seeded().await;
        let selector = ProxySelector::new(store, FreshnessPolicy::default());

        for filter in [
            ProxyFilter::new(),
            ProxyFilter::working_only(),
            ProxyFilter::anonymous_only(),
            ProxyFilter::working_only().scheme(ProxyType::Socks5),
        ] {
            let expected = records.iter().filter(|r| filter.matches(r)).count() as u64;
            assert_eq!(selector.count_matching(&filter).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_sample_random_is_bounded_and_matching() {
        let (store, records) = seeded().await;
        let selector = ProxySelector::new(store, FreshnessPolicy::default());
        let filter = ProxyFilter::working_only().scheme(ProxyType::Http);
        let matching: HashSet<String> = records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.hostname.clone())
            .collect();

        for n in [0usize, 1, 2, 3, 50] {
            let sample = selector.sample_random(&filter, n).await.unwrap();
            assert!(sample.len() <= n);
            assert_eq!(sample.len(), n.min(matching.len()));
            assert!(sample.iter().all(|h| matching.contains(h)));
            let unique: HashSet<&String> = sample.iter().collect();
            assert_eq!(unique.len(), sample.len(), "sampled without replacement");
        }
    }

    #[tokio::test]
    async fn test_top_ports_sorted_and_bounded() {
        let (store, _) = seeded().await;
        let selector = ProxySelector::new(store, FreshnessPolicy::default());

        let ports = selector.top_ports(DEFAULT_TOP_PORTS).await.unwrap();
        assert!(ports.len() <= DEFAULT_TOP_PORTS);
        assert!(ports.windows(2).all(|w| w[0].frequency >= w[1].frequency));
        assert_eq!(ports[0], PortFrequency { port: 8080, frequency: 3 });
        // 443 belongs to the only non-working proxy
        assert!(ports.iter().all(|p| p.port != 443));

        // Tie order between 1080 and 80 is unspecified; only the bound is checked.
        let top_three = selector.top_ports(3).await.unwrap();
        assert_eq!(top_three.len(), 3);
        assert_eq!(top_three[1], PortFrequency { port: 3128, frequency: 2 });
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _) = seeded().await;
        let selector = ProxySelector::new(store, FreshnessPolicy::default());

        let stats = selector.stats().await.unwrap();
        assert_eq!(stats.total, 8);
        assert_eq!(stats.working, 7);
        assert_eq!(stats.anonymous, 3);
        // seeded records are long past their zero backoff window
        assert_eq!(stats.stale, 8);
        assert_eq!(stats.by_scheme["http"], SchemeStats { total: 4, working: 4 });
        assert_eq!(stats.by_scheme["socks5"], SchemeStats { total: 4, working: 3 });
        assert_eq!(stats.by_scheme["https"], SchemeStats::default());
    }

    #[tokio::test]
    async fn test_unique_hosts_and_recent() {
        let (store, _) = seeded().await;
        let selector = ProxySelector::new(store, FreshnessPolicy::default());

        assert_eq!(selector.unique_hosts().await.unwrap().len(), 7);
        assert_eq!(selector.recent(5).await.unwrap().len(), 5);
    }
}

//! Record store seam.
//!
//! The directory's policy code talks to persistence only through
//! [`ProxyStore`] and [`LinkStore`]. [`crate::database::SqliteStore`] is the
//! shipped implementation; anything offering keyed insert/update, predicate
//! scans, counts and key-ordered paging can stand in for it.

use crate::error::Result;
use crate::links::LinkRecord;
use crate::proxy::freshness::FreshnessPolicy;
use crate::proxy::models::{ProxyRecord, ProxyType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Staleness clause of a [`ProxyFilter`], evaluated as of a fixed instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleClause {
    pub policy: FreshnessPolicy,
    pub as_of: DateTime<Utc>,
    /// `true` selects stale records, `false` selects fresh ones
    pub stale: bool,
}

/// Conjunction of optional predicates over proxy records.
///
/// An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyFilter {
    pub working: Option<bool>,
    pub anonymous: Option<bool>,
    pub scheme: Option<ProxyType>,
    pub stale: Option<StaleClause>,
}

impl ProxyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Working proxies
    pub fn working_only() -> Self {
        Self::new().working(true)
    }

    /// Working proxies that hide the client address
    pub fn anonymous_only() -> Self {
        Self::new().working(true).anonymous(true)
    }

    pub fn working(mut self, working: bool) -> Self {
        self.working = Some(working);
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = Some(anonymous);
        self
    }

    pub fn scheme(mut self, scheme: ProxyType) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// Keep only records due for re-verification at `as_of`
    pub fn stale_as_of(mut self, policy: FreshnessPolicy, as_of: DateTime<Utc>) -> Self {
        self.stale = Some(StaleClause {
            policy,
            as_of,
            stale: true,
        });
        self
    }

    /// Keep only records not yet due for re-verification at `as_of`
    pub fn fresh_as_of(mut self, policy: FreshnessPolicy, as_of: DateTime<Utc>) -> Self {
        self.stale = Some(StaleClause {
            policy,
            as_of,
            stale: false,
        });
        self
    }

    /// In-memory evaluation; stores must select exactly the records this accepts.
    pub fn matches(&self, record: &ProxyRecord) -> bool {
        self.working.map_or(true, |w| record.is_working == w)
            && self.anonymous.map_or(true, |a| record.is_anonymous == a)
            && self.scheme.map_or(true, |s| record.scheme == s)
            && self
                .stale
                .map_or(true, |c| c.policy.is_stale(record, c.as_of) == c.stale)
    }
}

/// How many working proxies listen on a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFrequency {
    pub port: u16,
    pub frequency: u64,
}

/// Predicates over link records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFilter {
    All,
    Iterable,
    /// Iterable links whose last update is older than the re-crawl window
    StaleAsOf {
        policy: FreshnessPolicy,
        as_of: DateTime<Utc>,
    },
}

impl LinkFilter {
    pub fn matches(&self, link: &LinkRecord) -> bool {
        match self {
            LinkFilter::All => true,
            LinkFilter::Iterable => link.should_iterate,
            LinkFilter::StaleAsOf { policy, as_of } => policy.is_link_stale(link, *as_of),
        }
    }
}

/// Persistence operations the proxy directory relies on
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Adds a new record; a taken hostname yields `ConstraintViolation`.
    async fn insert(&self, record: &ProxyRecord) -> Result<()>;

    /// Overwrites the record with the same hostname; a miss yields `NotFound`.
    async fn update(&self, record: &ProxyRecord) -> Result<()>;

    /// Point lookup by hostname; a miss yields `NotFound`.
    async fn get(&self, hostname: &str) -> Result<ProxyRecord>;

    /// Hostnames of every matching record, in no particular order.
    async fn hostnames(&self, filter: &ProxyFilter) -> Result<Vec<String>>;

    /// Number of matching records.
    async fn count(&self, filter: &ProxyFilter) -> Result<u64>;

    /// Up to `n` matching hostnames chosen uniformly without replacement.
    async fn sample(&self, filter: &ProxyFilter, n: usize) -> Result<Vec<String>>;

    /// One page of hostnames ordered by hostname.
    async fn page(&self, offset: u64, limit: u64) -> Result<Vec<String>>;

    /// Ports of matching records by descending frequency.
    async fn port_frequencies(
        &self,
        filter: &ProxyFilter,
        limit: usize,
    ) -> Result<Vec<PortFrequency>>;

    /// Hostnames ordered by most recent update.
    async fn recent(&self, limit: usize) -> Result<Vec<String>>;

    /// Distinct hosts among matching records.
    async fn distinct_hosts(&self, filter: &ProxyFilter) -> Result<Vec<String>>;
}

/// Persistence operations the frontier tracker relies on
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Inserts or overwrites the link with the same hostname.
    async fn upsert_link(&self, link: &LinkRecord) -> Result<()>;

    /// Point lookup by hostname; a miss yields `NotFound`.
    async fn get_link(&self, hostname: &str) -> Result<LinkRecord>;

    /// Hostnames of every matching link.
    async fn link_hostnames(&self, filter: &LinkFilter) -> Result<Vec<String>>;

    /// Bumps the crawl counter and sets `updated_at`; a miss yields `NotFound`.
    async fn record_crawl(&self, hostname: &str, now: DateTime<Utc>) -> Result<LinkRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{CheckOutcome, Proxy};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn record(host: &str, scheme: ProxyType, working: bool, anonymous: bool) -> ProxyRecord {
        let proxy = Proxy::new(host.to_string(), 8080, scheme);
        let mut record = ProxyRecord::discovered(&proxy, now());
        let outcome = if working {
            CheckOutcome::working(anonymous, std::time::Duration::ZERO)
        } else {
            CheckOutcome::failed(std::time::Duration::ZERO)
        };
        record.apply_check(&outcome, now());
        record
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ProxyFilter::new();
        assert!(filter.matches(&record("1.1.1.1", ProxyType::Http, true, true)));
        assert!(filter.matches(&record("1.1.1.2", ProxyType::Socks5, false, false)));
    }

    #[test]
    fn test_filter_conjunction() {
        let filter = ProxyFilter::anonymous_only().scheme(ProxyType::Https);
        assert!(filter.matches(&record("1.1.1.1", ProxyType::Https, true, true)));
        assert!(!filter.matches(&record("1.1.1.2", ProxyType::Http, true, true)));
        assert!(!filter.matches(&record("1.1.1.3", ProxyType::Https, true, false)));
        assert!(!filter.matches(&record("1.1.1.4", ProxyType::Https, false, false)));
    }

    #[test]
    fn test_stale_and_fresh_clauses_partition_records() {
        let policy = FreshnessPolicy::default();
        let later = now() + Duration::days(1);
        let stale = ProxyFilter::new().stale_as_of(policy, later);
        let fresh = ProxyFilter::new().fresh_as_of(policy, later);

        let working = record("1.1.1.1", ProxyType::Http, true, false);
        let failed = record("1.1.1.2", ProxyType::Http, false, false);

        assert!(stale.matches(&working));
        assert!(!fresh.matches(&working));
        assert!(!stale.matches(&failed));
        assert!(fresh.matches(&failed));
    }

    #[test]
    fn test_link_filter() {
        let policy = FreshnessPolicy::default();
        let link = LinkRecord::new("example.org".to_string(), true, now());
        assert!(LinkFilter::All.matches(&link));
        assert!(LinkFilter::Iterable.matches(&link));
        assert!(!LinkFilter::StaleAsOf { policy, as_of: now() }.matches(&link));
        assert!(LinkFilter::StaleAsOf {
            policy,
            as_of: now() + Duration::hours(2)
        }
        .matches(&link));
    }
}

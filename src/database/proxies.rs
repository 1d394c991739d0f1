//! Proxy table queries

use super::{from_millis, to_count, to_millis, SqliteStore};
use crate::error::{DirectoryError, Result};
use crate::proxy::models::ProxyRecord;
use crate::store::{PortFrequency, ProxyFilter, ProxyStore};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, FromRow)]
struct ProxyRow {
    hostname: String,
    scheme: String,
    host: String,
    port: i64,
    is_working: bool,
    is_anonymous: bool,
    check_fail_count: i64,
    response_ms: i64,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ProxyRow> for ProxyRecord {
    type Error = DirectoryError;

    fn try_from(row: ProxyRow) -> Result<Self> {
        let port = u16::try_from(row.port)
            .map_err(|_| DirectoryError::Store(format!("port out of range: {}", row.port)))?;
        let check_fail_count = u32::try_from(row.check_fail_count).map_err(|_| {
            DirectoryError::Store(format!(
                "check_fail_count out of range: {}",
                row.check_fail_count
            ))
        })?;

        Ok(Self {
            scheme: row.scheme.parse()?,
            hostname: row.hostname,
            host: row.host,
            port,
            is_working: row.is_working,
            is_anonymous: row.is_anonymous,
            check_fail_count,
            response_latency: Duration::from_millis(to_count(row.response_ms, "response_ms")?),
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

fn latency_millis(record: &ProxyRecord) -> i64 {
    i64::try_from(record.response_latency.as_millis()).unwrap_or(i64::MAX)
}

/// Appends ` WHERE ...` for every set predicate of `filter`.
///
/// The staleness clause mirrors `FreshnessPolicy::is_stale`:
/// `age > base * failures` is written as `updated_at < as_of - base * failures`.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ProxyFilter) {
    let mut keyword = " WHERE ";

    if let Some(working) = filter.working {
        qb.push(keyword).push("is_working = ").push_bind(working);
        keyword = " AND ";
    }
    if let Some(anonymous) = filter.anonymous {
        qb.push(keyword).push("is_anonymous = ").push_bind(anonymous);
        keyword = " AND ";
    }
    if let Some(scheme) = filter.scheme {
        qb.push(keyword).push("scheme = ").push_bind(scheme.as_str());
        keyword = " AND ";
    }
    if let Some(clause) = filter.stale {
        qb.push(keyword);
        if !clause.stale {
            qb.push("NOT ");
        }
        qb.push("((is_working = 0 AND check_fail_count = 0) OR updated_at < ")
            .push_bind(to_millis(clause.as_of))
            .push(" - ")
            .push_bind(clause.policy.base_interval.num_milliseconds())
            .push(" * check_fail_count)");
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl ProxyStore for SqliteStore {
    #[instrument(skip(self, record), fields(hostname = %record.hostname))]
    async fn insert(&self, record: &ProxyRecord) -> Result<()> {
        sqlx::query(
            r"INSERT INTO proxies (
                hostname, scheme, host, port, is_working, is_anonymous,
                check_fail_count, response_ms, created_at, updated_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.hostname)
        .bind(record.scheme.as_str())
        .bind(&record.host)
        .bind(i64::from(record.port))
        .bind(record.is_working)
        .bind(record.is_anonymous)
        .bind(i64::from(record.check_fail_count))
        .bind(latency_millis(record))
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.updated_at))
        .execute(self.pool())
        .await
        .map_err(|err| match DirectoryError::from(err) {
            DirectoryError::ConstraintViolation(_) => DirectoryError::ConstraintViolation(format!(
                "proxy {} already exists",
                record.hostname
            )),
            other => other,
        })?;

        Ok(())
    }

    #[instrument(skip(self, record), fields(hostname = %record.hostname))]
    async fn update(&self, record: &ProxyRecord) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE proxies
              SET scheme = ?, host = ?, port = ?, is_working = ?, is_anonymous = ?,
                  check_fail_count = ?, response_ms = ?, updated_at = ?
              WHERE hostname = ?",
        )
        .bind(record.scheme.as_str())
        .bind(&record.host)
        .bind(i64::from(record.port))
        .bind(record.is_working)
        .bind(record.is_anonymous)
        .bind(i64::from(record.check_fail_count))
        .bind(latency_millis(record))
        .bind(to_millis(record.updated_at))
        .bind(&record.hostname)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound(record.hostname.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, hostname: &str) -> Result<ProxyRecord> {
        let row = sqlx::query_as::<_, ProxyRow>(r"SELECT * FROM proxies WHERE hostname = ?")
            .bind(hostname)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DirectoryError::NotFound(hostname.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn hostnames(&self, filter: &ProxyFilter) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT hostname FROM proxies");
        push_filter(&mut qb, filter);

        let hostnames = qb
            .build_query_scalar::<String>()
            .fetch_all(self.pool())
            .await?;
        Ok(hostnames)
    }

    #[instrument(skip(self))]
    async fn count(&self, filter: &ProxyFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM proxies");
        push_filter(&mut qb, filter);

        let count = qb.build_query_scalar::<i64>().fetch_one(self.pool()).await?;
        to_count(count, "count")
    }

    #[instrument(skip(self))]
    async fn sample(&self, filter: &ProxyFilter, n: usize) -> Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT hostname FROM proxies");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY random() LIMIT ").push_bind(limit_param(n));

        let hostnames = qb
            .build_query_scalar::<String>()
            .fetch_all(self.pool())
            .await?;
        Ok(hostnames)
    }

    #[instrument(skip(self))]
    async fn page(&self, offset: u64, limit: u64) -> Result<Vec<String>> {
        let hostnames = sqlx::query_scalar::<_, String>(
            r"SELECT hostname FROM proxies ORDER BY hostname LIMIT ? OFFSET ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await?;

        Ok(hostnames)
    }

    #[instrument(skip(self))]
    async fn port_frequencies(
        &self,
        filter: &ProxyFilter,
        limit: usize,
    ) -> Result<Vec<PortFrequency>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT port, COUNT(*) AS frequency FROM proxies");
        push_filter(&mut qb, filter);
        qb.push(" GROUP BY port ORDER BY frequency DESC LIMIT ")
            .push_bind(limit_param(limit));

        let rows = qb
            .build_query_as::<(i64, i64)>()
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|(port, frequency)| {
                Ok(PortFrequency {
                    port: u16::try_from(port)
                        .map_err(|_| DirectoryError::Store(format!("port out of range: {port}")))?,
                    frequency: to_count(frequency, "frequency")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn recent(&self, limit: usize) -> Result<Vec<String>> {
        let hostnames = sqlx::query_scalar::<_, String>(
            r"SELECT hostname FROM proxies ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit_param(limit))
        .fetch_all(self.pool())
        .await?;

        Ok(hostnames)
    }

    #[instrument(skip(self))]
    async fn distinct_hosts(&self, filter: &ProxyFilter) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT DISTINCT host FROM proxies");
        push_filter(&mut qb, filter);

        let hosts = qb
            .build_query_scalar::<String>()
            .fetch_all(self.pool())
            .await?;
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::proxy::freshness::FreshnessPolicy;
    use crate::proxy::models::{CheckOutcome, Proxy, ProxyType};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    async fn store() -> SqliteStore {
        SqliteStore::new(Database::new_in_memory().await.unwrap())
    }

    fn record(host: &str, port: u16, scheme: ProxyType) -> ProxyRecord {
        ProxyRecord::discovered(&Proxy::new(host.to_string(), port, scheme), now())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store().await;
        let mut rec = record("10.0.0.1", 8080, ProxyType::Socks5);
        rec.apply_check(&CheckOutcome::working(true, Duration::from_millis(420)), now());
        store.insert(&rec).await.unwrap();

        let loaded = store.get("socks5://10.0.0.1:8080").await.unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_constraint_violation() {
        let store = store().await;
        let rec = record("10.0.0.1", 8080, ProxyType::Http);
        store.insert(&rec).await.unwrap();

        let err = store.insert(&rec).await.unwrap_err();
        assert!(matches!(err, DirectoryError::ConstraintViolation(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = store().await;
        let err = store
            .update(&record("10.0.0.1", 8080, ProxyType::Http))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::NotFound("http://10.0.0.1:8080".to_string()));

        let err = store.get("http://10.0.0.9:1").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let store = store().await;
        let mut rec = record("10.0.0.1", 8080, ProxyType::Http);
        store.insert(&rec).await.unwrap();

        let later = now() + ChronoDuration::hours(3);
        rec.apply_check(&CheckOutcome::failed(Duration::from_secs(10)), later);
        rec.created_at = later;
        store.update(&rec).await.unwrap();

        let loaded = store.get(&rec.hostname).await.unwrap();
        assert_eq!(loaded.created_at, now());
        assert_eq!(loaded.updated_at, later);
        assert_eq!(loaded.check_fail_count, 1);
    }

    #[tokio::test]
    async fn test_filters_select_same_records_as_matches() {
        let store = store().await;
        let policy = FreshnessPolicy::default();
        let mut records = Vec::new();

        for (i, scheme) in ProxyType::all().into_iter().enumerate() {
            for j in 0..4u8 {
                let mut rec = record(&format!("10.0.{i}.{j}"), 3128, scheme);
                match j {
                    0 => {}
                    1 => rec.apply_check(&CheckOutcome::working(false, Duration::ZERO), now()),
                    2 => rec.apply_check(&CheckOutcome::working(true, Duration::ZERO), now()),
                    _ => {
                        rec.apply_check(&CheckOutcome::failed(Duration::ZERO), now());
                        rec.apply_check(&CheckOutcome::failed(Duration::ZERO), now());
                    }
                }
                store.insert(&rec).await.unwrap();
                records.push(rec);
            }
        }

        let filters = [
            ProxyFilter::new(),
            ProxyFilter::working_only(),
            ProxyFilter::anonymous_only(),
            ProxyFilter::new().scheme(ProxyType::Socks4),
            ProxyFilter::new().working(false).scheme(ProxyType::Http),
            ProxyFilter::new().stale_as_of(policy, now()),
            ProxyFilter::new().stale_as_of(policy, now() + ChronoDuration::days(7)),
            ProxyFilter::new().fresh_as_of(policy, now() + ChronoDuration::days(1)),
            // as_of inside a millisecond, right after the checks
            ProxyFilter::new().stale_as_of(policy, now() + ChronoDuration::microseconds(300)),
            ProxyFilter::new().fresh_as_of(policy, now() + ChronoDuration::microseconds(300)),
            ProxyFilter::new().stale_as_of(
                policy,
                now() + ChronoDuration::days(6) + ChronoDuration::microseconds(700),
            ),
        ];

        for filter in &filters {
            let mut expected: Vec<String> = records
                .iter()
                .filter(|r| filter.matches(r))
                .map(|r| r.hostname.clone())
                .collect();
            expected.sort();

            let mut actual = store.hostnames(filter).await.unwrap();
            actual.sort();
            assert_eq!(actual, expected, "filter {filter:?}");
            assert_eq!(store.count(filter).await.unwrap(), expected.len() as u64);
        }
    }

    #[tokio::test]
    async fn test_page_is_ordered_by_hostname() {
        let store = store().await;
        for host in ["10.0.0.3", "10.0.0.1", "10.0.0.2"] {
            store.insert(&record(host, 80, ProxyType::Http)).await.unwrap();
        }

        assert_eq!(
            store.page(0, 2).await.unwrap(),
            vec!["http://10.0.0.1:80", "http://10.0.0.2:80"]
        );
        assert_eq!(store.page(2, 2).await.unwrap(), vec!["http://10.0.0.3:80"]);
        assert!(store.page(4, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_and_distinct_hosts() {
        let store = store().await;
        let mut older = record("10.0.0.1", 80, ProxyType::Http);
        older.apply_check(&CheckOutcome::working(false, Duration::ZERO), now());
        let mut newer = record("10.0.0.1", 8080, ProxyType::Http);
        newer.apply_check(
            &CheckOutcome::working(false, Duration::ZERO),
            now() + ChronoDuration::minutes(5),
        );
        let dead = record("10.0.0.2", 80, ProxyType::Http);
        for rec in [&older, &newer, &dead] {
            store.insert(rec).await.unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent[0], newer.hostname);
        assert_eq!(recent.len(), 2);

        let hosts = store.distinct_hosts(&ProxyFilter::working_only()).await.unwrap();
        assert_eq!(hosts, vec!["10.0.0.1"]);
    }
}

//! Link table queries

use super::{from_millis, to_count, to_millis, SqliteStore};
use crate::error::{DirectoryError, Result};
use crate::links::LinkRecord;
use crate::store::{LinkFilter, LinkStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, FromRow)]
struct LinkRow {
    hostname: String,
    should_iterate: bool,
    crawl_count: i64,
    updated_at: i64,
}

impl TryFrom<LinkRow> for LinkRecord {
    type Error = DirectoryError;

    fn try_from(row: LinkRow) -> Result<Self> {
        Ok(Self {
            hostname: row.hostname,
            should_iterate: row.should_iterate,
            crawl_count: to_count(row.crawl_count, "crawl_count")?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    #[instrument(skip(self, link), fields(hostname = %link.hostname))]
    async fn upsert_link(&self, link: &LinkRecord) -> Result<()> {
        sqlx::query(
            r"INSERT INTO links (hostname, should_iterate, crawl_count, updated_at)
              VALUES (?, ?, ?, ?)
              ON CONFLICT (hostname) DO UPDATE SET
                  should_iterate = excluded.should_iterate,
                  crawl_count = excluded.crawl_count,
                  updated_at = excluded.updated_at",
        )
        .bind(&link.hostname)
        .bind(link.should_iterate)
        .bind(i64::try_from(link.crawl_count).unwrap_or(i64::MAX))
        .bind(to_millis(link.updated_at))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_link(&self, hostname: &str) -> Result<LinkRecord> {
        let row = sqlx::query_as::<_, LinkRow>(r"SELECT * FROM links WHERE hostname = ?")
            .bind(hostname)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DirectoryError::NotFound(hostname.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn link_hostnames(&self, filter: &LinkFilter) -> Result<Vec<String>> {
        let query = match filter {
            LinkFilter::All => sqlx::query_scalar::<_, String>(r"SELECT hostname FROM links"),
            LinkFilter::Iterable => sqlx::query_scalar::<_, String>(
                r"SELECT hostname FROM links WHERE should_iterate = 1",
            ),
            LinkFilter::StaleAsOf { policy, as_of } => {
                let cutoff =
                    to_millis(*as_of).saturating_sub(policy.recrawl_window.num_milliseconds());
                sqlx::query_scalar::<_, String>(
                    r"SELECT hostname FROM links WHERE should_iterate = 1 AND updated_at < ?",
                )
                .bind(cutoff)
            }
        };

        Ok(query.fetch_all(self.pool()).await?)
    }

    #[instrument(skip(self))]
    async fn record_crawl(&self, hostname: &str, now: DateTime<Utc>) -> Result<LinkRecord> {
        let row = sqlx::query_as::<_, LinkRow>(
            r"UPDATE links
              SET crawl_count = crawl_count + 1, updated_at = ?
              WHERE hostname = ?
              RETURNING *",
        )
        .bind(to_millis(now))
        .bind(hostname)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DirectoryError::NotFound(hostname.to_string())),
        }
    }
}

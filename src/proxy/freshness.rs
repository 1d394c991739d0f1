//! Staleness rules deciding when a record should be verified or crawled again

use crate::links::LinkRecord;
use crate::proxy::models::ProxyRecord;
use chrono::{DateTime, Duration, Utc};

/// Base backoff between verifications of a failing proxy
pub const DEFAULT_BASE_INTERVAL_HOURS: i64 = 72;

/// Age after which an iterable link is due for another crawl
pub const DEFAULT_RECRAWL_WINDOW_HOURS: i64 = 1;

/// Pure staleness predicates for proxy and link records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Multiplied by a record's consecutive failures to get its backoff window
    pub base_interval: Duration,
    /// Minimum age of an iterable link before it is crawled again
    pub recrawl_window: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::hours(DEFAULT_BASE_INTERVAL_HOURS),
            recrawl_window: Duration::hours(DEFAULT_RECRAWL_WINDOW_HOURS),
        }
    }
}

impl FreshnessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_interval(mut self, base_interval: Duration) -> Self {
        self.base_interval = base_interval;
        self
    }

    pub fn with_recrawl_window(mut self, recrawl_window: Duration) -> Self {
        self.recrawl_window = recrawl_window;
        self
    }

    /// `base_interval × check_fail_count`, saturating at [`Duration::MAX`]
    pub fn backoff_window(&self, check_fail_count: u32) -> Duration {
        i32::try_from(check_fail_count)
            .ok()
            .and_then(|count| self.base_interval.checked_mul(count))
            .unwrap_or(Duration::MAX)
    }

    /// [`Self::backoff_window`] in whole milliseconds, the unit records are stored in
    pub fn backoff_millis(&self, check_fail_count: u32) -> i64 {
        self.base_interval
            .num_milliseconds()
            .saturating_mul(i64::from(check_fail_count))
    }

    /// Whether a proxy is due for re-verification at `now`.
    ///
    /// A record that was never verified successfully nor failed (not working,
    /// zero failures) is due immediately. Otherwise it is due once its age
    /// exceeds the backoff window, so a working record (zero failures) is due
    /// as soon as any time has passed and a record that failed N times waits
    /// N base intervals.
    ///
    /// Ages are compared in whole milliseconds so the result matches the
    /// store's SQL filter for any `now`.
    pub fn is_stale(&self, record: &ProxyRecord, now: DateTime<Utc>) -> bool {
        if !record.is_working && record.check_fail_count == 0 {
            return true;
        }
        age_millis(record.updated_at, now) > self.backoff_millis(record.check_fail_count)
    }

    /// Whether an iterable link is due for another crawl at `now`
    pub fn is_link_stale(&self, link: &LinkRecord, now: DateTime<Utc>) -> bool {
        link.should_iterate
            && age_millis(link.updated_at, now) > self.recrawl_window.num_milliseconds()
    }
}

fn age_millis(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.timestamp_millis().saturating_sub(updated_at.timestamp_millis())
}

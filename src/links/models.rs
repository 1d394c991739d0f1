//! Link data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A crawl target in the frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub hostname: String,
    /// Whether the host should be crawled again
    pub should_iterate: bool,
    pub crawl_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl LinkRecord {
    pub fn new(hostname: String, should_iterate: bool, now: DateTime<Utc>) -> Self {
        Self {
            hostname,
            should_iterate,
            crawl_count: 0,
            updated_at: now,
        }
    }
}

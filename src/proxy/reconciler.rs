//! Reconciliation of externally discovered hostnames against the directory
//!
//! The directory can hold millions of rows, so it is never loaded whole.
//! Instead the key space is read in fixed-size pages and every known hostname
//! is struck from a working copy of the candidate set.
//!
//! A page that fails to load aborts the whole reconciliation. Skipping it
//! would let hostnames on that page be reported as unknown and inserted twice.
//!
//! The page count is taken from a row count before the scan. Rows written
//! while the scan runs can push known hostnames past that last page, so
//! reading continues for as long as the previous page came back full.

use crate::error::{log_failure, DirectoryError, Result};
use crate::store::{ProxyFilter, ProxyStore};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Rows read per page
pub const DEFAULT_CHUNK_SIZE: u64 = 100_000;

/// Pages needed to cover `total` rows, `⌈total / chunk_size⌉`
pub fn page_count(total: u64, chunk_size: u64) -> u64 {
    total.div_ceil(chunk_size.max(1))
}

/// Finds candidate hostnames the directory does not know yet
pub struct Reconciler<S> {
    store: S,
    chunk_size: u64,
    log_errors: bool,
}

impl<S: ProxyStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_errors: false,
        }
    }

    /// Rows per page; zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The subset of `candidates` absent from the directory.
    ///
    /// An empty candidate set is an [`DirectoryError::EmptyInput`] error, so
    /// "nothing to check" is distinguishable from "nothing unknown".
    #[instrument(skip_all, fields(chunk_size = self.chunk_size))]
    pub async fn find_unknown<I>(&self, candidates: I) -> Result<HashSet<String>>
    where
        I: IntoIterator<Item = String>,
    {
        let candidates: HashSet<String> = candidates.into_iter().collect();
        let result = self.scan(candidates).await;
        log_failure(self.log_errors, "find_unknown", result)
    }

    async fn scan(&self, mut remaining: HashSet<String>) -> Result<HashSet<String>> {
        if remaining.is_empty() {
            return Err(DirectoryError::EmptyInput);
        }

        let total = self.store.count(&ProxyFilter::new()).await?;
        let pages = page_count(total, self.chunk_size);
        debug!(candidates = remaining.len(), total, pages, "reconciling candidates");

        let mut page = 0;
        let mut last_page_full = false;
        while page < pages || last_page_full {
            let offset = page.saturating_mul(self.chunk_size);
            let hostnames = self.store.page(offset, self.chunk_size).await?;
            last_page_full = hostnames.len() as u64 >= self.chunk_size;
            for hostname in &hostnames {
                remaining.remove(hostname);
            }
            debug!(page, rows = hostnames.len(), remaining = remaining.len(), "page scanned");
            page += 1;
        }

        Ok(remaining)
    }
}

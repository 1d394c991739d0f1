//! Crawl frontier tracking
//!
//! Hosts the crawler walks are kept in a small directory of their own: whether
//! a host should be crawled again, how often it has been, and when it was
//! last touched.

pub mod models;
pub mod tracker;

pub use models::LinkRecord;
pub use tracker::FrontierTracker;

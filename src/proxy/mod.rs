//! Proxy directory module
//!
//! This module provides:
//! - Record types and the verification state transition
//! - The freshness policy deciding when a proxy is due for re-verification
//! - Selection queries for rotation clients
//! - Reconciliation of discovered lists against the directory
//! - Parsing of discovered proxy lists

pub mod directory;
pub mod freshness;
pub mod models;
pub mod parser;
pub mod reconciler;
pub mod selector;

pub use directory::{ImportReport, ProxyDirectory};
pub use freshness::FreshnessPolicy;
pub use models::{CheckOutcome, Proxy, ProxyRecord, ProxyType};
pub use parser::ProxyParser;
pub use reconciler::Reconciler;
pub use selector::{DirectoryStats, ProxySelector, SchemeStats};

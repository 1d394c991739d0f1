//! Proxy data models

use crate::error::DirectoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Proxy type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Scheme string as stored in the directory
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }

    pub fn all() -> [ProxyType; 4] {
        [
            ProxyType::Http,
            ProxyType::Https,
            ProxyType::Socks4,
            ProxyType::Socks5,
        ]
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(DirectoryError::InvalidInput(format!(
                "unknown proxy scheme '{s}', expected http, https, socks4 or socks5"
            ))),
        }
    }
}

/// A proxy endpoint, identified by its `scheme://host:port` hostname
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
}

impl Proxy {
    pub fn new(host: String, port: u16, proxy_type: ProxyType) -> Self {
        Self {
            host,
            port,
            proxy_type,
        }
    }

    /// Directory key in `scheme://host:port` form
    pub fn hostname(&self) -> String {
        format!("{}://{}:{}", self.proxy_type, self.host, self.port)
    }

    /// Decompose a directory key back into its parts.
    ///
    /// Port zero and a missing scheme are rejected.
    pub fn from_hostname(hostname: &str) -> Result<Self, DirectoryError> {
        let invalid = || DirectoryError::InvalidInput(format!("malformed hostname '{hostname}'"));

        let (scheme, rest) = hostname.split_once("://").ok_or_else(invalid)?;
        let proxy_type: ProxyType = scheme.parse()?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || port == 0 {
            return Err(invalid());
        }

        Ok(Self::new(host.to_string(), port, proxy_type))
    }

    /// Get the proxy string in IP:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname())
    }
}

/// Result of one external verification probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub working: bool,
    pub anonymous: bool,
    pub latency: Duration,
}

impl CheckOutcome {
    pub fn working(anonymous: bool, latency: Duration) -> Self {
        Self {
            working: true,
            anonymous,
            latency,
        }
    }

    pub fn failed(latency: Duration) -> Self {
        Self {
            working: false,
            anonymous: false,
            latency,
        }
    }
}

/// Stored state of a proxy in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub hostname: String,
    pub scheme: ProxyType,
    pub host: String,
    pub port: u16,
    pub is_working: bool,
    pub is_anonymous: bool,
    /// Consecutive failed verifications; zeroed by a successful one.
    pub check_fail_count: u32,
    pub response_latency: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProxyRecord {
    /// A freshly discovered, not yet verified record
    pub fn discovered(proxy: &Proxy, now: DateTime<Utc>) -> Self {
        Self {
            hostname: proxy.hostname(),
            scheme: proxy.proxy_type,
            host: proxy.host.clone(),
            port: proxy.port,
            is_working: false,
            is_anonymous: false,
            check_fail_count: 0,
            response_latency: Duration::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn proxy(&self) -> Proxy {
        Proxy::new(self.host.clone(), self.port, self.scheme)
    }

    /// Fold a verification result into the record.
    ///
    /// Success clears the failure counter; failure bumps it by one and drops
    /// the anonymity flag. `updated_at` is always refreshed.
    pub fn apply_check(&mut self, outcome: &CheckOutcome, now: DateTime<Utc>) {
        self.is_working = outcome.working;
        if outcome.working {
            self.is_anonymous = outcome.anonymous;
            self.check_fail_count = 0;
        } else {
            self.is_anonymous = false;
            self.check_fail_count = self.check_fail_count.saturating_add(1);
        }
        self.response_latency = outcome.latency;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_proxy_hostname() {
        let proxy = Proxy::new("127.0.0.1".to_string(), 8080, ProxyType::Http);
        assert_eq!(proxy.hostname(), "http://127.0.0.1:8080");
        assert_eq!(proxy.to_simple_string(), "127.0.0.1:8080");
        assert_eq!(proxy.to_string(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_from_hostname() {
        let proxy = Proxy::from_hostname("socks5://10.0.0.1:1080").unwrap();
        assert_eq!(proxy.host, "10.0.0.1");
        assert_eq!(proxy.port, 1080);
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);
        assert_eq!(proxy.hostname(), "socks5://10.0.0.1:1080");
    }

    #[test]
    fn test_from_hostname_rejects_malformed() {
        for bad in [
            "10.0.0.1:1080",
            "ftp://10.0.0.1:21",
            "http://10.0.0.1",
            "http://10.0.0.1:0",
            "http://:8080",
            "http://10.0.0.1:99999",
        ] {
            assert!(
                matches!(Proxy::from_hostname(bad), Err(DirectoryError::InvalidInput(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_proxy_type_parse() {
        assert_eq!("HTTPS".parse::<ProxyType>().unwrap(), ProxyType::Https);
        assert_eq!("socks4".parse::<ProxyType>().unwrap(), ProxyType::Socks4);
        assert!("gopher".parse::<ProxyType>().is_err());
    }

    #[test]
    fn test_discovered_record() {
        let proxy = Proxy::new("192.168.1.1".to_string(), 3128, ProxyType::Https);
        let record = ProxyRecord::discovered(&proxy, at(1));
        assert_eq!(record.hostname, "https://192.168.1.1:3128");
        assert!(!record.is_working);
        assert_eq!(record.check_fail_count, 0);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.proxy(), proxy);
    }

    #[test]
    fn test_failed_check_increments_counter() {
        let proxy = Proxy::new("192.168.1.1".to_string(), 3128, ProxyType::Http);
        let mut record = ProxyRecord::discovered(&proxy, at(1));

        record.apply_check(&CheckOutcome::failed(Duration::from_secs(10)), at(2));
        assert_eq!(record.check_fail_count, 1);
        assert!(!record.is_working);
        assert_eq!(record.updated_at, at(2));

        record.apply_check(&CheckOutcome::failed(Duration::from_secs(10)), at(3));
        assert_eq!(record.check_fail_count, 2);
        assert_eq!(record.created_at, at(1));
    }

    #[test]
    fn test_successful_check_resets_counter() {
        let proxy = Proxy::new("192.168.1.1".to_string(), 3128, ProxyType::Http);
        let mut record = ProxyRecord::discovered(&proxy, at(1));
        record.check_fail_count = 5;

        let outcome = CheckOutcome::working(true, Duration::from_millis(250));
        record.apply_check(&outcome, at(4));
        assert!(record.is_working);
        assert!(record.is_anonymous);
        assert_eq!(record.check_fail_count, 0);
        assert_eq!(record.response_latency, Duration::from_millis(250));
        assert_eq!(record.updated_at, at(4));
    }

    #[test]
    fn test_failed_check_clears_anonymity() {
        let proxy = Proxy::new("192.168.1.1".to_string(), 3128, ProxyType::Http);
        let mut record = ProxyRecord::discovered(&proxy, at(1));
        record.apply_check(&CheckOutcome::working(true, Duration::ZERO), at(2));
        record.apply_check(&CheckOutcome::failed(Duration::ZERO), at(3));
        assert!(!record.is_anonymous);
        assert!(!record.is_working);
    }
}

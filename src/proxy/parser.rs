//! Proxy list parser turning discovered lists into reconciliation candidates

use crate::proxy::models::{Proxy, ProxyType};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// `scheme://[user:pass@]host:port[/]`
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|socks[45])://(?:[^:@/]+:[^@/]+@)?([^:@/]+):(\d+)/?$")
        .expect("Invalid proxy URL regex")
});

/// `user:pass@host:port`
static AUTH_AT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^:@]+:[^@]+@([^:@]+):(\d+)$").expect("Invalid user:pass@host:port regex")
});

/// IP:PORT pairs embedded in arbitrary text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Parser for externally discovered proxy lists.
///
/// Credentials are accepted in the input but dropped: a directory record is
/// identified by scheme, host and port only.
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - IP:PORT:USER:PASS
    /// - USER:PASS@IP:PORT
    /// - scheme://IP:PORT
    /// - scheme://USER:PASS@IP:PORT
    pub fn parse_line(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        Self::parse_url_format(line)
            .or_else(|| Self::parse_auth_at_format(line, default_type))
            .or_else(|| Self::parse_colon_format(line, default_type))
    }

    fn parse_url_format(line: &str) -> Option<Proxy> {
        let caps = URL_REGEX.captures(line)?;
        let proxy_type: ProxyType = caps[1].parse().ok()?;
        let port = Self::parse_port(&caps[3])?;
        Some(Proxy::new(caps[2].to_string(), port, proxy_type))
    }

    fn parse_auth_at_format(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let caps = AUTH_AT_REGEX.captures(line)?;
        let port = Self::parse_port(&caps[2])?;
        Some(Proxy::new(caps[1].to_string(), port, default_type))
    }

    /// IP:PORT or IP:PORT:USER:PASS
    fn parse_colon_format(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let parts: Vec<&str> = line.split(':').collect();
        if !matches!(parts.len(), 2 | 4) || parts[0].is_empty() {
            return None;
        }
        let port = Self::parse_port(parts[1])?;
        Some(Proxy::new(parts[0].to_string(), port, default_type))
    }

    fn parse_port(s: &str) -> Option<u16> {
        s.parse::<u16>().ok().filter(|port| *port != 0)
    }

    /// Extract IPv4:PORT pairs from free text such as an HTML page
    pub fn extract_ip_ports(content: &str, default_type: ProxyType) -> Vec<Proxy> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                let valid_ip = host.split('.').all(|part| part.parse::<u8>().is_ok());
                if !valid_ip {
                    return None;
                }
                let port = Self::parse_port(cap.get(2)?.as_str())?;
                Some(Proxy::new(host.to_string(), port, default_type))
            })
            .collect()
    }

    /// Parse proxies from a string (multiple lines).
    ///
    /// Falls back to regex extraction when no line parses on its own.
    /// The result holds each hostname once, in first-seen order.
    pub fn parse_string(content: &str, default_type: ProxyType) -> Vec<Proxy> {
        let mut proxies: Vec<Proxy> = content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type))
            .collect();

        if proxies.is_empty() {
            proxies = Self::extract_ip_ports(content, default_type);
        }

        let mut seen = HashSet::new();
        proxies.retain(|proxy| seen.insert(proxy.hostname()));
        proxies
    }

    /// Parse proxies from a file
    pub fn parse_file<P: AsRef<Path>>(path: P, default_type: ProxyType) -> Result<Vec<Proxy>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content, default_type))
    }

    /// Write one hostname per line
    pub fn save_hostnames<P: AsRef<Path>>(hostnames: &[String], path: P) -> Result<()> {
        let mut content = hostnames.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(path, content)?;
        Ok(())
    }
}

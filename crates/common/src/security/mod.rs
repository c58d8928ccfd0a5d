//! Connection-level policy gate for the SMTP receiver (spec §4.5): per-IP
//! concurrent connection caps, an explicit blocklist, and a leaky-bucket
//! connection-rate limit. DNSBL consultation lives in the `dns`/`smtp`
//! crates, which call into [`ConnectionPolicy::is_ip_allowed`] alongside
//! their own zone lookups.
//!
//! There's no user authentication in this core, so the brute-force/audit
//! machinery a general-purpose security module would carry is dropped —
//! only the parts that map onto an anonymous-sender SMTP front door remain.

pub mod rate_limiting;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::{debug, warn};

use rate_limiting::{IpRateLimiter, RateLimitConfig};

/// Connection policy configuration.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Maximum message size in bytes, enforced at the SMTP DATA stage.
    pub max_request_size: usize,
    /// Maximum number of concurrent connections allowed per source IP.
    pub max_connections_per_ip: u32,
    /// Leaky-bucket configuration for per-IP connection rate limiting.
    pub rate_limit: RateLimitConfig,
    /// IP addresses rejected outright, independent of DNSBL results.
    pub blocked_ips: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_request_size: 25 * 1024 * 1024,
            max_connections_per_ip: 20,
            rate_limit: RateLimitConfig {
                algorithm: rate_limiting::RateLimitAlgorithm::LeakyBucket,
                ..RateLimitConfig::default()
            },
            blocked_ips: Vec::new(),
        }
    }
}

/// Gatekeeper consulted once per inbound connection, before the greeting
/// banner is sent (spec §4.5's connection gate).
pub struct ConnectionPolicy {
    config: SecurityConfig,
    ip_connections: Arc<RwLock<HashMap<String, u32>>>,
    rate_limiter: IpRateLimiter,
}

impl ConnectionPolicy {
    pub fn new(config: SecurityConfig) -> Self {
        let rate_limiter = IpRateLimiter::new(config.rate_limit.clone());
        Self {
            config,
            ip_connections: Arc::new(RwLock::new(HashMap::new())),
            rate_limiter,
        }
    }

    /// Checks the blocklist, the per-IP concurrent connection cap, and the
    /// leaky-bucket connection rate limit, in that order. Does not register
    /// the connection — call [`Self::register_connection`] once accepted.
    pub fn is_ip_allowed(&self, ip: &str) -> bool {
        if self.config.blocked_ips.iter().any(|blocked| blocked == ip) {
            warn!(ip, "connection rejected: blocked IP");
            return false;
        }

        let connections = self.ip_connections.read().unwrap();
        if let Some(&count) = connections.get(ip) {
            if count >= self.config.max_connections_per_ip {
                warn!(ip, count, "connection rejected: per-IP connection cap reached");
                return false;
            }
        }
        drop(connections);

        if !self.rate_limiter.check_rate_limit(ip.to_string()).allowed {
            warn!(ip, "connection rejected: rate limited");
            return false;
        }

        true
    }

    pub fn register_connection(&self, ip: &str) {
        debug!(ip, "registering connection");
        let mut connections = self.ip_connections.write().unwrap();
        *connections.entry(ip.to_string()).or_insert(0) += 1;
    }

    pub fn unregister_connection(&self, ip: &str) {
        debug!(ip, "unregistering connection");
        let mut connections = self.ip_connections.write().unwrap();
        if let Some(count) = connections.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(ip);
            }
        }
    }

    pub fn get_config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn cleanup(&self) {
        self.rate_limiter.cleanup();
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_blocking() {
        let mut config = SecurityConfig::default();
        config.blocked_ips.push("192.168.1.100".to_string());

        let policy = ConnectionPolicy::new(config);

        assert!(!policy.is_ip_allowed("192.168.1.100"));
        assert!(policy.is_ip_allowed("192.168.1.101"));
    }

    #[test]
    fn test_connection_limits() {
        let mut config = SecurityConfig::default();
        config.max_connections_per_ip = 2;

        let policy = ConnectionPolicy::new(config);
        let ip = "192.168.1.1";

        assert!(policy.is_ip_allowed(ip));
        policy.register_connection(ip);
        assert!(policy.is_ip_allowed(ip));
        policy.register_connection(ip);

        assert!(!policy.is_ip_allowed(ip));

        policy.unregister_connection(ip);
        assert!(policy.is_ip_allowed(ip));
    }
}

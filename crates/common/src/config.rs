//! Static process configuration (spec §6), loaded once at startup from a
//! TOML file and handed out by `Arc` reference to every component's
//! constructor — this core's administrative layer is out of scope, so there
//! is no mutable config path through the Store.

use std::{net::SocketAddr, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTlsMode {
    Off,
    Opportunistic,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Direct,
    Relay,
    Hybrid,
}

fn default_max_message_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_max_connections_total() -> u32 {
    2048
}

fn default_max_connections_per_ip() -> u32 {
    20
}

fn default_pregreet_delay_ms() -> u64 {
    200
}

fn default_starttls_mode() -> StartTlsMode {
    StartTlsMode::Opportunistic
}

fn default_delivery_mode() -> DeliveryMode {
    DeliveryMode::Direct
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retry_deadline_secs() -> u64 {
    48 * 3600
}

fn default_dkim_key_size() -> u32 {
    2048
}

fn default_verification_refresh_interval_secs() -> u64 {
    24 * 3600
}

fn default_recovery_window_secs() -> u64 {
    600
}

fn default_forwarder_queue_capacity() -> u32 {
    10_000
}

/// Process configuration, deserialized from the TOML file named by `--config`
/// (or `FORWARDCORE_CONFIG`). Every field here corresponds to a row in
/// spec §6's configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP address for the SMTP Receiver.
    pub listen_address: SocketAddr,
    /// Announced in EHLO, used in `Received` headers and PTR consistency.
    pub hostname: String,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u64,
    #[serde(default = "default_max_connections_total")]
    pub max_connections_total: u32,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
    #[serde(default = "default_pregreet_delay_ms")]
    pub pregreet_delay_ms: u64,
    #[serde(default)]
    pub dnsbl_zones: Vec<String>,
    #[serde(default = "default_starttls_mode")]
    pub starttls_mode: StartTlsMode,

    #[serde(default = "default_delivery_mode")]
    pub delivery_mode: DeliveryMode,
    pub relay_host: Option<String>,
    pub relay_port: Option<u16>,
    pub relay_user: Option<String>,
    pub relay_pass: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_deadline_secs")]
    pub retry_deadline_secs: u64,

    /// HMAC key for bounce address encoding (spec §4.6). Required — a
    /// missing or empty secret is a configuration error, not a default.
    pub bounce_token_secret: String,

    #[serde(default = "default_dkim_key_size")]
    pub dkim_key_size: u32,
    #[serde(default = "default_verification_refresh_interval_secs")]
    pub verification_refresh_interval_secs: u64,
    #[serde(default = "default_recovery_window_secs")]
    pub recovery_window_secs: u64,
    /// Bound on the Forwarder's internal queue (spec §5: "bounded, with
    /// backpressure"). A `RCPT TO` arriving once this is exhausted gets a
    /// `452` rather than growing the queue unboundedly.
    #[serde(default = "default_forwarder_queue_capacity")]
    pub forwarder_queue_capacity: u32,

    /// Path to a TLS certificate chain (PEM), required unless
    /// `starttls_mode` is `off`.
    pub tls_cert_path: Option<String>,
    /// Path to the matching TLS private key (PEM).
    pub tls_key_path: Option<String>,
}

impl Config {
    pub fn from_toml_str(input: &str) -> CommonResult<Self> {
        let config: Config = toml::from_str(input)
            .map_err(|e| CommonError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CommonResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CommonError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> CommonResult<()> {
        if self.bounce_token_secret.is_empty() {
            return Err(CommonError::config_with_key(
                "bounce_token_secret must not be empty",
                "bounce_token_secret",
            ));
        }
        if self.starttls_mode != StartTlsMode::Off
            && (self.tls_cert_path.is_none() || self.tls_key_path.is_none())
        {
            return Err(CommonError::config(
                "tls_cert_path and tls_key_path are required unless starttls_mode is \"off\"",
            ));
        }
        if self.delivery_mode != DeliveryMode::Direct && self.relay_host.is_none() {
            return Err(CommonError::config_with_key(
                "relay_host is required for relay/hybrid delivery_mode",
                "relay_host",
            ));
        }
        Ok(())
    }

    pub fn retry_deadline(&self) -> Duration {
        Duration::from_secs(self.retry_deadline_secs)
    }

    pub fn verification_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.verification_refresh_interval_secs)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }

    pub fn pregreet_delay(&self) -> Duration {
        Duration::from_millis(self.pregreet_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        listen_address = "0.0.0.0:25"
        hostname = "mail.example.com"
        bounce_token_secret = "s3cr3t"
        starttls_mode = "off"
    "#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.max_message_bytes, default_max_message_bytes());
        assert_eq!(config.delivery_mode, DeliveryMode::Direct);
        assert_eq!(config.dkim_key_size, 2048);
        assert_eq!(config.forwarder_queue_capacity, default_forwarder_queue_capacity());
    }

    #[test]
    fn rejects_empty_bounce_secret() {
        let toml = r#"
            listen_address = "0.0.0.0:25"
            hostname = "mail.example.com"
            bounce_token_secret = ""
            starttls_mode = "off"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn requires_tls_paths_unless_starttls_off() {
        let toml = r#"
            listen_address = "0.0.0.0:25"
            hostname = "mail.example.com"
            bounce_token_secret = "s3cr3t"
            starttls_mode = "required"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn requires_relay_host_for_relay_mode() {
        let toml = r#"
            listen_address = "0.0.0.0:25"
            hostname = "mail.example.com"
            bounce_token_secret = "s3cr3t"
            starttls_mode = "off"
            delivery_mode = "relay"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }
}

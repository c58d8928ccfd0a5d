//! Failure taxonomy for the Delivery Router (spec §4.7, §7): every outbound
//! attempt collapses to delivered, transient, or permanent, the same
//! three-way split the Forwarder's retry policy branches on.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DeliveryError {
    #[error("no MX records for domain")]
    NoMxRecords,
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("all MX hosts exhausted without a successful connection")]
    MxExhausted,
    #[error("network error: {0}")]
    Network(String),
    #[error("next hop rejected with permanent error: {0}")]
    Permanent(String),
    #[error("relay is not configured")]
    RelayNotConfigured,
}

impl DeliveryError {
    /// `2xx` delivers, `4xx`/network errors are transient and retried,
    /// `5xx` (other than the 421-class covered by `Network`) is permanent
    /// (spec §4.7 classification table).
    pub fn is_transient(&self) -> bool {
        !matches!(self, DeliveryError::Permanent(_) | DeliveryError::RelayNotConfigured)
    }
}

/// Classifies a `mail-send` client error into the transient/permanent split
/// spec §4.7 requires, mirroring the classification a forwarding gateway
/// built on this crate performs on its own outbound hop.
pub fn classify_mail_send_error(error: &mail_send::Error) -> DeliveryError {
    use mail_send::Error as E;
    match error {
        E::Io(e) => DeliveryError::Network(e.to_string()),
        E::Tls(e) => DeliveryError::Network(e.to_string()),
        E::Timeout => DeliveryError::Network("timed out".into()),
        E::InvalidTLSName => DeliveryError::Network("invalid TLS server name".into()),
        E::Base64(_) => DeliveryError::Network("malformed base64 in AUTH exchange".into()),
        E::UnparseableReply => DeliveryError::Network("unparseable SMTP reply".into()),
        E::MissingCredentials => DeliveryError::Permanent("relay credentials not configured".into()),
        E::MissingMailFrom => DeliveryError::Permanent("message is missing MAIL FROM".into()),
        E::MissingRcptTo => DeliveryError::Permanent("message is missing RCPT TO".into()),
        E::UnsupportedAuthMechanism => DeliveryError::Permanent("relay requires an unsupported AUTH mechanism".into()),
        E::MissingStartTls => DeliveryError::Permanent("server does not advertise STARTTLS".into()),
        E::Auth(_) => DeliveryError::Network("AUTH exchange failed".into()),
        E::UnexpectedReply(response) | E::AuthenticationFailed(response) => {
            // 4xx-class replies are `TransientNegativeCompletion`; everything
            // else that reaches us as a rejection is a permanent 5xx (spec
            // §4.7: "4xx -> transient; 5xx -> permanent").
            if response.severity() == smtp_proto::Severity::TransientNegativeCompletion {
                DeliveryError::Network(format!("{response:?}"))
            } else {
                DeliveryError::Permanent(format!("{response:?}"))
            }
        }
    }
}

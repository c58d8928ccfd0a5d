//! Per-connection session state (spec §4.5): the state machine, the
//! envelope accumulated across `MAIL FROM`/`RCPT TO`, and the resolved
//! recipients carried into `DATA`.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use store::AliasLookup;

/// States of the per-connection state machine (spec §4.5 diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connected,
    Greeted,
    Envelope,
    Receiving,
}

/// A recipient resolved against the Store at `RCPT TO` time — either a
/// specific alias or a domain catch-all (spec §4.6 "Catch-all semantics").
#[derive(Debug, Clone)]
pub enum ResolvedRecipient {
    Alias {
        address: String,
        lookup: AliasLookup,
    },
    CatchAll {
        address: String,
        domain_id: String,
        domain_name: String,
        organization_id: String,
        forward_to: String,
    },
}

impl ResolvedRecipient {
    pub fn address(&self) -> &str {
        match self {
            ResolvedRecipient::Alias { address, .. } => address,
            ResolvedRecipient::CatchAll { address, .. } => address,
        }
    }
}

/// Envelope accumulated between `MAIL FROM` and `DATA` hand-off.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub mail_from: Option<String>,
    pub declared_size: Option<u64>,
    pub recipients: Vec<ResolvedRecipient>,
}

impl Envelope {
    pub fn reset(&mut self) {
        *self = Envelope::default();
    }
}

/// Identity of the connected client, fixed for the lifetime of the
/// connection and used for rate limiting, DNSBL, and `Received:` headers.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub remote_ip: IpAddr,
    pub helo_domain: Option<String>,
    pub connected_at: DateTime<Utc>,
}

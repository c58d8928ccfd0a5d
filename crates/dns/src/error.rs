use thiserror::Error;

/// Outcome of a DNS query, collapsed from `hickory_resolver`'s richer error
/// surface into the taxonomy spec §4.2/§7 actually branches on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("domain does not exist")]
    NxDomain,
    #[error("name server returned SERVFAIL")]
    ServFail,
    #[error("query timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

impl DnsError {
    /// SERVFAIL, timeout, and transport errors are worth retrying; NXDOMAIN
    /// is authoritative and never transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DnsError::NxDomain)
    }
}

pub type DnsResult<T> = Result<T, DnsError>;

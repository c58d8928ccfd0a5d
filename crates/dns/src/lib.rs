//! DNS Resolver component (spec §4.2): MX/A/AAAA/TXT/PTR lookups and DNSBL
//! checks, with a coalescing, negative-result-aware cache in front of the
//! wire resolver so a burst of connections for the same domain triggers one
//! query instead of N.

pub mod error;
pub mod resolver;

pub use error::{DnsError, DnsResult};
pub use resolver::{CachedResolver, DnsResolver, MxRecord, TestResolver};

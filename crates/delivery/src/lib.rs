//! Delivery Router (spec §4.7): turns a rewritten, signed message into an
//! outbound SMTP conversation — direct-to-MX, through a configured relay, or
//! a hybrid of both — with per-destination concurrency limits and short-lived
//! connection reuse.

pub mod backend;
pub mod error;
pub mod pool;
pub mod router;

pub use backend::DeliveryBackend;
pub use error::DeliveryError;
pub use pool::ConnectionPool;
pub use router::{PreparedMessage, RouteTaken, Router, DEFAULT_CONCURRENCY_PER_DOMAIN};

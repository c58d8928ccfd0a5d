//! SMTP Receiver (spec §4.5): a TCP server implementing the RFC 5321 subset
//! needed to accept mail for managed aliases and hand completed messages to
//! the Forwarder. Connection-level gating (pregreet, DNSBL, per-IP policy)
//! happens before a session is constructed; the session itself only
//! dispatches parsed commands against the Store and the `ForwardingSink`.

pub mod connect;
pub mod message;
pub mod parser;
pub mod response;
pub mod server;
pub mod session;
pub mod state;

pub use response::Response;
pub use server::{Listener, ListenerConfig};
pub use session::Session;

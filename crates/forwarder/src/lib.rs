//! Forwarder (spec §4.6): given an `accepted` Message Record and its raw
//! bytes, rewrites headers for the outbound hop, signs with DKIM when a key
//! is available, selects a delivery route, executes delivery with
//! exponential-backoff retry, and — on final failure — generates a bounce
//! back to the original sender. [`queue::ForwarderQueue`] is the
//! [`common::ForwardingSink`] implementation the SMTP Receiver hands
//! records to; [`pipeline::Pipeline`] is the per-record state machine it
//! drives.

pub mod dsn;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod rewrite;

pub use error::{ForwarderError, ForwarderResult};
pub use pipeline::Pipeline;
pub use queue::{ForwarderHandle, ForwarderQueue};

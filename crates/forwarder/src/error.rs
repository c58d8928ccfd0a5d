use thiserror::Error;

/// Failures internal to the forwarding pipeline's own steps (header
/// rewriting, bounce message construction) rather than the Store/DKIM/
/// Delivery crates it orchestrates, which carry their own error types.
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("envelope sender is invalid: {0}")]
    InvalidSender(#[from] utils::AddrError),

    #[error("failed to build bounce message: {0}")]
    BounceBuildFailed(String),
}

pub type ForwarderResult<T> = Result<T, ForwarderError>;

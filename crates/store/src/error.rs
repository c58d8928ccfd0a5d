use thiserror::Error;

/// Failure taxonomy for every [`crate::Store`] operation (spec §4.1).
/// Callers distinguish `Backend` (retry with backoff up to a bounded
/// deadline) from `Conflict`/`QuotaExceeded`/`NotFound`, which are surfaced
/// directly rather than retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient backend error: {0}")]
    Backend(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

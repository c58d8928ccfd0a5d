use thiserror::Error;

#[derive(Debug, Error)]
pub enum DkimError {
    #[error("failed to generate RSA keypair: {0}")]
    KeyGenFailed(String),

    #[error("domain has no active DKIM key")]
    NoActiveKey,

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

pub type DkimResult<T> = Result<T, DkimError>;

//! DKIM Engine (spec §4.3): per-domain RSA keypair management and RFC 6376
//! relaxed/relaxed signing of outgoing messages.

pub mod error;
pub mod keygen;
pub mod sign;

use std::sync::Arc;

use chrono::Utc;
use store::{model::DkimKeypair, Store};

pub use error::{DkimError, DkimResult};
pub use keygen::GeneratedKeypair;

/// Manages keypairs through the [`Store`] and signs outgoing messages with
/// the active key for a domain.
pub struct DkimEngine {
    store: Arc<dyn Store>,
    key_size: usize,
}

impl DkimEngine {
    pub fn new(store: Arc<dyn Store>, key_size: usize) -> Self {
        Self { store, key_size }
    }

    /// `GenerateKeypair(domain)` (spec §4.3): produces a fresh RSA keypair
    /// and stores it as the domain's active key, retiring the prior one.
    /// Consumed by `TriggerKeyRotation` (spec §6).
    pub async fn generate_keypair(&self, domain_id: &str, selector: &str) -> DkimResult<DkimKeypair> {
        let generated = keygen::generate_keypair(self.key_size)?;
        let keypair = DkimKeypair {
            id: utils::new_id(),
            domain_id: domain_id.to_string(),
            selector: selector.to_string(),
            private_key_der: generated.private_key_der,
            public_key_txt: generated.public_key_txt,
            created_at: Utc::now(),
            retired_at: None,
        };
        self.store
            .put_dkim_key(keypair.clone())
            .await
            .map_err(|e| DkimError::KeyGenFailed(e.to_string()))?;
        trc::event!(
            trc::Event::KeypairGenerated,
            "domain_id" => domain_id.to_string(),
            "selector" => selector.to_string(),
        );
        Ok(keypair)
    }

    /// `Sign(message, domain)` (spec §4.3). Returns `ErrNoKey`-equivalent
    /// ([`DkimError::NoActiveKey`]) when the domain lacks a keypair — callers
    /// must route the message through the non-signing path in that case
    /// (spec §4.3's stated failure mode).
    pub async fn sign(&self, message: &[u8], domain_id: &str, domain_name: &str) -> DkimResult<String> {
        let keypair = self
            .store
            .get_dkim_key(domain_id)
            .await
            .map_err(|_| DkimError::NoActiveKey)?;

        let header = sign::sign_message(message, domain_name, &keypair.selector, &keypair.private_key_der)?;
        trc::event!(
            trc::Event::SigningSucceeded,
            "domain_id" => domain_id.to_string(),
            "selector" => keypair.selector.clone(),
        );
        Ok(header)
    }
}

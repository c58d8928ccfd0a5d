use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::{
    pkcs1::EncodeRsaPrivateKey,
    pkcs8::EncodePublicKey,
    RsaPrivateKey, RsaPublicKey,
};

use crate::error::{DkimError, DkimResult};

/// A freshly generated keypair: the private key in PKCS#1 DER (what
/// [`crate::signer::sign`] and `mail_auth::common::crypto::RsaKey` expect)
/// and the DNS TXT record value to publish at
/// `<selector>._domainkey.<domain>`.
pub struct GeneratedKeypair {
    pub private_key_der: Vec<u8>,
    pub public_key_txt: String,
}

/// Generates an RSA keypair of `bits` size (spec §6 `dkim_key_size`,
/// default 2048) and formats the DNS TXT record per RFC 6376 §3.6.1:
/// `v=DKIM1; k=rsa; p=<base64 SubjectPublicKeyInfo DER>`.
pub fn generate_keypair(bits: usize) -> DkimResult<GeneratedKeypair> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| DkimError::KeyGenFailed(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_der = private_key
        .to_pkcs1_der()
        .map_err(|e| DkimError::KeyGenFailed(e.to_string()))?
        .as_bytes()
        .to_vec();

    let public_key_der = public_key
        .to_public_key_der()
        .map_err(|e| DkimError::KeyGenFailed(e.to_string()))?;

    let public_key_txt = format!("v=DKIM1; k=rsa; p={}", STANDARD.encode(public_key_der.as_bytes()));

    Ok(GeneratedKeypair {
        private_key_der,
        public_key_txt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_well_formed_txt_record() {
        let keypair = generate_keypair(2048).unwrap();
        assert!(keypair.public_key_txt.starts_with("v=DKIM1; k=rsa; p="));
        assert!(!keypair.private_key_der.is_empty());
    }
}

//! RFC 6376 signing (spec §4.3), built on `mail-auth`'s `DkimSigner` — the
//! same crate the teacher's `smtp::auth::dkim` module uses for inbound
//! signature *verification*; this is the outbound counterpart.

use mail_auth::{
    common::crypto::{RsaKey, Sha256},
    dkim::{Canonicalization, DkimSigner},
};

use crate::error::{DkimError, DkimResult};

/// Headers covered by the signature (spec §4.3: "at minimum" this set).
pub const SIGNED_HEADERS: [&str; 8] = [
    "From",
    "To",
    "Subject",
    "Date",
    "Message-ID",
    "MIME-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
];

/// Signs `message` with the domain's active key using relaxed/relaxed
/// canonicalization and returns the `DKIM-Signature` header line to prepend
/// (spec §4.3). `private_key_der` is PKCS#1 DER, as produced by
/// [`crate::keygen::generate_keypair`].
pub fn sign_message(
    message: &[u8],
    domain: &str,
    selector: &str,
    private_key_der: &[u8],
) -> DkimResult<String> {
    let key = RsaKey::<Sha256>::from_pkcs1_der(private_key_der)
        .map_err(|e| DkimError::SigningFailed(e.to_string()))?;

    let signer = DkimSigner::from_key(key)
        .domain(domain)
        .selector(selector)
        .headers(SIGNED_HEADERS)
        .header_canonicalization(Canonicalization::Relaxed)
        .body_canonicalization(Canonicalization::Relaxed);

    let signature = signer
        .sign(message)
        .map_err(|e| DkimError::SigningFailed(e.to_string()))?;

    Ok(signature.to_header())
}

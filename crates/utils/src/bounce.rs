//! Sender Rewriting Scheme style bounce-address codec (spec §4.6, Step 2).
//!
//! The envelope sender of a forwarded message is rewritten to
//! `bounce+<token>@<service-domain>` so that a 5xx/DSN from the next hop
//! lands back on this service rather than on the original sender's mailbox
//! (which would break SPF/DMARC alignment for the forwarded hop). The token
//! is the base64url-encoded original address followed by a truncated HMAC,
//! not a standards-track SRS0/SRS1 token — spec.md's Open Questions section
//! calls this out explicitly as a functional equivalent, not a claim of
//! cross-implementation compatibility.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::hmac;

use crate::addr::{AddrError, EmailAddress};

/// Number of HMAC-SHA256 bytes kept in the token. 10 bytes (80 bits) is
/// enough to make forgery infeasible while keeping the local-part short
/// enough to survive SMTP's 64-octet local-part limit for realistic sender
/// addresses.
const TAG_LEN: usize = 10;

pub struct BounceCodec {
    key: hmac::Key,
    service_domain: String,
}

impl BounceCodec {
    pub fn new(secret: &[u8], service_domain: impl Into<String>) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            service_domain: service_domain.into(),
        }
    }

    /// Produces `bounce+<token>@<service-domain>` for `original_sender`.
    pub fn encode(&self, original_sender: &EmailAddress) -> EmailAddress {
        let plain = original_sender.to_string();
        let tag = hmac::sign(&self.key, plain.as_bytes());
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(plain.as_bytes()),
            URL_SAFE_NO_PAD.encode(&tag.as_ref()[..TAG_LEN]),
        );
        // Parsing our own well-formed output cannot fail; constructing an
        // EmailAddress this way keeps the type boundary honest rather than
        // hand-building the local/domain fields.
        EmailAddress::parse(&format!("bounce+{token}@{}", self.service_domain))
            .expect("bounce address is always well-formed")
    }

    /// Recovers the original sender from a bounce address produced by
    /// [`Self::encode`]. Rejects tokens whose HMAC does not match, including
    /// any address not produced by this service.
    pub fn decode(&self, bounce_address: &EmailAddress) -> Result<EmailAddress, BounceTokenError> {
        let local = bounce_address
            .local()
            .strip_prefix("bounce+")
            .ok_or(BounceTokenError::NotABounceAddress)?;
        let (plain_b64, tag_b64) = local
            .split_once('.')
            .ok_or(BounceTokenError::Malformed)?;

        let plain_bytes = URL_SAFE_NO_PAD
            .decode(plain_b64)
            .map_err(|_| BounceTokenError::Malformed)?;
        let tag_bytes = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| BounceTokenError::Malformed)?;
        if tag_bytes.len() != TAG_LEN {
            return Err(BounceTokenError::Malformed);
        }

        let expected = hmac::sign(&self.key, &plain_bytes);
        ring::constant_time::verify_slices_are_equal(&expected.as_ref()[..TAG_LEN], &tag_bytes)
            .map_err(|_| BounceTokenError::TamperedToken)?;

        let plain = String::from_utf8(plain_bytes).map_err(|_| BounceTokenError::Malformed)?;
        EmailAddress::parse(&plain).map_err(BounceTokenError::InvalidAddress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BounceTokenError {
    NotABounceAddress,
    Malformed,
    TamperedToken,
    InvalidAddress(AddrError),
}

impl std::fmt::Display for BounceTokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BounceTokenError::NotABounceAddress => {
                write!(f, "address does not carry a bounce+ local-part")
            }
            BounceTokenError::Malformed => write!(f, "bounce token is malformed"),
            BounceTokenError::TamperedToken => write!(f, "bounce token HMAC does not match"),
            BounceTokenError::InvalidAddress(e) => write!(f, "decoded address is invalid: {e}"),
        }
    }
}

impl std::error::Error for BounceTokenError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> BounceCodec {
        BounceCodec::new(b"test-secret-do-not-use-in-prod", "service.example.net")
    }

    #[test]
    fn round_trips_original_sender() {
        let codec = codec();
        let sender = EmailAddress::parse("sender@external.test").unwrap();
        let bounce = codec.encode(&sender);
        assert!(bounce.to_string().starts_with("bounce+"));
        assert_eq!(bounce.domain(), "service.example.net");

        let decoded = codec.decode(&bounce).unwrap();
        assert_eq!(decoded, sender);
    }

    #[test]
    fn rejects_tampered_token() {
        let codec = codec();
        let sender = EmailAddress::parse("sender@external.test").unwrap();
        let bounce = codec.encode(&sender);
        let mut tampered = bounce.to_string();
        // Flip a character inside the token portion.
        let bad_char = if tampered.as_bytes()[10] == b'A' { 'B' } else { 'A' };
        tampered.replace_range(10..11, &bad_char.to_string());
        let tampered_addr = EmailAddress::parse(&tampered).unwrap();

        assert_eq!(
            codec.decode(&tampered_addr).unwrap_err(),
            BounceTokenError::TamperedToken
        );
    }

    #[test]
    fn rejects_addresses_without_bounce_prefix() {
        let codec = codec();
        let addr = EmailAddress::parse("someone@service.example.net").unwrap();
        assert_eq!(
            codec.decode(&addr).unwrap_err(),
            BounceTokenError::NotABounceAddress
        );
    }

    #[test]
    fn different_secrets_do_not_cross_validate() {
        let codec_a = BounceCodec::new(b"secret-a", "service.example.net");
        let codec_b = BounceCodec::new(b"secret-b", "service.example.net");
        let sender = EmailAddress::parse("sender@external.test").unwrap();
        let bounce = codec_a.encode(&sender);
        assert!(matches!(
            codec_b.decode(&bounce),
            Err(BounceTokenError::TamperedToken)
        ));
    }
}

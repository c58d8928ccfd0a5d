//! RFC 5321 address parsing.
//!
//! The grammar implemented here is a practical subset of `Reverse-path` /
//! `Forward-path` — a non-empty local-part, an `@`, and a domain containing
//! at least one dot or being a literal. It rejects control characters and
//! unbalanced quoting but does not implement the full quoted-string grammar;
//! that is more permissive than real senders need and would only invite
//! header-injection edge cases in a forwarding service.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    local: String,
    domain: String,
}

impl EmailAddress {
    /// Parses `local@domain`, optionally wrapped in `<...>` as sent on the
    /// SMTP command line. Returns the address with its original casing
    /// preserved; use [`EmailAddress::normalized`] for lookups.
    pub fn parse(input: &str) -> Result<Self, AddrError> {
        let trimmed = input.trim();
        let inner = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed);

        if inner.is_empty() {
            // The null reverse-path `<>` used for bounces/DSNs.
            return Ok(Self {
                local: String::new(),
                domain: String::new(),
            });
        }

        if inner.chars().any(|c| c.is_control()) {
            return Err(AddrError::InvalidCharacter);
        }

        let at = inner.rfind('@').ok_or(AddrError::MissingAtSign)?;
        let (local, domain) = (&inner[..at], &inner[at + 1..]);

        if local.is_empty() {
            return Err(AddrError::EmptyLocalPart);
        }
        if domain.is_empty() || (!domain.starts_with('[') && !domain.contains('.')) {
            return Err(AddrError::InvalidDomain);
        }
        if local.len() > 64 || domain.len() > 255 {
            return Err(AddrError::TooLong);
        }

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
        })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn is_null_path(&self) -> bool {
        self.local.is_empty() && self.domain.is_empty()
    }

    /// Lowercased (local, domain) pair used for alias lookups. Testable
    /// property 3 requires lookups be case-insensitive in both parts.
    pub fn normalized(&self) -> (String, String) {
        (self.local.to_lowercase(), self.domain.to_lowercase())
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null_path() {
            write!(f, "<>")
        } else {
            write!(f, "{}@{}", self.local, self.domain)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrError {
    MissingAtSign,
    EmptyLocalPart,
    InvalidDomain,
    InvalidCharacter,
    TooLong,
}

impl fmt::Display for AddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AddrError::MissingAtSign => "address is missing '@'",
            AddrError::EmptyLocalPart => "local-part is empty",
            AddrError::InvalidDomain => "domain is empty or has no dot",
            AddrError::InvalidCharacter => "address contains a control character",
            AddrError::TooLong => "local-part or domain exceeds RFC 5321 length limits",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for AddrError {}

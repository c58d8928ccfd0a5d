//! Entities of the data model (spec §3), kept as plain structs with ids as
//! `String` rather than an object graph — lookups go through the [`Store`]
//! trait, never through in-memory references between entities, per the
//! "cyclic references" re-architecture guidance in spec §9.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlanTier {
    Free,
    Starter,
    Business,
    Enterprise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Id,
    pub name: String,
    pub plan_tier: PlanTier,
    pub domain_quota: u32,
    pub message_quota_per_period: u32,
    pub billing_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Unverified,
    Partial,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Id,
    /// Lowercase, IDNA-normalized name. Unique across all non-soft-deleted
    /// domains globally.
    pub name: String,
    pub organization_id: Id,
    pub verification_state: VerificationState,
    pub catch_all_target: Option<String>,
    pub dkim_selector: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Domain {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub id: Id,
    /// Lowercase local-part.
    pub local_part: String,
    pub domain_id: Id,
    /// Ordered set of RFC 5321 forwarding target addresses.
    pub targets: Vec<String>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alias {
    /// An alias with an expiration in the past is treated as inactive even
    /// if its `active` flag was never flipped (spec §3 invariant).
    pub fn is_effectively_active(&self, now: DateTime<Utc>) -> bool {
        self.active
            && !self.targets.is_empty()
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkimKeypair {
    pub id: Id,
    pub domain_id: Id,
    pub selector: String,
    /// PKCS#8 DER-encoded RSA private key.
    pub private_key_der: Vec<u8>,
    /// `v=DKIM1; k=rsa; p=<base64>` DNS TXT value.
    pub public_key_txt: String,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl DkimKeypair {
    pub fn is_active(&self) -> bool {
        self.retired_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Accepted,
    Forwarding,
    Delivered,
    Bounced,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Id,
    pub message_id: String,
    pub domain_id: Id,
    /// `None` when delivered via catch-all rather than a specific alias.
    pub alias_id: Option<Id>,
    pub envelope_sender: String,
    pub envelope_recipient: String,
    pub forward_to: String,
    pub subject: String,
    pub size_bytes: u64,
    pub status: MessageStatus,
    pub delivery_attempts: u32,
    pub last_error_class: Option<ErrorClass>,
    pub last_error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsRecordType {
    Mx,
    Spf,
    Dkim,
    Dmarc,
    Ptr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSnapshot {
    pub domain_id: Id,
    pub record_type: DnsRecordType,
    pub expected: String,
    pub actual: Vec<String>,
    pub pass: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Id,
    pub organization_id: Id,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub detail: String,
}

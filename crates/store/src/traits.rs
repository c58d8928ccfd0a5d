use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    error::StoreResult,
    model::{
        ActivityLogEntry, Alias, DkimKeypair, Domain, DnsRecordType, DnsSnapshot, ErrorClass,
        MessageRecord, MessageStatus, Organization, VerificationState,
    },
};

#[derive(Debug, Clone)]
pub struct AliasLookup {
    pub alias: Alias,
    pub domain: Domain,
    pub organization: Organization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Domains,
    MessagesInPeriod,
}

/// Transactional access to every entity in the data model (spec §4.1). A
/// transaction handle is implicit in each call rather than threaded
/// explicitly — the in-memory backend in [`crate::memory`] takes a single
/// process-wide lock per operation, which is transaction enough for a single
/// node; a networked backend would take an explicit handle here instead.
#[async_trait]
pub trait Store: Send + Sync {
    async fn lookup_alias(&self, local_part: &str, domain: &str) -> StoreResult<AliasLookup>;

    async fn lookup_catch_all(&self, domain: &str) -> StoreResult<Option<String>>;

    async fn get_domain(&self, domain_id: &str) -> StoreResult<Domain>;

    async fn get_domain_by_name(&self, name: &str) -> StoreResult<Domain>;

    async fn create_message(&self, record: MessageRecord) -> StoreResult<()>;

    async fn get_message(&self, id: &str) -> StoreResult<MessageRecord>;

    /// Transitions `id` to `new_status`, validating the move against
    /// [`crate::state_machine::is_valid_transition`]. `delivery_attempts`,
    /// when `Some`, overwrites the record's stored attempt count — the
    /// Forwarder is the sole owner of that counter (spec §4.6) and passes
    /// its own tally through rather than having the store guess it from the
    /// transition shape, since more than one `Forwarding` write can occur
    /// per real attempt (the entry write and, on failure, the error-detail
    /// write).
    async fn update_message_status(
        &self,
        id: &str,
        new_status: MessageStatus,
        error: Option<(ErrorClass, String)>,
        delivery_attempts: Option<u32>,
    ) -> StoreResult<()>;

    async fn get_dkim_key(&self, domain_id: &str) -> StoreResult<DkimKeypair>;

    /// Stores a newly generated keypair as the domain's active key,
    /// retiring the previous active key (if any) rather than deleting it —
    /// retired keys are kept so previously-signed messages can still be
    /// verified against the selector that signed them.
    async fn put_dkim_key(&self, keypair: DkimKeypair) -> StoreResult<()>;

    /// Upserts the current snapshot for `(domain, record_type)`, appends it
    /// to history, and recomputes + returns the domain's verification
    /// state: `verified` iff MX, SPF, and DKIM all pass.
    async fn record_dns_snapshot(
        &self,
        domain_id: &str,
        record_type: DnsRecordType,
        pass: bool,
        expected: String,
        actual: Vec<String>,
    ) -> StoreResult<VerificationState>;

    async fn get_dns_snapshots(&self, domain_id: &str) -> StoreResult<Vec<DnsSnapshot>>;

    /// Every non-soft-deleted domain, for the periodic verification refresh
    /// (spec §4.4: "on a periodic refresh with jitter") to iterate over.
    async fn list_active_domains(&self) -> StoreResult<Vec<Domain>>;

    /// Atomically checks and, if allowed, increments the organization's
    /// usage counter for `kind` against its plan quota for the current
    /// billing period. Returns `Ok(false)` (denied) without incrementing
    /// when the quota would be exceeded.
    async fn quota_check(&self, organization_id: &str, kind: QuotaKind) -> StoreResult<bool>;

    async fn record_activity(&self, entry: ActivityLogEntry) -> StoreResult<()>;

    /// Startup recovery scan (spec §7): records left in `forwarding` with no
    /// update within `stalled_after` are returned so the caller can
    /// re-enqueue them.
    async fn reap_stalled_forwarding(
        &self,
        stalled_after: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageRecord>>;

    // --- Seeding / bootstrap operations. The HTTP admin API that owns these
    // in production is out of scope (spec §1); this core still needs a way
    // to create the entities it forwards mail for, both for its own tests
    // and for a config-driven bootstrap at startup.
    async fn create_organization(&self, org: Organization) -> StoreResult<()>;
    async fn create_domain(&self, domain: Domain) -> StoreResult<()>;
    async fn create_alias(&self, alias: Alias) -> StoreResult<()>;
}

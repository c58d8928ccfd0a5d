//! In-memory [`Store`] backend.
//!
//! A single `parking_lot::Mutex` around plain `HashMap`s stands in for the
//! transactional backend spec §4.1 describes — exactly transaction enough
//! for a single node, per the note on `Store` in `traits.rs`. Indexes are
//! kept by hand alongside the primary maps rather than scanned linearly,
//! since `lookup_alias` is the hot path and spec §4.1 calls out a
//! sub-millisecond budget for it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::{
    error::{StoreError, StoreResult},
    model::{
        ActivityLogEntry, Alias, DkimKeypair, Domain, DnsRecordType, DnsSnapshot, ErrorClass, Id,
        MessageRecord, MessageStatus, Organization, VerificationState,
    },
    state_machine,
    traits::{AliasLookup, QuotaKind, Store},
};

/// Number of historical DNS snapshots retained per (domain, record type)
/// before the oldest entries are dropped (spec §3: "history kept
/// append-only up to a retention bound").
const DNS_HISTORY_RETENTION: usize = 50;

#[derive(Default)]
struct Inner {
    organizations: HashMap<Id, Organization>,
    domains: HashMap<Id, Domain>,
    domains_by_name: HashMap<String, Id>,
    aliases: HashMap<Id, Alias>,
    // (domain_id, lowercase local-part) -> alias id
    alias_index: HashMap<(Id, String), Id>,
    dkim_keys: HashMap<Id, Vec<DkimKeypair>>,
    messages: HashMap<Id, MessageRecord>,
    dns_current: HashMap<(Id, DnsRecordType), DnsSnapshot>,
    dns_history: HashMap<(Id, DnsRecordType), Vec<DnsSnapshot>>,
    activity_log: Vec<ActivityLogEntry>,
    // (organization_id, year, month) -> messages accepted so far this period
    message_quota_usage: HashMap<(Id, i32, u32), u32>,
}

/// In-memory, single-process implementation of [`Store`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn recompute_verification_state(current: &HashMap<(Id, DnsRecordType), DnsSnapshot>, domain_id: &str) -> VerificationState {
        let pass = |rt: DnsRecordType| {
            current
                .get(&(domain_id.to_string(), rt))
                .map(|s| s.pass)
                .unwrap_or(false)
        };
        let (mx, spf, dkim) = (pass(DnsRecordType::Mx), pass(DnsRecordType::Spf), pass(DnsRecordType::Dkim));
        if mx && spf && dkim {
            VerificationState::Verified
        } else if mx || spf || dkim || pass(DnsRecordType::Dmarc) {
            VerificationState::Partial
        } else {
            VerificationState::Unverified
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lookup_alias(&self, local_part: &str, domain: &str) -> StoreResult<AliasLookup> {
        let local_lower = local_part.to_lowercase();
        let domain_lower = domain.to_lowercase();
        let inner = self.inner.lock();

        let domain_id = inner
            .domains_by_name
            .get(&domain_lower)
            .ok_or_else(|| StoreError::NotFound(format!("domain {domain}")))?
            .clone();
        let domain_rec = inner.domains.get(&domain_id).cloned().expect("index consistency");
        if domain_rec.is_deleted() {
            return Err(StoreError::NotFound(format!("domain {domain}")));
        }

        let alias_id = inner
            .alias_index
            .get(&(domain_id.clone(), local_lower))
            .ok_or_else(|| StoreError::NotFound(format!("{local_part}@{domain}")))?
            .clone();
        let alias = inner.aliases.get(&alias_id).cloned().expect("index consistency");
        if !alias.is_effectively_active(Utc::now()) {
            return Err(StoreError::NotFound(format!("{local_part}@{domain} is inactive")));
        }

        let organization = inner
            .organizations
            .get(&domain_rec.organization_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("organization for domain {domain}")))?;

        Ok(AliasLookup {
            alias,
            domain: domain_rec,
            organization,
        })
    }

    async fn lookup_catch_all(&self, domain: &str) -> StoreResult<Option<String>> {
        let domain_lower = domain.to_lowercase();
        let inner = self.inner.lock();
        let domain_id = inner
            .domains_by_name
            .get(&domain_lower)
            .ok_or_else(|| StoreError::NotFound(format!("domain {domain}")))?;
        Ok(inner.domains.get(domain_id).and_then(|d| d.catch_all_target.clone()))
    }

    async fn get_domain(&self, domain_id: &str) -> StoreResult<Domain> {
        self.inner
            .lock()
            .domains
            .get(domain_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("domain id {domain_id}")))
    }

    async fn get_domain_by_name(&self, name: &str) -> StoreResult<Domain> {
        let name_lower = name.to_lowercase();
        let inner = self.inner.lock();
        let id = inner
            .domains_by_name
            .get(&name_lower)
            .ok_or_else(|| StoreError::NotFound(format!("domain {name}")))?;
        Ok(inner.domains.get(id).cloned().expect("index consistency"))
    }

    async fn create_message(&self, record: MessageRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.messages.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("message {} already exists", record.id)));
        }
        inner.messages.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_message(&self, id: &str) -> StoreResult<MessageRecord> {
        self.inner
            .lock()
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }

    async fn update_message_status(
        &self,
        id: &str,
        new_status: MessageStatus,
        error: Option<(ErrorClass, String)>,
        delivery_attempts: Option<u32>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;

        if !state_machine::is_valid_transition(record.status, new_status) {
            return Err(StoreError::InvalidTransition(format!(
                "{:?} -> {:?} is not a valid status transition for message {id}",
                record.status, new_status
            )));
        }

        record.status = new_status;
        record.updated_at = Utc::now();
        if let Some(attempts) = delivery_attempts {
            record.delivery_attempts = attempts;
        }
        if let Some((class, detail)) = error {
            record.last_error_class = Some(class);
            record.last_error_detail = Some(detail);
        }
        Ok(())
    }

    async fn get_dkim_key(&self, domain_id: &str) -> StoreResult<DkimKeypair> {
        let inner = self.inner.lock();
        inner
            .dkim_keys
            .get(domain_id)
            .and_then(|keys| keys.iter().find(|k| k.is_active()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("active dkim key for domain {domain_id}")))
    }

    async fn put_dkim_key(&self, keypair: DkimKeypair) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let keys = inner.dkim_keys.entry(keypair.domain_id.clone()).or_default();
        for existing in keys.iter_mut() {
            if existing.is_active() {
                existing.retired_at = Some(now);
            }
        }
        keys.push(keypair);
        Ok(())
    }

    async fn record_dns_snapshot(
        &self,
        domain_id: &str,
        record_type: DnsRecordType,
        pass: bool,
        expected: String,
        actual: Vec<String>,
    ) -> StoreResult<VerificationState> {
        let mut inner = self.inner.lock();
        if !inner.domains.contains_key(domain_id) {
            return Err(StoreError::NotFound(format!("domain id {domain_id}")));
        }

        let snapshot = DnsSnapshot {
            domain_id: domain_id.to_string(),
            record_type,
            expected,
            actual,
            pass,
            checked_at: Utc::now(),
        };

        let key = (domain_id.to_string(), record_type);
        inner.dns_current.insert(key.clone(), snapshot.clone());
        let history = inner.dns_history.entry(key).or_default();
        history.push(snapshot);
        if history.len() > DNS_HISTORY_RETENTION {
            let overflow = history.len() - DNS_HISTORY_RETENTION;
            history.drain(0..overflow);
        }

        let new_state = Self::recompute_verification_state(&inner.dns_current, domain_id);
        if let Some(domain) = inner.domains.get_mut(domain_id) {
            domain.verification_state = new_state;
            domain.updated_at = Utc::now();
        }
        Ok(new_state)
    }

    async fn get_dns_snapshots(&self, domain_id: &str) -> StoreResult<Vec<DnsSnapshot>> {
        let inner = self.inner.lock();
        Ok(inner
            .dns_current
            .iter()
            .filter(|((d, _), _)| d == domain_id)
            .map(|(_, snap)| snap.clone())
            .collect())
    }

    async fn list_active_domains(&self) -> StoreResult<Vec<Domain>> {
        Ok(self
            .inner
            .lock()
            .domains
            .values()
            .filter(|d| !d.is_deleted())
            .cloned()
            .collect())
    }

    async fn quota_check(&self, organization_id: &str, kind: QuotaKind) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let org = inner
            .organizations
            .get(organization_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("organization {organization_id}")))?;

        match kind {
            QuotaKind::Domains => {
                let count = inner
                    .domains
                    .values()
                    .filter(|d| d.organization_id == organization_id && !d.is_deleted())
                    .count() as u32;
                Ok(count < org.domain_quota)
            }
            QuotaKind::MessagesInPeriod => {
                let now = Utc::now();
                let period_key = (organization_id.to_string(), now.format("%Y").to_string().parse().unwrap_or(0), now.format("%m").to_string().parse().unwrap_or(0));
                let used = inner.message_quota_usage.get(&period_key).copied().unwrap_or(0);
                if used >= org.message_quota_per_period {
                    Ok(false)
                } else {
                    inner.message_quota_usage.insert(period_key, used + 1);
                    Ok(true)
                }
            }
        }
    }

    async fn record_activity(&self, mut entry: ActivityLogEntry) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if entry.id.is_empty() {
            entry.id = utils::new_id();
        }
        inner.activity_log.push(entry);
        Ok(())
    }

    async fn reap_stalled_forwarding(
        &self,
        stalled_after: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageRecord>> {
        let inner = self.inner.lock();
        let cutoff = now - stalled_after;
        Ok(inner
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Forwarding && m.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn create_organization(&self, org: Organization) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.organizations.contains_key(&org.id) {
            return Err(StoreError::Conflict(format!("organization {} already exists", org.id)));
        }
        inner.organizations.insert(org.id.clone(), org);
        Ok(())
    }

    async fn create_domain(&self, domain: Domain) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let name_lower = domain.name.to_lowercase();
        if inner.domains_by_name.contains_key(&name_lower) {
            return Err(StoreError::Conflict(format!("domain {} already exists", domain.name)));
        }
        inner.domains_by_name.insert(name_lower, domain.id.clone());
        inner.domains.insert(domain.id.clone(), domain);
        Ok(())
    }

    async fn create_alias(&self, alias: Alias) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let domain = inner
            .domains
            .get(&alias.domain_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("domain id {}", alias.domain_id)))?;
        let key = (domain.id.clone(), alias.local_part.to_lowercase());
        if inner.alias_index.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "alias {}@{} already exists",
                alias.local_part, domain.name
            )));
        }
        inner.alias_index.insert(key, alias.id.clone());
        inner.aliases.insert(alias.id.clone(), alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlanTier, VerificationState};

    fn sample_org(id: &str) -> Organization {
        Organization {
            id: id.to_string(),
            name: "Acme".into(),
            plan_tier: PlanTier::Starter,
            domain_quota: 5,
            message_quota_per_period: 1000,
            billing_email: "billing@acme.test".into(),
        }
    }

    fn sample_domain(id: &str, org_id: &str, name: &str) -> Domain {
        Domain {
            id: id.to_string(),
            name: name.to_string(),
            organization_id: org_id.to_string(),
            verification_state: VerificationState::Unverified,
            catch_all_target: None,
            dkim_selector: "default".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn sample_alias(id: &str, domain_id: &str, local: &str, targets: Vec<&str>) -> Alias {
        Alias {
            id: id.to_string(),
            local_part: local.to_string(),
            domain_id: domain_id.to_string(),
            targets: targets.into_iter().map(String::from).collect(),
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_organization(sample_org("org1")).await.unwrap();
        store
            .create_domain(sample_domain("dom1", "org1", "example.com"))
            .await
            .unwrap();
        store
            .create_alias(sample_alias("alias1", "dom1", "hello", vec!["user@gmail.com"]))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn lookup_alias_is_case_insensitive() {
        let store = seeded_store().await;
        let found = store.lookup_alias("HELLO", "Example.COM").await.unwrap();
        assert_eq!(found.alias.local_part, "hello");
        assert_eq!(found.alias.targets, vec!["user@gmail.com".to_string()]);
    }

    #[tokio::test]
    async fn lookup_unknown_alias_fails() {
        let store = seeded_store().await;
        assert!(store.lookup_alias("nobody", "example.com").await.is_err());
    }

    #[tokio::test]
    async fn expired_alias_is_treated_as_inactive() {
        let store = seeded_store().await;
        {
            let mut inner = store.inner.lock();
            let alias = inner.aliases.get_mut("alias1").unwrap();
            alias.expires_at = Some(Utc::now() - Duration::days(1));
        }
        assert!(store.lookup_alias("hello", "example.com").await.is_err());
    }

    #[tokio::test]
    async fn message_status_transitions_follow_state_machine() {
        let store = seeded_store().await;
        let record = MessageRecord {
            id: "msg1".into(),
            message_id: "<abc@example.com>".into(),
            domain_id: "dom1".into(),
            alias_id: Some("alias1".into()),
            envelope_sender: "sender@external.test".into(),
            envelope_recipient: "hello@example.com".into(),
            forward_to: "user@gmail.com".into(),
            subject: "hi".into(),
            size_bytes: 42,
            status: MessageStatus::Accepted,
            delivery_attempts: 0,
            last_error_class: None,
            last_error_detail: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create_message(record).await.unwrap();

        store
            .update_message_status("msg1", MessageStatus::Forwarding, None, Some(1))
            .await
            .unwrap();
        store
            .update_message_status("msg1", MessageStatus::Delivered, None, None)
            .await
            .unwrap();

        let err = store
            .update_message_status("msg1", MessageStatus::Forwarding, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn dns_snapshot_recomputes_verification_state() {
        let store = seeded_store().await;
        store
            .record_dns_snapshot("dom1", DnsRecordType::Mx, true, "mx.example.com".into(), vec!["mx.example.com".into()])
            .await
            .unwrap();
        let state = store
            .record_dns_snapshot("dom1", DnsRecordType::Spf, false, "v=spf1".into(), vec![])
            .await
            .unwrap();
        assert_eq!(state, VerificationState::Partial);

        let state = store
            .record_dns_snapshot("dom1", DnsRecordType::Dkim, true, "v=DKIM1".into(), vec!["v=DKIM1".into()])
            .await
            .unwrap();
        assert_eq!(state, VerificationState::Verified);
    }

    #[tokio::test]
    async fn quota_check_denies_after_domain_quota_reached() {
        let store = MemoryStore::new();
        let mut org = sample_org("org1");
        org.domain_quota = 1;
        store.create_organization(org).await.unwrap();
        store
            .create_domain(sample_domain("dom1", "org1", "example.com"))
            .await
            .unwrap();

        assert!(!store.quota_check("org1", QuotaKind::Domains).await.unwrap());
    }

    #[tokio::test]
    async fn stalled_forwarding_messages_are_reaped() {
        let store = seeded_store().await;
        let mut record = MessageRecord {
            id: "msg1".into(),
            message_id: "<abc@example.com>".into(),
            domain_id: "dom1".into(),
            alias_id: Some("alias1".into()),
            envelope_sender: "sender@external.test".into(),
            envelope_recipient: "hello@example.com".into(),
            forward_to: "user@gmail.com".into(),
            subject: "hi".into(),
            size_bytes: 42,
            status: MessageStatus::Accepted,
            delivery_attempts: 0,
            last_error_class: None,
            last_error_detail: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create_message(record.clone()).await.unwrap();
        store
            .update_message_status("msg1", MessageStatus::Forwarding, None, Some(1))
            .await
            .unwrap();
        record.updated_at = Utc::now() - Duration::minutes(20);
        {
            let mut inner = store.inner.lock();
            inner.messages.get_mut("msg1").unwrap().updated_at = record.updated_at;
        }

        let stalled = store
            .reap_stalled_forwarding(Duration::minutes(10), Utc::now())
            .await
            .unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, "msg1");
    }
}

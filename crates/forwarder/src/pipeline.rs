//! Orchestrates spec §4.6 Steps 2-5 for a single Message Record: header
//! rewrite, DKIM signing, route selection, delivery, and the retry/bounce
//! tail. One [`Pipeline::run`] call owns a record's entire lifecycle,
//! including every retry — retries are scheduled by spawning a fresh task
//! after the backoff sleep rather than blocking whichever worker dequeued
//! the record, so a slow target never starves other aliases (spec §4.6
//! "Ordering guarantees").

use std::sync::Arc;

use chrono::Utc;
use common::config::{Config, DeliveryMode};
use delivery::{DeliveryBackend, PreparedMessage};
use dkim::{DkimEngine, DkimError};
use store::{
    model::{ErrorClass, MessageRecord, MessageStatus},
    Store,
};
use utils::{BounceCodec, EmailAddress};

use crate::{dsn, retry, rewrite};

pub struct Pipeline {
    store: Arc<dyn Store>,
    dkim: Arc<DkimEngine>,
    backend: Arc<dyn DeliveryBackend>,
    config: Arc<Config>,
    bounce_codec: BounceCodec,
}

impl Pipeline {
    pub fn new(store: Arc<dyn Store>, dkim: Arc<DkimEngine>, backend: Arc<dyn DeliveryBackend>, config: Arc<Config>) -> Self {
        let bounce_codec = BounceCodec::new(config.bounce_token_secret.as_bytes(), config.hostname.clone());
        Self { store, dkim, backend, config, bounce_codec }
    }

    /// Entry point for a freshly accepted record, or one recovered by the
    /// startup scan (spec §7).
    pub async fn run(self: Arc<Self>, record: MessageRecord, raw_message: Vec<u8>) {
        self.attempt(record, raw_message).await;
    }

    async fn attempt(self: Arc<Self>, mut record: MessageRecord, raw_message: Vec<u8>) {
        // The Forwarder is the sole owner of `delivery_attempts` (spec §4.6);
        // every call to `attempt` is one real delivery attempt, so the
        // counter advances here, once, regardless of how many status writes
        // this attempt ends up making.
        record.delivery_attempts += 1;
        if self
            .store
            .update_message_status(&record.id, MessageStatus::Forwarding, None, Some(record.delivery_attempts))
            .await
            .is_err()
        {
            return;
        }
        record.status = MessageStatus::Forwarding;
        trc::event!(
            trc::Event::ForwardingStarted,
            "record_id" => record.id.clone(),
            "attempt" => record.delivery_attempts.to_string(),
        );
        if record.alias_id.is_none() {
            trc::event!(trc::Event::CatchAllUsed, "record_id" => record.id.clone(), "domain_id" => record.domain_id.clone());
        }

        let original_sender =
            EmailAddress::parse(&record.envelope_sender).unwrap_or_else(|_| EmailAddress::parse("<>").expect("null path parses"));
        let bounce_sender = self.bounce_codec.encode(&original_sender);

        let rewritten = rewrite::rewrite_headers(
            &raw_message,
            &original_sender,
            &record.envelope_recipient,
            &record.forward_to,
            &self.config.hostname,
        );
        trc::event!(trc::Event::HeaderRewritten, "record_id" => record.id.clone());

        let body = self.sign_if_possible(&record, rewritten.body).await;

        let prepared = PreparedMessage {
            envelope_from: bounce_sender.to_string(),
            envelope_to: record.forward_to.clone(),
            body,
        };

        let outcome = match self.config.delivery_mode {
            DeliveryMode::Direct => self.backend.deliver_direct(&prepared).await,
            DeliveryMode::Relay => self.backend.deliver_relay(&prepared).await,
            DeliveryMode::Hybrid => self.backend.deliver_hybrid(&prepared).await.map(|_| ()),
        };

        match outcome {
            Ok(()) => {
                let _ = self.store.update_message_status(&record.id, MessageStatus::Delivered, None, None).await;
                trc::event!(trc::Event::DeliverySucceeded, "record_id" => record.id.clone());
            }
            Err(err) if err.is_transient() => {
                let detail = err.to_string();
                let _ = self
                    .store
                    .update_message_status(&record.id, MessageStatus::Forwarding, Some((ErrorClass::Transient, detail.clone())), None)
                    .await;

                if retry::should_retry(
                    record.delivery_attempts,
                    self.config.max_retry_attempts,
                    record.created_at,
                    self.config.retry_deadline(),
                    Utc::now(),
                ) {
                    let delay = retry::backoff_duration(record.delivery_attempts);
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        this.attempt(record, raw_message).await;
                    });
                } else {
                    self.finalize_failure(record, &raw_message, detail, MessageStatus::Failed, ErrorClass::Transient, &bounce_sender)
                        .await;
                }
            }
            Err(err) => {
                let detail = err.to_string();
                self.finalize_failure(record, &raw_message, detail, MessageStatus::Bounced, ErrorClass::Permanent, &bounce_sender)
                    .await;
            }
        }
    }

    /// DKIM signing (spec §4.6 Step 3): log-and-proceed-unsigned whenever
    /// the domain has no active key or signing otherwise fails, since an
    /// authenticated relay downstream can still carry the message.
    async fn sign_if_possible(&self, record: &MessageRecord, body: Vec<u8>) -> Vec<u8> {
        let domain = match self.store.get_domain(&record.domain_id).await {
            Ok(domain) => domain,
            Err(_) => return body,
        };

        match self.dkim.sign(&body, &domain.id, &domain.name).await {
            Ok(header) => {
                let mut signed = header.into_bytes();
                signed.extend_from_slice(b"\r\n");
                signed.extend_from_slice(&body);
                signed
            }
            Err(DkimError::NoActiveKey) => {
                trc::event!(trc::Event::SigningSkippedNoKey, "domain_id" => domain.id.clone());
                body
            }
            Err(e) => {
                trc::event!(trc::Event::SigningSkippedNoKey, "domain_id" => domain.id.clone(), "detail" => e.to_string());
                body
            }
        }
    }

    /// Terminal failure (spec §4.6 Step 5 tail): records the outcome, then
    /// generates and queues a bounce unless the original sender was itself
    /// the null reverse-path (a bounce of a bounce would loop forever).
    async fn finalize_failure(
        &self,
        record: MessageRecord,
        raw_message: &[u8],
        detail: String,
        terminal_status: MessageStatus,
        error_class: ErrorClass,
        bounce_sender: &EmailAddress,
    ) {
        let _ = self
            .store
            .update_message_status(&record.id, terminal_status, Some((error_class, detail.clone())), None)
            .await;

        match terminal_status {
            MessageStatus::Bounced => {
                trc::event!(trc::Event::DeliveryBounced, "record_id" => record.id.clone(), "detail" => detail.clone())
            }
            _ => trc::event!(trc::Event::DeliveryFailed, "record_id" => record.id.clone(), "detail" => detail.clone()),
        }

        let recovered_sender = match self.bounce_codec.decode(bounce_sender) {
            Ok(addr) => addr,
            Err(_) => return,
        };
        if recovered_sender.is_null_path() {
            return;
        }

        let bounce_body = match dsn::build_bounce_message(
            &self.config.hostname,
            &self.config.hostname,
            &recovered_sender.to_string(),
            &record,
            raw_message,
            &detail,
        ) {
            Ok(body) => body,
            Err(e) => {
                trc::event!(trc::Event::DeliveryFailed, "record_id" => record.id.clone(), "detail" => format!("bounce build failed: {e}"));
                return;
            }
        };

        let bounce_message = PreparedMessage {
            envelope_from: "<>".to_string(),
            envelope_to: recovered_sender.to_string(),
            body: bounce_body,
        };

        let bounce_outcome = match self.config.delivery_mode {
            DeliveryMode::Direct => self.backend.deliver_direct(&bounce_message).await,
            DeliveryMode::Relay => self.backend.deliver_relay(&bounce_message).await,
            DeliveryMode::Hybrid => self.backend.deliver_hybrid(&bounce_message).await.map(|_| ()),
        };

        match bounce_outcome {
            Ok(()) => trc::event!(trc::Event::BounceGenerated, "record_id" => record.id.clone()),
            Err(e) => trc::event!(trc::Event::BounceGenerated, "record_id" => record.id.clone(), "detail" => e.to_string()),
        }
    }
}

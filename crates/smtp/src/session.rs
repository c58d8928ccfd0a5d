//! Per-connection command dispatch (spec §4.5): consumes a parsed
//! [`Command`], drives the [`State`] machine, and returns the [`Response`]
//! to write back. Never touches the socket directly — `server.rs` owns I/O
//! and feeds this module one line at a time, which is what keeps dispatch
//! unit-testable without a live connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::ForwardingSink;
use store::model::{ErrorClass, Id, MessageRecord, MessageStatus};
use store::{AliasLookup, QuotaKind, Store};

use crate::message::extract_headers;
use crate::parser::{parse_command, Command, ParseError};
use crate::response::Response;
use crate::state::{ClientIdentity, Envelope, ResolvedRecipient, State};

/// Default deadline for the `RCPT TO` recipient lookup (spec §4.5,
/// "Concurrency": "non-blocking ... except the recipient lookup, which has
/// a hard deadline").
pub const RECIPIENT_LOOKUP_DEADLINE: Duration = Duration::from_secs(5);

/// What the driver loop should do after a line was processed.
pub enum Dispatch {
    Reply(Response),
    /// Reply, then close the socket (`QUIT`, pregreet violation, fatal
    /// parse failure on a line that can't be recovered from).
    ReplyAndClose(Response),
    /// Caller should switch to raw DATA-accumulation mode.
    EnterData,
    /// Caller should perform the STARTTLS upgrade after writing the reply.
    Upgrade(Response),
}

pub struct Session {
    pub state: State,
    pub identity: ClientIdentity,
    pub envelope: Envelope,
    data_buffer: Vec<u8>,
    store: Arc<dyn Store>,
    sink: Arc<dyn ForwardingSink>,
    hostname: String,
    max_message_bytes: u64,
    starttls_available: bool,
    tls_active: bool,
}

impl Session {
    pub fn new(
        identity: ClientIdentity,
        store: Arc<dyn Store>,
        sink: Arc<dyn ForwardingSink>,
        hostname: String,
        max_message_bytes: u64,
        starttls_available: bool,
    ) -> Self {
        Self {
            state: State::Connected,
            identity,
            envelope: Envelope::default(),
            data_buffer: Vec::new(),
            store,
            sink,
            hostname,
            max_message_bytes,
            starttls_available,
            tls_active: false,
        }
    }

    /// Dispatches one CRLF-terminated command line. Only valid outside
    /// `Receiving` state — use [`Self::feed_data_line`] for the body.
    pub async fn dispatch(&mut self, line: &str) -> Dispatch {
        debug_assert_ne!(self.state, State::Receiving);

        match parse_command(line) {
            Ok(command) => self.dispatch_command(command).await,
            Err(ParseError::UnknownCommand) => Dispatch::Reply(Response::syntax_error()),
            Err(_) => Dispatch::Reply(Response::parameter_error()),
        }
    }

    async fn dispatch_command(&mut self, command: Command) -> Dispatch {
        match command {
            Command::Ehlo(domain) => self.handle_helo(domain, true),
            Command::Helo(domain) => self.handle_helo(domain, false),
            Command::StartTls => self.handle_starttls(),
            Command::MailFrom { address, size } => self.handle_mail_from(address, size).await,
            Command::RcptTo { address } => self.handle_rcpt_to(address).await,
            Command::Data => self.handle_data(),
            Command::Rset => {
                self.envelope.reset();
                if self.state != State::Connected {
                    self.state = State::Greeted;
                }
                Dispatch::Reply(Response::rset_ok())
            }
            Command::Noop => Dispatch::Reply(Response::noop_ok()),
            Command::Quit => Dispatch::ReplyAndClose(Response::bye(&self.hostname)),
        }
    }

    fn handle_helo(&mut self, domain: String, extended: bool) -> Dispatch {
        self.identity.helo_domain = Some(domain);
        self.envelope.reset();
        self.state = State::Greeted;
        let response = if extended {
            Response::ehlo_ok(&self.hostname, self.max_message_bytes, self.starttls_available)
        } else {
            Response::helo_ok(&self.hostname)
        };
        Dispatch::Reply(response)
    }

    fn handle_starttls(&mut self) -> Dispatch {
        if !self.starttls_available || self.tls_active {
            return Dispatch::Reply(Response::starttls_unavailable());
        }
        if self.state == State::Connected {
            return Dispatch::Reply(Response::bad_sequence());
        }
        self.envelope.reset();
        self.state = State::Greeted;
        self.tls_active = true;
        Dispatch::Upgrade(Response::starttls_ready())
    }

    async fn handle_mail_from(&mut self, address: utils::EmailAddress, size: Option<u64>) -> Dispatch {
        if self.state != State::Greeted {
            return Dispatch::Reply(Response::bad_sequence());
        }
        if let Some(declared) = size {
            if declared > self.max_message_bytes {
                return Dispatch::Reply(Response::message_too_large());
            }
        }
        if !self.sink.has_capacity() {
            return Dispatch::Reply(Response::queue_full());
        }

        self.envelope.mail_from = Some(address.to_string());
        self.envelope.declared_size = size;
        self.state = State::Envelope;
        Dispatch::Reply(Response::mail_ok())
    }

    async fn handle_rcpt_to(&mut self, address: utils::EmailAddress) -> Dispatch {
        if self.state != State::Envelope {
            return Dispatch::Reply(Response::bad_sequence());
        }

        let (local, domain) = address.normalized();
        match tokio::time::timeout(
            RECIPIENT_LOOKUP_DEADLINE,
            self.store.lookup_alias(&local, &domain),
        )
        .await
        {
            Err(_) => return Dispatch::Reply(Response::store_unavailable()),
            Ok(Ok(lookup)) if lookup.alias.is_effectively_active(Utc::now()) => {
                match self.check_quota(&lookup).await {
                    Some(denied) => return denied,
                    None => {}
                }
                self.envelope
                    .recipients
                    .push(ResolvedRecipient::Alias { address: address.to_string(), lookup });
                return Dispatch::Reply(Response::rcpt_ok());
            }
            Ok(_) => {}
        }

        match tokio::time::timeout(RECIPIENT_LOOKUP_DEADLINE, self.store.lookup_catch_all(&domain))
            .await
        {
            Err(_) => Dispatch::Reply(Response::store_unavailable()),
            Ok(Err(_)) => Dispatch::Reply(Response::store_unavailable()),
            Ok(Ok(Some(target))) => {
                let Ok(domain_rec) = self.store.get_domain_by_name(&domain).await else {
                    return Dispatch::Reply(Response::store_unavailable());
                };
                match self.store.quota_check(&domain_rec.organization_id, QuotaKind::MessagesInPeriod).await {
                    Ok(true) => {}
                    Ok(false) => return Dispatch::Reply(Response::queue_full()),
                    Err(_) => return Dispatch::Reply(Response::store_unavailable()),
                }
                self.envelope.recipients.push(ResolvedRecipient::CatchAll {
                    address: address.to_string(),
                    domain_id: domain_rec.id.clone(),
                    domain_name: domain_rec.name.clone(),
                    organization_id: domain_rec.organization_id.clone(),
                    forward_to: target,
                });
                Dispatch::Reply(Response::rcpt_ok())
            }
            Ok(Ok(None)) => Dispatch::Reply(Response::user_unknown()),
        }
    }

    /// Runs `QuotaCheck` for a resolved alias recipient. Returns `Some` with
    /// the reply to send when the recipient must be rejected, `None` when
    /// the caller should proceed to accept it.
    async fn check_quota(&self, lookup: &AliasLookup) -> Option<Dispatch> {
        match self
            .store
            .quota_check(&lookup.organization.id, QuotaKind::MessagesInPeriod)
            .await
        {
            Ok(true) => None,
            Ok(false) => Some(Dispatch::Reply(Response::queue_full())),
            Err(_) => Some(Dispatch::Reply(Response::store_unavailable())),
        }
    }

    fn handle_data(&mut self) -> Dispatch {
        if self.state != State::Envelope || self.envelope.recipients.is_empty() {
            return Dispatch::Reply(Response::bad_sequence());
        }
        self.data_buffer.clear();
        self.state = State::Receiving;
        Dispatch::EnterData
    }

    /// Feeds one CRLF-stripped line of the message body. Returns `Some` once
    /// the terminating `.` line is seen, with the final response to send.
    pub async fn feed_data_line(&mut self, line: &str) -> Option<Response> {
        debug_assert_eq!(self.state, State::Receiving);

        if line == "." {
            let response = self.finalize_message().await;
            self.data_buffer.clear();
            self.envelope.reset();
            self.state = State::Greeted;
            return Some(response);
        }

        // Transparency per RFC 5321 §4.5.2: a line beginning with '.' is
        // sent as '..' by a compliant client and destuffed here.
        let destuffed = line.strip_prefix('.').unwrap_or(line);
        self.data_buffer.extend_from_slice(destuffed.as_bytes());
        self.data_buffer.extend_from_slice(b"\r\n");

        if self.data_buffer.len() as u64 > self.max_message_bytes {
            let response = Response::message_too_large();
            self.data_buffer.clear();
            self.envelope.reset();
            self.state = State::Greeted;
            return Some(response);
        }

        None
    }

    async fn finalize_message(&mut self) -> Response {
        let mail_from = self
            .envelope
            .mail_from
            .clone()
            .unwrap_or_else(|| "<>".to_string());
        let headers = extract_headers(&self.data_buffer, &mail_from, &self.hostname);
        let size_bytes = self.data_buffer.len() as u64;
        let now = Utc::now();

        let mut last_id = None;
        for recipient in self.envelope.recipients.clone() {
            // Fan-out (spec §4.6 Step 1): a multi-target alias gets one
            // Message Record per target, sharing this message-id. Done here
            // rather than in the Forwarder because the full target list is
            // only available while the alias lookup from RCPT TO is still in
            // hand; the Store has no by-id alias lookup for the Forwarder to
            // rediscover it from a bare `alias_id`.
            let targets: Vec<(Id, Option<Id>, String)> = match &recipient {
                ResolvedRecipient::Alias { lookup, .. } => lookup
                    .alias
                    .targets
                    .iter()
                    .map(|target| (lookup.domain.id.clone(), Some(lookup.alias.id.clone()), target.clone()))
                    .collect(),
                ResolvedRecipient::CatchAll { domain_id, forward_to, .. } => {
                    vec![(domain_id.clone(), None, forward_to.clone())]
                }
            };

            for (domain_id, alias_id, forward_to) in targets {
                let record = MessageRecord {
                    id: utils::new_id(),
                    message_id: headers.message_id.clone(),
                    domain_id,
                    alias_id,
                    envelope_sender: mail_from.clone(),
                    envelope_recipient: recipient.address().to_string(),
                    forward_to,
                    subject: headers.subject.clone(),
                    size_bytes,
                    status: MessageStatus::Accepted,
                    delivery_attempts: 0,
                    last_error_class: None,
                    last_error_detail: None,
                    created_at: now,
                    updated_at: now,
                };

                if self.store.create_message(record.clone()).await.is_err() {
                    return Response::store_unavailable();
                }
                last_id = Some(record.id.clone());
                self.sink.submit_for_forwarding(record, self.data_buffer.clone()).await;
            }
        }

        match last_id {
            Some(id) => Response::queued(&id),
            None => Response::store_unavailable(),
        }
    }
}

/// Classifies a Store failure as `451 4.3.0` (spec §7: "if Store is
/// unreachable at SMTP Receiver's recipient check, respond 451 4.3.0"). Not
/// used directly — kept close to the rejection taxonomy so future call
/// sites that need the same classification (e.g. `reap_stalled_forwarding`
/// callers) don't have to rediscover it.
pub fn classify_store_failure(_error: &store::StoreError) -> ErrorClass {
    ErrorClass::Transient
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use store::memory::MemoryStore;
    use store::model::{Alias, Domain, Organization, PlanTier, VerificationState};

    struct NullSink;

    #[async_trait::async_trait]
    impl ForwardingSink for NullSink {
        fn has_capacity(&self) -> bool {
            true
        }
        async fn submit_for_forwarding(&self, _record: MessageRecord, _raw_message: Vec<u8>) {}
    }

    struct FullSink;

    #[async_trait::async_trait]
    impl ForwardingSink for FullSink {
        fn has_capacity(&self) -> bool {
            false
        }
        async fn submit_for_forwarding(&self, _record: MessageRecord, _raw_message: Vec<u8>) {}
    }

    fn identity() -> ClientIdentity {
        ClientIdentity {
            remote_ip: "198.51.100.10".parse::<IpAddr>().unwrap(),
            helo_domain: None,
            connected_at: Utc::now(),
        }
    }

    async fn seeded_store() -> Arc<dyn Store> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create_organization(Organization {
                id: "org1".into(),
                name: "Example Org".into(),
                plan_tier: PlanTier::Business,
                domain_quota: 10,
                message_quota_per_period: 1000,
                billing_email: "billing@example.com".into(),
            })
            .await
            .unwrap();
        store
            .create_domain(Domain {
                id: "dom1".into(),
                name: "example.com".into(),
                organization_id: "org1".into(),
                verification_state: VerificationState::Verified,
                catch_all_target: Some("admin@example.com".into()),
                dkim_selector: "default".into(),
                created_at: now,
                updated_at: now,
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
                created_at: now,
            })
            .await
            .unwrap();
        Arc::new(store)
    }

    async fn session_with(sink: Arc<dyn ForwardingSink>) -> Session {
        let store = seeded_store().await;
        Session::new(identity(), store, sink, "mail.example.com".into(), 25 * 1024 * 1024, true)
    }

    #[tokio::test]
    async fn happy_path_direct_delivery_flow() {
        let mut session = session_with(Arc::new(NullSink)).await;

        assert!(matches!(session.dispatch("EHLO client.test").await, Dispatch::Reply(_)));
        assert!(matches!(
            session.dispatch("MAIL FROM:<sender@external.test>").await,
            Dispatch::Reply(_)
        ));
        let rcpt = session.dispatch("RCPT TO:<hello@example.com>").await;
        match rcpt {
            Dispatch::Reply(r) => assert!(r.is_success()),
            _ => panic!("expected reply"),
        }
        match session.dispatch("DATA").await {
            Dispatch::EnterData => {}
            _ => panic!("expected EnterData"),
        }
        assert!(session.feed_data_line("Subject: hi").await.is_none());
        assert!(session.feed_data_line("").await.is_none());
        assert!(session.feed_data_line("Hello").await.is_none());
        let final_response = session.feed_data_line(".").await.unwrap();
        assert_eq!(final_response.code, 250);
        assert_eq!(session.state, State::Greeted);
    }

    #[tokio::test]
    async fn unknown_recipient_is_rejected_with_550() {
        let mut session = session_with(Arc::new(NullSink)).await;
        session.dispatch("EHLO client.test").await;
        session.dispatch("MAIL FROM:<sender@external.test>").await;
        let rcpt = session.dispatch("RCPT TO:<nonexistent@example.com>").await;
        match rcpt {
            Dispatch::Reply(r) => assert_eq!(r.code, 550),
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn catch_all_recipient_resolves_with_null_alias() {
        let mut session = session_with(Arc::new(NullSink)).await;
        session.dispatch("EHLO client.test").await;
        session.dispatch("MAIL FROM:<sender@external.test>").await;
        session.dispatch("RCPT TO:<whatever@example.com>").await;

        match &session.envelope.recipients[0] {
            ResolvedRecipient::CatchAll { forward_to, .. } => {
                assert_eq!(forward_to, "admin@example.com");
            }
            other => panic!("expected catch-all, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_mail_from_with_452() {
        let mut session = session_with(Arc::new(FullSink)).await;
        session.dispatch("EHLO client.test").await;
        let response = session.dispatch("MAIL FROM:<sender@external.test>").await;
        match response {
            Dispatch::Reply(r) => assert_eq!(r.code, 452),
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn rcpt_before_mail_from_is_bad_sequence() {
        let mut session = session_with(Arc::new(NullSink)).await;
        session.dispatch("EHLO client.test").await;
        let response = session.dispatch("RCPT TO:<hello@example.com>").await;
        match response {
            Dispatch::Reply(r) => assert_eq!(r.code, 503),
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_with_552() {
        let mut session = session_with(Arc::new(NullSink)).await;
        session.max_message_bytes = 10;
        session.dispatch("EHLO client.test").await;
        session.dispatch("MAIL FROM:<sender@external.test>").await;
        session.dispatch("RCPT TO:<hello@example.com>").await;
        session.dispatch("DATA").await;
        let response = session.feed_data_line("this line is definitely longer than ten bytes").await;
        assert_eq!(response.unwrap().code, 552);
        assert_eq!(session.state, State::Greeted);
    }
}

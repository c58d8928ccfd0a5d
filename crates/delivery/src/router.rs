//! Delivery Router (spec §4.7): given a prepared message, selects direct MX
//! delivery, an external relay, or a hybrid of the two, executes the
//! outbound SMTP conversation, and classifies the result into the
//! delivered/transient/permanent taxonomy [`DeliveryError`] carries.
//!
//! Modeled on the outbound send loop of a real forwarding gateway
//! (`send_single_message`/`send_single_upstream` in a remailer's handler
//! module): resolve MX, sort by preference, try each host in turn with
//! `mail-send`'s `SmtpClientBuilder`, and keep trying the next host on any
//! transient failure before giving up.

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::config::{Config, StartTlsMode};
use dns::DnsResolver;
use mail_send::{Credentials, SmtpClientBuilder};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::{
    error::{classify_mail_send_error, DeliveryError},
    pool::PooledClient,
};

/// Default per-destination-domain concurrency cap (spec §4.7: "default 4
/// concurrent sessions per recipient domain").
pub const DEFAULT_CONCURRENCY_PER_DOMAIN: usize = 4;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(60);
const DIRECT_PORT: u16 = 25;

/// A message ready to hand to an outbound SMTP conversation: the rewritten
/// envelope (bounce sender, real target) and the final byte stream with
/// every header the Forwarder prepended already in place.
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub envelope_from: String,
    pub envelope_to: String,
    pub body: Vec<u8>,
}

impl PreparedMessage {
    /// The recipient's domain, used for MX resolution and the per-domain
    /// concurrency gate. Panics if `envelope_to` has no `@` — callers only
    /// construct this from an already-validated [`utils::EmailAddress`].
    fn recipient_domain(&self) -> &str {
        self.envelope_to
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or(&self.envelope_to)
    }

    fn as_smtp_message(&self) -> mail_send::smtp::message::Message<'_> {
        mail_send::smtp::message::Message {
            mail_from: self.envelope_from.as_str().into(),
            rcpt_to: vec![self.envelope_to.as_str().into()],
            body: self.body.as_slice().into(),
        }
    }
}

/// Which path actually carried a delivered message, for the Message Record
/// (and, in hybrid mode, so the Forwarder knows a transient failure already
/// exhausted both routes this attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTaken {
    Direct,
    Relay,
}

pub struct Router {
    resolver: Arc<dyn DnsResolver>,
    hostname: String,
    starttls_mode: StartTlsMode,
    relay_host: Option<String>,
    relay_port: u16,
    relay_user: Option<String>,
    relay_pass: Option<String>,
    domain_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    pool: crate::pool::ConnectionPool,
    concurrency_per_domain: usize,
}

impl Router {
    pub fn new(resolver: Arc<dyn DnsResolver>, config: &Config) -> Self {
        Self {
            resolver,
            hostname: config.hostname.clone(),
            starttls_mode: config.starttls_mode,
            relay_host: config.relay_host.clone(),
            relay_port: config.relay_port.unwrap_or(587),
            relay_user: config.relay_user.clone(),
            relay_pass: config.relay_pass.clone(),
            domain_gates: Mutex::new(HashMap::new()),
            pool: crate::pool::ConnectionPool::new(),
            concurrency_per_domain: DEFAULT_CONCURRENCY_PER_DOMAIN,
        }
    }

    fn gate_for(&self, domain: &str) -> Arc<Semaphore> {
        let mut gates = self.domain_gates.lock();
        gates
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.concurrency_per_domain)))
            .clone()
    }

    /// Direct delivery (spec §4.7 "Direct"): resolve MX for the recipient
    /// domain, sort by preference (already done by [`DnsResolver::resolve_mx`]),
    /// and attempt each host in turn. Any network-level error tries the next
    /// MX; if all are exhausted, the whole attempt is transient.
    pub async fn deliver_direct(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        let domain = message.recipient_domain();
        let gate = self.gate_for(domain);
        let _permit = gate.acquire().await.expect("semaphore never closed");

        let hosts = self.resolve_direct_hosts(domain).await?;
        let mut last_err = DeliveryError::MxExhausted;

        for host in hosts {
            match self.try_send(&host, DIRECT_PORT, &message.as_smtp_message(), false).await {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Relay delivery (spec §4.7 "Relay"): always through the configured
    /// relay host with required STARTTLS and AUTH.
    pub async fn deliver_relay(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        let host = self.relay_host.clone().ok_or(DeliveryError::RelayNotConfigured)?;
        let gate = self.gate_for(&host);
        let _permit = gate.acquire().await.expect("semaphore never closed");
        self.try_send(&host, self.relay_port, &message.as_smtp_message(), true).await
    }

    /// Hybrid delivery (spec §4.7 "Hybrid"): attempt direct first; on any
    /// transient failure, fall back to the relay within the same attempt.
    /// The result reported up is the relay's outcome once direct has been
    /// tried — per spec.md's Open Questions, the source's exact fallback
    /// timing wasn't inspected line-by-line, so this resolves the
    /// ambiguity as "one hybrid attempt = direct, then relay, both within
    /// the same retry-loop iteration" rather than treating the fallback as
    /// a separate retry (see DESIGN.md).
    pub async fn deliver_hybrid(&self, message: &PreparedMessage) -> Result<RouteTaken, DeliveryError> {
        match self.deliver_direct(message).await {
            Ok(()) => Ok(RouteTaken::Direct),
            Err(err) if !err.is_transient() => Err(err),
            Err(_) => self.deliver_relay(message).await.map(|()| RouteTaken::Relay),
        }
    }

    async fn resolve_direct_hosts(&self, domain: &str) -> Result<Vec<String>, DeliveryError> {
        match self.resolver.resolve_mx(domain).await {
            Ok(records) if !records.is_empty() => {
                Ok(records.into_iter().map(|r| r.exchange).collect())
            }
            // RFC 5321 §5.1 implicit MX: a domain with no MX record but a
            // resolvable address is its own mail exchanger.
            Ok(_) => Ok(vec![domain.to_string()]),
            Err(e) if e.is_transient() => Err(DeliveryError::Dns(e.to_string())),
            Err(_) => Err(DeliveryError::NoMxRecords),
        }
    }

    async fn try_send(
        &self,
        host: &str,
        port: u16,
        message: &mail_send::smtp::message::Message<'_>,
        is_relay: bool,
    ) -> Result<(), DeliveryError> {
        let key = format!("{host}:{port}");
        if let Some(mut pooled) = self.pool.take(&key).await {
            if pooled.send(message.clone()).await.is_ok() {
                self.pool.put(key, pooled).await;
                return Ok(());
            }
            // A pooled connection that's gone stale between `take`'s NOOP
            // check and `send` falls through to a fresh connect below.
        }

        let mut builder = SmtpClientBuilder::new(host, port)
            .helo_host(&self.hostname)
            .timeout(OUTBOUND_TIMEOUT)
            .implicit_tls(false);

        if is_relay {
            if let (Some(user), Some(pass)) = (&self.relay_user, &self.relay_pass) {
                builder = builder.credentials(Credentials::Plain {
                    username: user.clone(),
                    secret: pass.clone(),
                });
            }
        }

        // Direct delivery is opportunistic on STARTTLS regardless of the
        // configured mode (spec §4.7: "required if MX advertises it;
        // opportunistic otherwise" — `mail-send`'s `connect()` upgrades
        // automatically when the peer advertises STARTTLS and otherwise
        // proceeds in the clear). Relay honors `starttls_mode=required` by
        // refusing to fall back to plaintext.
        let connect_plain_allowed = !is_relay && self.starttls_mode != StartTlsMode::Required;

        let mut client = if connect_plain_allowed {
            match builder.connect_plain().await {
                Ok(client) => PooledClient::Plain(client),
                Err(e) => return Err(classify_mail_send_error(&e)),
            }
        } else {
            match builder.connect().await {
                Ok(client) => PooledClient::Tls(client),
                Err(e) => return Err(classify_mail_send_error(&e)),
            }
        };

        match client.send(message.clone()).await {
            Ok(()) => {
                self.pool.put(key, client).await;
                Ok(())
            }
            Err(e) => Err(classify_mail_send_error(&e)),
        }
    }
}

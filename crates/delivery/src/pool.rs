//! Short-lived connection reuse (spec §4.7: "connection reuse within a
//! short window ... permitted when multiple messages target the same MX").
//!
//! `mail-send`'s [`mail_send::SmtpClient`] is generic over its transport, so
//! a pool that must hold either a plaintext or a TLS-upgraded connection
//! needs a small enum wrapper — the same shape `smtp::server::Conn` uses on
//! the inbound side to unify `TcpStream` and `TlsStream<TcpStream>`.

use std::{collections::HashMap, time::Duration};

use mail_send::SmtpClient;
use tokio::{net::TcpStream, sync::Mutex, time::Instant};
use tokio_rustls::client::TlsStream;

use crate::error::{classify_mail_send_error, DeliveryError};

/// How long an idle pooled connection is still considered warm enough to
/// reuse before it's dropped and a fresh one is opened (spec §4.7: "e.g.,
/// 60 s").
pub const REUSE_WINDOW: Duration = Duration::from_secs(60);

pub enum PooledClient {
    Plain(SmtpClient<TcpStream>),
    Tls(SmtpClient<TlsStream<TcpStream>>),
}

impl PooledClient {
    pub async fn send(&mut self, message: mail_send::smtp::message::Message<'_>) -> Result<(), mail_send::Error> {
        match self {
            PooledClient::Plain(client) => client.send(message).await,
            PooledClient::Tls(client) => client.send(message).await,
        }
    }

    pub async fn quit(self) {
        match self {
            PooledClient::Plain(client) => {
                let _ = client.quit().await;
            }
            PooledClient::Tls(client) => {
                let _ = client.quit().await;
            }
        }
    }
}

struct PoolEntry {
    client: PooledClient,
    cached_at: Instant,
}

/// Keyed by `"{mx_host}:{port}"`. A single `tokio::sync::Mutex`-guarded map
/// is plenty for this core's modest per-destination concurrency (spec §4.7
/// caps it at 4 sessions per domain by default) — contention here would
/// mean the cap itself is the bottleneck, not this lock.
#[derive(Default)]
pub struct ConnectionPool {
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a still-warm pooled connection for `key`, verifying it's alive
    /// with a NOOP before handing it back — a connection the far end has
    /// since closed is worse than no connection, since a caller expecting
    /// reuse won't re-attempt a fresh connect on its own.
    pub async fn take(&self, key: &str) -> Option<PooledClient> {
        let mut entries = self.entries.lock().await;
        let entry = entries.remove(key)?;
        if entry.cached_at.elapsed() > REUSE_WINDOW {
            return None;
        }
        let mut client = entry.client;
        match client.noop().await {
            Ok(_) => Some(client),
            Err(_) => None,
        }
    }

    pub async fn put(&self, key: String, client: PooledClient) {
        let mut entries = self.entries.lock().await;
        entries.insert(key, PoolEntry { client, cached_at: Instant::now() });
    }
}

/// Maps a send error through [`classify_mail_send_error`] for callers that
/// only have `mail_send::Error` in hand.
pub fn classify(error: mail_send::Error) -> DeliveryError {
    classify_mail_send_error(&error)
}

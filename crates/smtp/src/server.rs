//! TCP accept loop and per-connection driver (spec §4.5 "Concurrency",
//! §5 "Cancellation semantics"): one cooperative task per connection, an
//! idle timer per state, and a graceful drain on shutdown.

use std::{
    io,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use common::{config::StartTlsMode, ConnectionPolicy, ForwardingSink};
use dns::DnsResolver;
use store::Store;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::Notify,
};
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use crate::{
    connect::{self, ConnectOutcome},
    response::Response,
    session::{Dispatch, Session},
    state::ClientIdentity,
};

/// Idle timer while waiting for `EHLO`/`MAIL FROM`/`RCPT TO`/`DATA` (spec
/// §4.5: "30 s in CONNECTED").
const IDLE_TIMEOUT_COMMAND: Duration = Duration::from_secs(30);
/// Idle timer while accumulating the message body (spec §4.5: "5 min in
/// DATA").
const IDLE_TIMEOUT_DATA: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub listen_address: SocketAddr,
    pub hostname: String,
    pub max_message_bytes: u64,
    pub pregreet_delay: Duration,
    pub dnsbl_zones: Vec<String>,
    pub starttls_mode: StartTlsMode,
    /// Deadline given to in-flight sessions once shutdown begins (spec §5:
    /// "drain deadline (default 30 s)").
    pub drain_deadline: Duration,
}

/// A TCP or TLS-upgraded connection, unified so `drive` can read/write
/// without caring which. `TcpStream` and `TlsStream<TcpStream>` are both
/// `Unpin`, so delegating through `get_mut` needs no pin projection.
enum Conn {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_flush(cx),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Owns the listening socket and dispatches accepted connections to
/// [`Session`]. Cheap to clone-by-`Arc`; `run` and `shutdown` are called
/// from different tasks (the main task and a signal handler, typically).
pub struct Listener {
    config: ListenerConfig,
    store: Arc<dyn Store>,
    resolver: Arc<dyn DnsResolver>,
    sink: Arc<dyn ForwardingSink>,
    policy: Arc<ConnectionPolicy>,
    tls_acceptor: Option<TlsAcceptor>,
    stop_accepting: Notify,
    active_connections: AtomicUsize,
}

impl Listener {
    pub fn new(
        config: ListenerConfig,
        store: Arc<dyn Store>,
        resolver: Arc<dyn DnsResolver>,
        sink: Arc<dyn ForwardingSink>,
        policy: Arc<ConnectionPolicy>,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            sink,
            policy,
            tls_acceptor,
            stop_accepting: Notify::new(),
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Accepts connections until [`Self::begin_shutdown`] is called.
    pub async fn run(self: &Arc<Self>) -> io::Result<()> {
        let tcp_listener = TcpListener::bind(self.config.listen_address).await?;
        trc::event!(trc::Event::ConnectionAccepted, "listen_address" => self.config.listen_address.to_string());

        loop {
            tokio::select! {
                _ = self.stop_accepting.notified() => break,
                accepted = tcp_listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(_) => continue,
                    };
                    let this = Arc::clone(self);
                    this.active_connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        this.handle_connection(stream, addr).await;
                        this.active_connections.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }
        }
        Ok(())
    }

    /// Signals the accept loop to stop and waits up to `drain_deadline` for
    /// in-flight sessions to finish their current command (spec §5).
    pub async fn begin_shutdown(&self) {
        self.stop_accepting.notify_one();
        let deadline = tokio::time::Instant::now() + self.config.drain_deadline;
        while self.active_connections.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ip = addr.ip();
        if !self.policy.is_ip_allowed(&ip.to_string()) {
            return;
        }
        self.policy.register_connection(&ip.to_string());
        if let Err(error) = self.drive_connection(stream, ip).await {
            trc::event!(trc::Event::ConnectionTimedOut, "remote_ip" => ip.to_string(), "detail" => error.to_string());
        }
        self.policy.unregister_connection(&ip.to_string());
    }

    async fn drive_connection(&self, mut stream: TcpStream, ip: IpAddr) -> io::Result<()> {
        let mut peek_buf = [0u8; 1];
        let connect_outcome =
            connect::pregreet_gate(self.config.pregreet_delay, || async {
                let _ = stream.peek(&mut peek_buf).await;
            })
            .await;

        if connect_outcome == ConnectOutcome::PregreetViolation {
            trc::event!(trc::Event::PregreetViolation, "remote_ip" => ip.to_string());
            let _ = stream.write_all(Response::pregreet_rejected().to_string().as_bytes()).await;
            return Ok(());
        }

        let (dnsbl_outcome, _ptr_names) =
            connect::check_connection(self.resolver.as_ref(), ip, &self.config.dnsbl_zones).await;
        if let ConnectOutcome::DnsblHit { zone } = dnsbl_outcome {
            trc::event!(trc::Event::DnsblHit, "remote_ip" => ip.to_string(), "zone" => zone.clone());
            let _ = stream.write_all(Response::dnsbl_rejected(&zone).to_string().as_bytes()).await;
            return Ok(());
        }

        let mut conn = Conn::Plain(stream);
        conn.write_all(Response::ready(&self.config.hostname).to_string().as_bytes()).await?;

        let identity = ClientIdentity { remote_ip: ip, helo_domain: None, connected_at: chrono::Utc::now() };
        let starttls_available = self.config.starttls_mode != StartTlsMode::Off && self.tls_acceptor.is_some();
        let mut session = Session::new(
            identity,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            self.config.hostname.clone(),
            self.config.max_message_bytes,
            starttls_available,
        );

        let mut reader = BufReader::new(conn);
        let mut line = String::new();

        loop {
            line.clear();
            let idle = if session.state == crate::state::State::Receiving {
                IDLE_TIMEOUT_DATA
            } else {
                IDLE_TIMEOUT_COMMAND
            };

            let read = tokio::time::timeout(idle, reader.read_line(&mut line)).await;
            let bytes_read = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let _ = reader.write_all(Response::idle_timeout().to_string().as_bytes()).await;
                    return Ok(());
                }
            };
            if bytes_read == 0 {
                return Ok(()); // client disconnected
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);

            if session.state == crate::state::State::Receiving {
                if let Some(response) = session.feed_data_line(trimmed).await {
                    reader.write_all(response.to_string().as_bytes()).await?;
                }
                continue;
            }

            match session.dispatch(trimmed).await {
                Dispatch::Reply(response) => {
                    reader.write_all(response.to_string().as_bytes()).await?;
                }
                Dispatch::ReplyAndClose(response) => {
                    reader.write_all(response.to_string().as_bytes()).await?;
                    return Ok(());
                }
                Dispatch::EnterData => {
                    reader.write_all(Response::data_go_ahead().to_string().as_bytes()).await?;
                }
                Dispatch::Upgrade(response) => {
                    reader.write_all(response.to_string().as_bytes()).await?;
                    reader = self.upgrade_to_tls(reader).await?;
                }
            }
        }
    }

    async fn upgrade_to_tls(&self, reader: BufReader<Conn>) -> io::Result<BufReader<Conn>> {
        let acceptor = self
            .tls_acceptor
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "STARTTLS requested with no TLS acceptor configured"))?;
        let plain = match reader.into_inner() {
            Conn::Plain(stream) => stream,
            Conn::Tls(_) => return Err(io::Error::new(io::ErrorKind::Other, "TLS already active")),
        };
        let tls_stream = acceptor.accept(plain).await?;
        Ok(BufReader::new(Conn::Tls(Box::new(tls_stream))))
    }
}

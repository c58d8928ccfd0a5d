// SPDX-FileCopyrightText: 2026 Forwardcore Project
//
// SPDX-License-Identifier: Apache-2.0

//! Process entry point: loads configuration, wires the Store, DNS Resolver,
//! DKIM Engine, Delivery Router, Forwarder queue, and SMTP Listener
//! described in spec §2 together, runs the startup recovery scan (spec §7)
//! and the periodic verification refresh (spec §4.4), and drives the
//! graceful-shutdown sequence (spec §5) on SIGINT/SIGTERM.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use common::{
    config::{Config, StartTlsMode},
    security::{
        rate_limiting::{RateLimitAlgorithm, RateLimitConfig},
        ConnectionPolicy, SecurityConfig,
    },
    tls,
};
use dkim::DkimEngine;
use delivery::{DeliveryBackend, Router};
use dns::{CachedResolver, DnsResolver};
use forwarder::{ForwarderQueue, Pipeline};
use smtp::{Listener, ListenerConfig};
use store::{MemoryStore, Store};
use verification::VerificationService;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Drain deadline for in-flight SMTP sessions on shutdown (spec §5).
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Command-line surface for the forwarding core daemon. Mirrors the
/// teacher's `cli` crate's use of `clap` for its own administrative
/// surface, scoped down to the single option this binary needs.
#[derive(Parser, Debug)]
#[command(name = "forwardcore", version, about = "Email aliasing and forwarding service core")]
struct Args {
    /// Path to the TOML configuration file (spec §6).
    #[arg(long, env = "FORWARDCORE_CONFIG", default_value = "/etc/forwardcore/config.toml")]
    config: String,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    trc::set_collector(Arc::new(trc::StdoutCollector { min_level: trc::Level::Info }));
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = match Config::from_file(&args.config) {
        Ok(config) => Arc::new(config),
        Err(error) => {
            eprintln!("failed to load configuration: {error}");
            std::process::exit(1);
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting forwardcore");

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let resolver: Arc<dyn DnsResolver> = match CachedResolver::new() {
        Ok(resolver) => Arc::new(resolver),
        Err(error) => {
            eprintln!("failed to initialize DNS resolver: {error}");
            std::process::exit(1);
        }
    };

    let dkim = Arc::new(DkimEngine::new(Arc::clone(&store), config.dkim_key_size as usize));

    let backend: Arc<dyn DeliveryBackend> = Arc::new(Router::new(Arc::clone(&resolver), &config));

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&dkim),
        backend,
        Arc::clone(&config),
    ));
    let (sink, forwarder_handle) = ForwarderQueue::spawn(pipeline, config.forwarder_queue_capacity as usize);

    recover_stalled(&store, config.recovery_window()).await;

    let verification = Arc::new(VerificationService::new(
        Arc::clone(&store),
        Arc::clone(&resolver),
        config.hostname.clone(),
        config.hostname.clone(),
    ));
    tokio::spawn(run_verification_refresh(
        Arc::clone(&store),
        Arc::clone(&verification),
        config.verification_refresh_interval(),
    ));

    let tls_acceptor = if config.starttls_mode != StartTlsMode::Off {
        match (&config.tls_cert_path, &config.tls_key_path) {
            (Some(cert), Some(key)) => match tls::load_acceptor(cert, key) {
                Ok(acceptor) => Some(acceptor),
                Err(error) => {
                    eprintln!("failed to load TLS material: {error}");
                    std::process::exit(1);
                }
            },
            _ => None,
        }
    } else {
        None
    };

    let policy = Arc::new(ConnectionPolicy::new(SecurityConfig {
        max_request_size: config.max_message_bytes as usize,
        max_connections_per_ip: config.max_connections_per_ip,
        rate_limit: RateLimitConfig {
            algorithm: RateLimitAlgorithm::LeakyBucket,
            ..RateLimitConfig::default()
        },
        blocked_ips: Vec::new(),
    }));

    let listener_config = ListenerConfig {
        listen_address: config.listen_address,
        hostname: config.hostname.clone(),
        max_message_bytes: config.max_message_bytes,
        pregreet_delay: config.pregreet_delay(),
        dnsbl_zones: config.dnsbl_zones.clone(),
        starttls_mode: config.starttls_mode,
        drain_deadline: DRAIN_DEADLINE,
    };
    let listener = Arc::new(Listener::new(listener_config, store, resolver, sink, policy, tls_acceptor));

    let accept_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            if let Err(error) = listener.run().await {
                tracing::error!(%error, "SMTP listener stopped");
            }
        })
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");

    listener.begin_shutdown().await;
    forwarder_handle.drain(config.retry_deadline().min(DRAIN_DEADLINE)).await;
    accept_task.abort();

    tracing::info!("forwardcore stopped");
    Ok(())
}

/// Startup recovery scan (spec §7): records stuck in `forwarding` with no
/// update within the recovery window are logged as recovered. Raw message
/// bytes are not part of the persisted Message Record (spec §1 non-goal:
/// "does not store messages long-term"), so a record found here cannot be
/// re-delivered from this process alone — it is left for operator
/// attention via the activity log rather than silently dropped.
async fn recover_stalled(store: &Arc<dyn Store>, recovery_window: Duration) {
    let stalled = match store
        .reap_stalled_forwarding(chrono::Duration::from_std(recovery_window).unwrap_or(chrono::Duration::minutes(10)), Utc::now())
        .await
    {
        Ok(records) => records,
        Err(error) => {
            tracing::error!(%error, "recovery scan failed");
            return;
        }
    };

    for record in stalled {
        trc::event!(trc::Event::MessageRecovered, "record_id" => record.id.clone(), "attempts" => record.delivery_attempts.to_string());
        let _ = store
            .update_message_status(
                &record.id,
                store::model::MessageStatus::Failed,
                Some((
                    store::model::ErrorClass::Transient,
                    "stalled in forwarding across a restart; raw message not retained for replay".to_string(),
                )),
                None,
            )
            .await;
    }
}

/// Periodic re-verification of every managed domain (spec §4.4: "periodic
/// refresh with jitter"). Jitter is applied per tick so that many domains
/// verified around the same time don't all hammer DNS in lockstep.
async fn run_verification_refresh(store: Arc<dyn Store>, verification: Arc<VerificationService>, interval: Duration) {
    loop {
        let jitter_fraction = rand::rng().random::<f64>() * 0.2 - 0.1;
        let jittered = interval.as_secs_f64() * (1.0 + jitter_fraction);
        tokio::time::sleep(Duration::from_secs_f64(jittered.max(1.0))).await;

        let domains = match store.list_active_domains().await {
            Ok(domains) => domains,
            Err(error) => {
                tracing::error!(%error, "periodic verification scan failed to list domains");
                continue;
            }
        };

        for domain in domains {
            if let Err(error) = verification.verify_domain(&domain.id).await {
                tracing::warn!(domain = %domain.name, %error, "periodic verification failed");
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

//! The pre-greeting connection gate (spec §4.5 "Pre-greeting gate
//! (postscreen-style)"): after accept, hold the banner for a configured
//! delay; any bytes received before it is written classify the connection
//! as a pregreet violation. Combined with the DNSBL check and the
//! supplemented PTR lookup (spec.md lists PTR as a record type but only
//! prescribes it for "sender reputation" in the abstract — this core
//! consults it here, at connect time, as the concrete use of that
//! prescription).

use std::net::IpAddr;

use dns::DnsResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Proceed to send the banner and enter `GREETED`.
    Accept,
    /// Client spoke before the banner — reject `521 5.7.1` (spec §4.5, S2).
    PregreetViolation,
    /// Remote IP hit a configured DNSBL zone — reject `554 5.7.1`.
    DnsblHit { zone: String },
}

/// Runs the DNSBL check and the supplemented PTR lookup concurrently. The
/// PTR result is informational only (recorded on the security event); it
/// does not by itself reject the connection.
pub async fn check_connection(
    resolver: &dyn DnsResolver,
    remote_ip: IpAddr,
    dnsbl_zones: &[String],
) -> (ConnectOutcome, Vec<String>) {
    let (dnsbl, ptr) = tokio::join!(
        resolver.check_dnsbl(remote_ip, dnsbl_zones),
        resolver.resolve_ptr(remote_ip),
    );

    let ptr_names = ptr.unwrap_or_default();
    let outcome = match dnsbl {
        Ok(Some(zone)) => ConnectOutcome::DnsblHit { zone },
        _ => ConnectOutcome::Accept,
    };
    (outcome, ptr_names)
}

/// Races the pregreet delay against the first byte read from the client.
/// Returns [`ConnectOutcome::PregreetViolation`] if bytes arrive first,
/// otherwise [`ConnectOutcome::Accept`] once the delay elapses.
///
/// `peek` must return as soon as at least one byte is available on the
/// socket without consuming it (a TCP peek), so a legitimate pipelined
/// `EHLO` sent immediately after the (delayed) banner is unaffected.
pub async fn pregreet_gate<F, Fut>(delay: std::time::Duration, peek: F) -> ConnectOutcome
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    tokio::select! {
        _ = tokio::time::sleep(delay) => ConnectOutcome::Accept,
        _ = peek() => ConnectOutcome::PregreetViolation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns::TestResolver;
    use std::time::Duration;

    #[tokio::test]
    async fn dnsbl_hit_rejects() {
        let resolver = TestResolver::new();
        resolver.insert_a(
            "10.100.51.198.zen.spamhaus.org",
            Ok(vec!["127.0.0.2".parse().unwrap()]),
        );
        let (outcome, _) = check_connection(
            &resolver,
            "198.51.100.10".parse().unwrap(),
            &["zen.spamhaus.org".to_string()],
        )
        .await;
        assert_eq!(
            outcome,
            ConnectOutcome::DnsblHit {
                zone: "zen.spamhaus.org".to_string()
            }
        );
    }

    #[tokio::test]
    async fn clean_ip_accepts() {
        let resolver = TestResolver::new();
        let (outcome, _) = check_connection(&resolver, "198.51.100.10".parse().unwrap(), &[]).await;
        assert_eq!(outcome, ConnectOutcome::Accept);
    }

    #[tokio::test]
    async fn early_bytes_trigger_pregreet_violation() {
        let outcome = pregreet_gate(Duration::from_millis(50), || async {
            // Simulates a client that speaks immediately.
        })
        .await;
        assert_eq!(outcome, ConnectOutcome::PregreetViolation);
    }

    #[tokio::test]
    async fn silence_through_the_delay_accepts() {
        let outcome = pregreet_gate(Duration::from_millis(10), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert_eq!(outcome, ConnectOutcome::Accept);
    }
}

// SPDX-FileCopyrightText: 2026 Forwardcore Project
//
// SPDX-License-Identifier: Apache-2.0

//! Structured event vocabulary shared by every component of the forwarding
//! core: the SMTP receiver, the forwarding pipeline, the DKIM engine, the DNS
//! resolver/verification service, and the store.
//!
//! Unlike a free-text log line, an [`Event`] carries typed fields (domain,
//! alias, message id, error kind) so that a [`Collector`] can index, count, or
//! export them without re-parsing strings. This mirrors the split the
//! teacher's codebase draws between its ring-buffer event-collector crate and
//! plain `tracing` calls: this crate is the former, scoped down to the
//! vocabulary this core actually emits.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;

mod fields;
pub use fields::EventField;

/// Severity of an emitted event, ordered least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// The vocabulary of significant occurrences this core can emit.
///
/// Each variant corresponds to a point in the data flow described in the
/// component design: SMTP session lifecycle, forwarding pipeline steps, DKIM
/// signing, DNS resolution, and domain verification.
#[derive(Debug, Clone)]
pub enum Event {
    // --- SMTP Receiver ---
    ConnectionAccepted,
    PregreetViolation,
    DnsblHit,
    ConnectionRateLimited,
    CommandRejected,
    RecipientUnknown,
    QuotaExceeded,
    MessageAccepted,
    ConnectionTimedOut,

    // --- Forwarder ---
    ForwardingStarted,
    HeaderRewritten,
    CatchAllUsed,
    DeliverySucceeded,
    DeliveryBounced,
    DeliveryFailed,
    BounceGenerated,
    MessageRecovered,

    // --- DKIM Engine ---
    KeypairGenerated,
    KeypairRotated,
    SigningSucceeded,
    SigningSkippedNoKey,

    // --- DNS Resolver / Verification Service ---
    DnsLookup,
    DnsLookupFailed,
    DomainVerified,
    DomainPartiallyVerified,
    DomainUnverified,
}

impl Event {
    /// The default severity for this kind of event when no explicit level is
    /// supplied to [`EventDetails::new`].
    pub fn default_level(&self) -> Level {
        use Event::*;
        match self {
            PregreetViolation | DnsblHit | QuotaExceeded | DeliveryBounced | DeliveryFailed
            | RecipientUnknown => Level::Warn,
            DnsLookupFailed | SigningSkippedNoKey | ConnectionTimedOut => Level::Warn,
            CommandRejected | ConnectionRateLimited => Level::Info,
            _ => Level::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A fully materialized event: the [`Event`] kind, its [`Level`], and an
/// ordered list of structured fields describing it.
#[derive(Debug, Clone)]
pub struct EventDetails {
    pub event: Event,
    pub level: Level,
    pub fields: Vec<(&'static str, EventField)>,
}

impl EventDetails {
    pub fn new(event: Event) -> Self {
        let level = event.default_level();
        Self {
            event,
            level,
            fields: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with(mut self, key: &'static str, value: impl Into<EventField>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    pub fn field(&self, key: &str) -> Option<&EventField> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// Sink for [`EventDetails`]. Implementations must be cheap to call from the
/// hot path (SMTP command handling, forwarding decisions) — they should
/// buffer or drop rather than block.
pub trait Collector: Send + Sync {
    fn collect(&self, event: &EventDetails);
}

/// Collector that writes a single structured line per event to stdout.
/// Used by the `main` binary unless a quieter collector is configured.
pub struct StdoutCollector {
    pub min_level: Level,
}

impl Collector for StdoutCollector {
    fn collect(&self, event: &EventDetails) {
        if event.level < self.min_level {
            return;
        }
        let mut line = format!("level={:?} event={}", event.level, event.event);
        for (key, value) in &event.fields {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&value.to_string());
        }
        println!("{line}");
    }
}

/// Collector that discards everything. Used in unit tests so assertions
/// aren't interleaved with event output.
pub struct NullCollector;

impl Collector for NullCollector {
    fn collect(&self, _event: &EventDetails) {}
}

/// Process-wide collector handle. Set once at startup via [`set_collector`];
/// read by the [`event!`] macro. Defaults to [`NullCollector`] so library
/// code and tests never panic on an unconfigured collector.
static COLLECTOR: RwLock<Option<Arc<dyn Collector>>> = RwLock::new(None);

pub fn set_collector(collector: Arc<dyn Collector>) {
    *COLLECTOR.write() = Some(collector);
}

pub fn emit(details: EventDetails) {
    if let Some(collector) = COLLECTOR.read().as_ref() {
        collector.collect(&details);
    }
}

/// Builds an [`EventDetails`] and emits it through the process-wide
/// collector in one call.
///
/// ```ignore
/// trc::event!(trc::Event::PregreetViolation, "remote_ip" => addr.to_string());
/// ```
#[macro_export]
macro_rules! event {
    ($event:expr $(, $key:literal => $value:expr)* $(,)?) => {{
        let mut details = $crate::EventDetails::new($event);
        $( details = details.with($key, $value); )*
        $crate::emit(details);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCollector(AtomicUsize);

    impl Collector for CountingCollector {
        fn collect(&self, _event: &EventDetails) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn event_details_carries_fields() {
        let details = EventDetails::new(Event::PregreetViolation)
            .with("remote_ip", "198.51.100.10")
            .with("bytes_before_banner", 14u64);
        assert_eq!(details.level, Level::Warn);
        assert_eq!(
            details.field("remote_ip").unwrap().to_string(),
            "198.51.100.10"
        );
        assert_eq!(details.field("bytes_before_banner").unwrap().to_string(), "14");
    }

    #[test]
    fn stdout_collector_filters_by_level() {
        let collector = CountingCollector(AtomicUsize::new(0));
        let low = EventDetails::new(Event::DnsLookup).with_level(Level::Trace);
        let high = EventDetails::new(Event::DnsblHit);
        collector.collect(&low);
        collector.collect(&high);
        assert_eq!(collector.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_levels_match_severity_of_policy_rejections() {
        assert_eq!(Event::DnsblHit.default_level(), Level::Warn);
        assert_eq!(Event::MessageAccepted.default_level(), Level::Info);
    }
}

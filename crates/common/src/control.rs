//! The control-plane surface this core exposes to its own components (spec
//! §6): `SubmitForForwarding`, consumed by the Forwarder from the SMTP
//! Receiver. `TriggerVerification`/`TriggerKeyRotation` are plain async
//! methods on `verification::VerificationService`/`dkim::DkimEngine`
//! respectively and don't need a trait — only the Receiver/Forwarder
//! boundary crosses a crate that must not depend on the other (smtp must
//! not depend on forwarder, so the hand-off is an interface owned here).

use async_trait::async_trait;
use store::model::MessageRecord;

/// Implemented by the Forwarder's queue front-end; consumed by the SMTP
/// Receiver at `RCPT TO` (capacity check, spec §5: "if full, `MAIL FROM` is
/// rejected with `452`") and at DATA hand-off (spec §4.5, §6).
#[async_trait]
pub trait ForwardingSink: Send + Sync {
    /// Non-blocking backpressure check consulted before a session commits to
    /// receiving a message body.
    fn has_capacity(&self) -> bool;

    /// Hands off a freshly accepted Message Record and its raw RFC 5322
    /// bytes for asynchronous processing. Returns once the record is
    /// durably enqueued, not once it is delivered.
    async fn submit_for_forwarding(&self, record: MessageRecord, raw_message: Vec<u8>);
}

//! Valid Message Record status transitions (spec §3 invariant, §8 property 1):
//! `accepted -> forwarding -> {delivered | bounced | failed}`, with `failed`
//! permitted to retry back to `forwarding`. Once `delivered` or `rejected`,
//! no further transitions are allowed. `accepted -> rejected` covers messages
//! that fail validation before any forwarding attempt is made.

use crate::model::MessageStatus;

pub fn is_valid_transition(from: MessageStatus, to: MessageStatus) -> bool {
    use MessageStatus::*;
    matches!(
        (from, to),
        (Accepted, Forwarding)
            | (Accepted, Rejected)
            | (Forwarding, Forwarding)
            | (Forwarding, Delivered)
            | (Forwarding, Bounced)
            | (Forwarding, Failed)
            | (Failed, Forwarding)
    )
}

pub fn is_terminal(status: MessageStatus) -> bool {
    matches!(status, MessageStatus::Delivered | MessageStatus::Rejected)
}

//! Bounce message generation on final delivery failure (spec §4.6: "On
//! final failure, generate a bounce message to the original sender").
//! Built as an RFC 3464 `multipart/report; report-type=delivery-status`
//! with the conventional three parts: a human-readable explanation, the
//! machine-readable `message/delivery-status` fields, and the original
//! message's headers for reference.

use mail_send::mail_builder::{mime::MimePart, MessageBuilder};
use store::model::MessageRecord;

use crate::error::{ForwarderError, ForwarderResult};

fn original_headers_of(raw_message: &[u8]) -> String {
    String::from_utf8_lossy(raw_message)
        .split("\r\n\r\n")
        .next()
        .unwrap_or("")
        .to_string()
}

/// Builds the full RFC 5322 bytes of a delivery-status bounce, addressed to
/// `original_sender`, reporting the failure of `record`.
pub fn build_bounce_message(
    service_identity: &str,
    reporting_mta: &str,
    original_sender: &str,
    record: &MessageRecord,
    raw_message: &[u8],
    failure_detail: &str,
) -> ForwarderResult<Vec<u8>> {
    let human_readable = format!(
        "This is an automatically generated Delivery Status Notification.\r\n\r\n\
         Delivery to the following recipient failed permanently:\r\n\r\n\
         \t{}\r\n\r\n\
         Reason: {}\r\n",
        record.forward_to, failure_detail
    );

    let machine_readable = format!(
        "Reporting-MTA: dns;{reporting_mta}\r\n\
         Arrival-Date: {}\r\n\r\n\
         Final-Recipient: rfc822;{}\r\n\
         Action: failed\r\n\
         Status: 5.0.0\r\n\
         Diagnostic-Code: smtp;{}\r\n",
        record.created_at.to_rfc2822(),
        record.forward_to,
        failure_detail,
    );

    let original_headers = original_headers_of(raw_message);

    MessageBuilder::new()
        .from(("Mail Delivery System", service_identity))
        .to(vec![(String::new(), original_sender.to_string())])
        .subject(format!("Undeliverable: {}", record.subject))
        .body(MimePart::new(
            "multipart/report; report-type=delivery-status",
            vec![
                MimePart::new("text/plain; charset=utf-8", human_readable),
                MimePart::new("message/delivery-status", machine_readable),
                MimePart::new("text/rfc822-headers", original_headers),
            ],
        ))
        .write_to_vec()
        .map_err(|e| ForwarderError::BounceBuildFailed(e.to_string()))
}

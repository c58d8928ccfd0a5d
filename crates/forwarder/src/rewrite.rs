//! Header rewriting (spec §4.6 Step 2): bounce-address envelope rewrite,
//! conditional `Reply-To`, a prepended `Received:` trace, and the
//! `X-Forwarded-For`/`X-Forwarded-To` pair documenting the rewrite. The
//! RFC 5322 `From` header is left untouched to preserve the forwarded
//! message's appearance in the recipient's inbox.

use chrono::Utc;
use utils::EmailAddress;

/// Rewritten headers plus the still-opaque body, ready for DKIM signing.
pub struct RewrittenMessage {
    pub body: Vec<u8>,
}

fn header_present(lines: &[String], name: &str) -> bool {
    let prefix = format!("{name}:");
    lines.iter().any(|line| line.len() > prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(&prefix))
}

/// Rewrites `raw` for the outbound hop. `original_sender` is the envelope
/// sender as received at `MAIL FROM`; `alias_address` is the recipient the
/// message was addressed to (the alias or catch-all target that matched);
/// `forward_to` is the real destination mailbox; `hostname` is this
/// service's announced identity.
pub fn rewrite_headers(raw: &[u8], original_sender: &EmailAddress, alias_address: &str, forward_to: &str, hostname: &str) -> RewrittenMessage {
    let text = String::from_utf8_lossy(raw);
    let (header_block, body) = match text.split_once("\r\n\r\n") {
        Some((h, b)) => (h, b),
        None => (text.as_ref(), ""),
    };

    let mut lines: Vec<String> = header_block.split("\r\n").map(|l| l.to_string()).collect();

    if !header_present(&lines, "Reply-To") && !original_sender.is_null_path() {
        lines.push(format!("Reply-To: {original_sender}"));
    }

    lines.push(format!("X-Forwarded-For: {alias_address}"));
    lines.push(format!("X-Forwarded-To: {forward_to}"));

    let received = format!(
        "Received: by {hostname} (forwarding service) for <{forward_to}> via alias <{alias_address}>; {}",
        Utc::now().to_rfc2822()
    );
    lines.insert(0, received);

    let mut out = lines.join("\r\n").into_bytes();
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(body.as_bytes());

    RewrittenMessage { body: out }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"From: sender@external.test\r\nSubject: hi\r\n\r\nHello\r\n";

    #[test]
    fn prepends_received_and_forwarded_headers() {
        let sender = EmailAddress::parse("sender@external.test").unwrap();
        let rewritten = rewrite_headers(SAMPLE, &sender, "alias@example.com", "person@target.test", "mx.forwardcore.test");
        let text = String::from_utf8_lossy(&rewritten.body);
        assert!(text.starts_with("Received: by mx.forwardcore.test"));
        assert!(text.contains("X-Forwarded-For: alias@example.com"));
        assert!(text.contains("X-Forwarded-To: person@target.test"));
        assert!(text.contains("Reply-To: sender@external.test"));
        assert!(text.contains("From: sender@external.test"));
        assert!(text.ends_with("Hello\r\n"));
    }

    #[test]
    fn does_not_override_existing_reply_to() {
        let raw = b"From: sender@external.test\r\nReply-To: other@external.test\r\nSubject: hi\r\n\r\nHello\r\n";
        let sender = EmailAddress::parse("sender@external.test").unwrap();
        let rewritten = rewrite_headers(raw, &sender, "alias@example.com", "person@target.test", "mx.forwardcore.test");
        let text = String::from_utf8_lossy(&rewritten.body);
        assert_eq!(text.matches("Reply-To:").count(), 1);
        assert!(text.contains("Reply-To: other@external.test"));
    }

    #[test]
    fn skips_reply_to_for_null_reverse_path() {
        let raw = b"From: sender@external.test\r\nSubject: hi\r\n\r\nHello\r\n";
        let sender = EmailAddress::parse("<>").unwrap();
        let rewritten = rewrite_headers(raw, &sender, "alias@example.com", "person@target.test", "mx.forwardcore.test");
        let text = String::from_utf8_lossy(&rewritten.body);
        assert!(!text.contains("Reply-To:"));
    }
}

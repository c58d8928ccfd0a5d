//! Minimal RFC 5322 header extraction used at `DATA` hand-off (spec §4.5):
//! pull `Message-ID`, `From`, `Subject`, `Date` out of the raw bytes just
//! well enough to populate a Message Record, synthesizing whatever is
//! missing. This is not a general MIME parser — the full message is stored
//! and forwarded as opaque bytes; only these four headers are read.

use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedHeaders {
    pub message_id: String,
    pub from: String,
    pub subject: String,
    pub date: String,
}

/// Extracts headers from `raw`, unfolding continuation lines (leading
/// whitespace) per RFC 5322 §2.2.3, and synthesizes any of the four that are
/// absent or empty.
pub fn extract_headers(raw: &[u8], default_from: &str, hostname: &str) -> ExtractedHeaders {
    let text = String::from_utf8_lossy(raw);
    let header_block = text.split("\r\n\r\n").next().unwrap_or("");

    let mut unfolded = Vec::new();
    for line in header_block.split("\r\n") {
        if line.starts_with([' ', '\t']) {
            if let Some(last) = unfolded.last_mut() {
                let last: &mut String = last;
                last.push(' ');
                last.push_str(line.trim_start());
                continue;
            }
        }
        unfolded.push(line.to_string());
    }

    let find = |name: &str| -> Option<String> {
        let prefix = format!("{name}:");
        unfolded.iter().find_map(|line| {
            if line.len() > prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(&prefix) {
                Some(line[prefix.len()..].trim().to_string())
            } else {
                None
            }
        })
    };

    let message_id = find("Message-ID")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("<{}@{}>", utils::new_id(), hostname));
    let from = find("From").filter(|v| !v.is_empty()).unwrap_or_else(|| default_from.to_string());
    let subject = find("Subject").unwrap_or_default();
    let date = find("Date").filter(|v| !v.is_empty()).unwrap_or_else(|| Utc::now().to_rfc2822());

    ExtractedHeaders { message_id, from, subject, date }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_present_headers() {
        let raw = b"Subject: hi\r\nFrom: sender@external.test\r\nMessage-ID: <abc@external.test>\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\n\r\nHello";
        let headers = extract_headers(raw, "fallback@example.com", "mail.example.com");
        assert_eq!(headers.subject, "hi");
        assert_eq!(headers.from, "sender@external.test");
        assert_eq!(headers.message_id, "<abc@external.test>");
        assert_eq!(headers.date, "Mon, 1 Jan 2024 00:00:00 +0000");
    }

    #[test]
    fn synthesizes_missing_message_id_and_from() {
        let raw = b"Subject: hi\r\n\r\nHello";
        let headers = extract_headers(raw, "fallback@example.com", "mail.example.com");
        assert!(headers.message_id.ends_with("@mail.example.com>"));
        assert_eq!(headers.from, "fallback@example.com");
    }

    #[test]
    fn unfolds_continuation_lines() {
        let raw = b"Subject: hi\r\n there\r\n\r\nbody";
        let headers = extract_headers(raw, "a@b.com", "mail.example.com");
        assert_eq!(headers.subject, "hi there");
    }
}

//! SMTP reply formatting (RFC 5321 §4.2, RFC 3463 enhanced status codes).
//! Kept as a plain value rather than written straight to the socket so
//! `session.rs` stays testable without a live connection (spec §9's
//! "exception-driven control flow" re-architecture guidance: the response
//! is the normal return value of a command handler, not an error channel).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub enhanced: &'static str,
    pub text: String,
}

impl Response {
    pub fn new(code: u16, enhanced: &'static str, text: impl Into<String>) -> Self {
        Self { code, enhanced, text: text.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn ready(hostname: &str) -> Self {
        Self::new(220, "2.0.0", format!("{hostname} ESMTP ready"))
    }

    /// RFC 5321 §4.1.1.1: an `ehlo-line` is `ehlo-keyword *(SP ehlo-param)`
    /// with no enhanced-status token, so this carries no `enhanced` prefix —
    /// a peer parsing `SIZE`/`PIPELINING`/`8BITMIME`/`STARTTLS` as the
    /// keyword would otherwise see `2.0.0` instead.
    pub fn ehlo_ok(hostname: &str, max_message_bytes: u64, starttls: bool) -> Self {
        let mut lines = vec![
            hostname.to_string(),
            format!("SIZE {max_message_bytes}"),
            "PIPELINING".to_string(),
            "8BITMIME".to_string(),
        ];
        if starttls {
            lines.push("STARTTLS".to_string());
        }
        Self::new(250, "", lines.join("\r\n"))
    }

    pub fn helo_ok(hostname: &str) -> Self {
        Self::new(250, "2.0.0", hostname.to_string())
    }

    pub fn mail_ok() -> Self {
        Self::new(250, "2.1.0", "Ok")
    }

    pub fn rcpt_ok() -> Self {
        Self::new(250, "2.1.5", "Ok")
    }

    pub fn data_go_ahead() -> Self {
        Self::new(354, "", "Start mail input; end with <CRLF>.<CRLF>")
    }

    pub fn queued(id: &str) -> Self {
        Self::new(250, "2.0.0", format!("Ok: queued as {id}"))
    }

    pub fn rset_ok() -> Self {
        Self::new(250, "2.0.0", "Ok")
    }

    pub fn noop_ok() -> Self {
        Self::new(250, "2.0.0", "Ok")
    }

    pub fn bye(hostname: &str) -> Self {
        Self::new(221, "2.0.0", format!("{hostname} closing connection"))
    }

    pub fn bad_sequence() -> Self {
        Self::new(503, "5.5.1", "Bad sequence of commands")
    }

    pub fn syntax_error() -> Self {
        Self::new(500, "5.5.2", "Syntax error, command unrecognized")
    }

    pub fn parameter_error() -> Self {
        Self::new(501, "5.5.4", "Syntax error in parameters or arguments")
    }

    pub fn user_unknown() -> Self {
        Self::new(550, "5.1.1", "User unknown")
    }

    pub fn queue_full() -> Self {
        Self::new(452, "4.3.1", "Insufficient system storage, try again later")
    }

    pub fn store_unavailable() -> Self {
        Self::new(451, "4.3.0", "Requested action aborted: local error in processing")
    }

    pub fn message_too_large() -> Self {
        Self::new(552, "5.3.4", "Message size exceeds fixed maximum message size")
    }

    pub fn pregreet_rejected() -> Self {
        Self::new(521, "5.7.1", "Protocol violation detected, closing connection")
    }

    pub fn dnsbl_rejected(zone: &str) -> Self {
        Self::new(554, "5.7.1", format!("Rejected: {zone} lists your IP address"))
    }

    pub fn idle_timeout() -> Self {
        Self::new(421, "4.4.2", "Idle timeout exceeded, closing connection")
    }

    pub fn starttls_ready() -> Self {
        Self::new(220, "2.0.0", "Ready to start TLS")
    }

    pub fn starttls_unavailable() -> Self {
        Self::new(454, "4.7.0", "TLS not available due to temporary reason")
    }
}

impl fmt::Display for Response {
    /// Renders as wire bytes, folding multi-line text across `code-text`
    /// continuation lines per RFC 5321 §4.2.1 and terminating with CRLF.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<&str> = self.text.split("\r\n").collect();
        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            if self.enhanced.is_empty() {
                write!(f, "{}{}{}\r\n", self.code, sep, line)?;
            } else {
                write!(f, "{}{}{} {}\r\n", self.code, sep, self.enhanced, line)?;
            }
        }
        Ok(())
    }
}

//! Command-line parsing for the RFC 5321 subset this receiver implements
//! (spec §4.5): `EHLO`/`HELO`, `STARTTLS`, `MAIL FROM`, `RCPT TO`, `DATA`,
//! `RSET`, `NOOP`, `QUIT`. Parsing never touches the Store or DNS — it is a
//! pure function from a command line to a [`Command`] or a parse error,
//! matching the "Pydantic-style validation" re-architecture guidance in
//! spec §9: validated values become distinct types, parsing stays at the
//! boundary.

use utils::EmailAddress;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ehlo(String),
    Helo(String),
    StartTls,
    MailFrom { address: EmailAddress, size: Option<u64> },
    RcptTo { address: EmailAddress },
    Data,
    Rset,
    Noop,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnknownCommand,
    MissingArgument,
    InvalidAddress,
    InvalidSizeParameter,
}

/// Parses a single CRLF-stripped command line.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, rest) = split_verb(line);

    match verb.to_ascii_uppercase().as_str() {
        "EHLO" => Ok(Command::Ehlo(require_arg(rest)?.to_string())),
        "HELO" => Ok(Command::Helo(require_arg(rest)?.to_string())),
        "STARTTLS" => Ok(Command::StartTls),
        "MAIL" => parse_mail_from(rest),
        "RCPT" => parse_rcpt_to(rest),
        "DATA" => Ok(Command::Data),
        "RSET" => Ok(Command::Rset),
        "NOOP" => Ok(Command::Noop),
        "QUIT" => Ok(Command::Quit),
        _ => Err(ParseError::UnknownCommand),
    }
}

fn split_verb(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    }
}

fn require_arg(rest: &str) -> Result<&str, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument)
    } else {
        Ok(rest)
    }
}

fn parse_mail_from(rest: &str) -> Result<Command, ParseError> {
    let rest = rest
        .strip_prefix("FROM:")
        .or_else(|| rest.strip_prefix("From:"))
        .or_else(|| {
            let upper_prefix = rest.get(..5).map(str::to_ascii_uppercase);
            (upper_prefix.as_deref() == Some("FROM:")).then(|| &rest[5..])
        })
        .ok_or(ParseError::MissingArgument)?;

    let (addr_part, params) = split_address_and_params(rest);
    let address = EmailAddress::parse(addr_part).map_err(|_| ParseError::InvalidAddress)?;
    let size = extract_size_param(params)?;
    Ok(Command::MailFrom { address, size })
}

fn parse_rcpt_to(rest: &str) -> Result<Command, ParseError> {
    let rest = rest
        .strip_prefix("TO:")
        .or_else(|| rest.strip_prefix("To:"))
        .or_else(|| {
            let upper_prefix = rest.get(..3).map(str::to_ascii_uppercase);
            (upper_prefix.as_deref() == Some("TO:")).then(|| &rest[3..])
        })
        .ok_or(ParseError::MissingArgument)?;

    let (addr_part, _params) = split_address_and_params(rest);
    let address = EmailAddress::parse(addr_part).map_err(|_| ParseError::InvalidAddress)?;
    Ok(Command::RcptTo { address })
}

/// Splits `<addr> PARAM=VALUE PARAM2=VALUE2` into the address token and the
/// remaining parameter string.
fn split_address_and_params(rest: &str) -> (&str, &str) {
    let rest = rest.trim();
    if let Some(end) = rest.find('>') {
        let (addr, params) = rest.split_at(end + 1);
        (addr, params.trim())
    } else {
        match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        }
    }
}

fn extract_size_param(params: &str) -> Result<Option<u64>, ParseError> {
    for token in params.split_whitespace() {
        if let Some(value) = token.strip_prefix("SIZE=").or_else(|| token.strip_prefix("size=")) {
            return value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ParseError::InvalidSizeParameter);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ehlo() {
        assert_eq!(parse_command("EHLO client.test"), Ok(Command::Ehlo("client.test".into())));
    }

    #[test]
    fn parses_mail_from_with_size() {
        let cmd = parse_command("MAIL FROM:<sender@external.test> SIZE=2048").unwrap();
        match cmd {
            Command::MailFrom { address, size } => {
                assert_eq!(address.to_string(), "sender@external.test");
                assert_eq!(size, Some(2048));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_rcpt_to() {
        let cmd = parse_command("RCPT TO:<hello@example.com>").unwrap();
        match cmd {
            Command::RcptTo { address } => assert_eq!(address.to_string(), "hello@example.com"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_malformed_mail_from() {
        assert_eq!(
            parse_command("MAIL FROM:<not-an-address>"),
            Err(ParseError::InvalidAddress)
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert_eq!(parse_command("BOGUS foo"), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn parses_data_rset_noop_quit() {
        assert_eq!(parse_command("DATA"), Ok(Command::Data));
        assert_eq!(parse_command("RSET"), Ok(Command::Rset));
        assert_eq!(parse_command("NOOP"), Ok(Command::Noop));
        assert_eq!(parse_command("QUIT"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_size_parameter() {
        assert_eq!(
            parse_command("MAIL FROM:<a@example.com> SIZE=notanumber"),
            Err(ParseError::InvalidSizeParameter)
        );
    }
}

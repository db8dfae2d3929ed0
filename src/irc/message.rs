//! IRC wire line codec.
//!
//! Parses one CRLF-stripped protocol line into a [`Message`], including IRCv3
//! message tags, and formats messages back into protocol lines.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed line: {0}")]
    Malformed(&'static str),
    #[error("invalid numeric {0:?}")]
    InvalidNumeric(String),
}

/// Either a textual command (always upper-case) or a three digit numeric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Command(String),
    Numeric(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tags: HashMap<String, Option<String>>,
    pub sender: Option<String>,
    pub verb: Verb,
    /// Everything after the command token, unparsed.
    pub content: Option<String>,
    /// Never empty: a message without parameters carries a single `""`.
    pub params: Vec<String>,
    /// Decoded from the `time` tag. `None` means the message is live.
    pub server_time: Option<DateTime<Utc>>,
}

impl Message {
    /// Parse a single line with its line terminator already removed.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut rest = line;

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, after) = stripped
                .split_once(' ')
                .ok_or(ParseError::Malformed("tags are not followed by a space"))?;
            tags = parse_tags(raw_tags);
            rest = after;
        }

        let server_time = tags
            .get("time")
            .and_then(|value| value.as_deref())
            .and_then(|value| match DateTime::parse_from_rfc3339(value) {
                Ok(time) => Some(time.with_timezone(&Utc)),
                Err(e) => {
                    tracing::debug!(time = value, error = %e, "ignoring unparsable time tag");
                    None
                }
            });

        let mut sender = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped
                .split_once(' ')
                .ok_or(ParseError::Malformed("prefix is not followed by a command"))?;
            sender = Some(prefix.to_string());
            rest = after;
        }

        let (token, content) = match rest.split_once(' ') {
            Some((token, content)) => (token, Some(content)),
            None => (rest, None),
        };
        if token.is_empty() {
            return Err(ParseError::Malformed("missing command"));
        }

        let verb = if token.starts_with(|c: char| c.is_ascii_digit()) {
            if !token.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::InvalidNumeric(token.to_string()));
            }
            match token.parse::<u16>() {
                Ok(n) if n <= 999 => Verb::Numeric(n),
                _ => return Err(ParseError::InvalidNumeric(token.to_string())),
            }
        } else {
            Verb::Command(token.to_ascii_uppercase())
        };

        Ok(Self {
            tags,
            sender,
            verb,
            params: split_params(content.unwrap_or("")),
            content: content.map(str::to_string),
            server_time,
        })
    }

    /// Build an outbound message from a command and its parameters.
    pub fn new(command: &str, params: &[&str]) -> Self {
        let params: Vec<String> = if params.is_empty() {
            vec![String::new()]
        } else {
            params.iter().map(|p| p.to_string()).collect()
        };
        Self {
            tags: HashMap::new(),
            sender: None,
            verb: Verb::Command(command.to_ascii_uppercase()),
            content: None,
            params,
            server_time: None,
        }
    }

    pub fn command(&self) -> Option<&str> {
        match &self.verb {
            Verb::Command(command) => Some(command),
            Verb::Numeric(_) => None,
        }
    }

    pub fn numeric(&self) -> Option<u16> {
        match self.verb {
            Verb::Numeric(n) => Some(n),
            Verb::Command(_) => None,
        }
    }

    /// Parameter at `index`, or `""` when out of range.
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }

    /// Raw content after skipping `index` space separated words.
    pub fn word_eol(&self, index: usize) -> &str {
        let Some(mut rest) = self.content.as_deref() else {
            return "";
        };
        for _ in 0..index {
            match rest.split_once(' ') {
                Some((_, after)) => rest = after,
                None => return "",
            }
        }
        rest
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(|value| value.as_deref())
    }

    /// Nick portion of the sender prefix.
    pub fn source_nick(&self) -> &str {
        let sender = self.sender.as_deref().unwrap_or("");
        sender.split(['!', '@']).next().unwrap_or(sender)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            f.write_str("@")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                f.write_str(key)?;
                if let Some(Some(value)) = self.tags.get(key) {
                    write!(f, "={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(sender) = &self.sender {
            write!(f, ":{} ", sender)?;
        }
        match &self.verb {
            Verb::Command(command) => f.write_str(command)?,
            Verb::Numeric(n) => write!(f, "{:03}", n)?,
        }

        let params: &[String] = if self.params.len() == 1 && self.params[0].is_empty() {
            &[]
        } else {
            &self.params
        };
        let last = params.len().saturating_sub(1);
        for (i, param) in params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// Format a command line for sending.
pub fn format_command(command: &str, params: &[&str]) -> String {
    Message::new(command, params).to_string()
}

fn split_params(content: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut rest = content;
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        match rest.split_once(' ') {
            Some((word, after)) => {
                params.push(word.to_string());
                rest = after;
            }
            None => {
                params.push(rest.to_string());
                break;
            }
        }
    }
    if params.is_empty() {
        params.push(String::new());
    }
    params
}

fn parse_tags(raw: &str) -> HashMap<String, Option<String>> {
    let mut tags = HashMap::new();
    for tag in raw.split(';') {
        let (key, value) = match tag.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (tag, None),
        };
        if key.is_empty() {
            continue;
        }
        let value = value.filter(|v| !v.is_empty()).map(unescape_tag_value);
        tags.insert(key.to_string(), value);
    }
    tags
}

pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

pub fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_with_trailing_reason() {
        let msg = Message::parse(":nick!~ident@hostname QUIT :Read error: Connection reset by peer").unwrap();
        assert_eq!(msg.sender.as_deref(), Some("nick!~ident@hostname"));
        assert_eq!(msg.command(), Some("QUIT"));
        assert_eq!(msg.numeric(), None);
        assert_eq!(msg.param(0), "Read error: Connection reset by peer");
        assert_eq!(msg.param(1), "");
        assert_eq!(msg.word_eol(0), ":Read error: Connection reset by peer");
        assert_eq!(msg.word_eol(2), "Connection reset by peer");
        assert_eq!(msg.word_eol(5), "peer");
        assert_eq!(msg.word_eol(6), "");
        assert_eq!(msg.source_nick(), "nick");
    }

    #[test]
    fn test_numeric() {
        let msg = Message::parse(":card.freenode.net 318 Nick Nick :End of /WHOIS list.").unwrap();
        assert_eq!(msg.numeric(), Some(318));
        assert_eq!(msg.command(), None);
        assert_eq!(msg.params, vec!["Nick", "Nick", "End of /WHOIS list."]);
        assert_eq!(msg.param(3), "");
    }

    #[test]
    fn test_no_prefix_and_no_params() {
        let msg = Message::parse("PING :card.freenode.net").unwrap();
        assert_eq!(msg.sender, None);
        assert_eq!(msg.param(0), "card.freenode.net");

        let msg = Message::parse(":nick!ident@host AWAY").unwrap();
        assert_eq!(msg.command(), Some("AWAY"));
        assert_eq!(msg.content, None);
        assert_eq!(msg.params, vec![""]);
    }

    #[test]
    fn test_lowercase_command_is_uppercased() {
        let msg = Message::parse("privmsg #chan :hi there").unwrap();
        assert_eq!(msg.command(), Some("PRIVMSG"));
        assert_eq!(msg.params, vec!["#chan", "hi there"]);
    }

    #[test]
    fn test_tags() {
        let msg = Message::parse(
            r"@time=2015-06-16T19:02:58.651Z;te-st1=\:\s\\\ttest;thing;something=; PING",
        )
        .unwrap();
        assert_eq!(msg.tag("te-st1"), Some(r"; \ttest"));
        assert_eq!(msg.server_time.map(|t| t.timestamp()), Some(1434481378));
        assert!(msg.tags.contains_key("thing"));
        assert_eq!(msg.tag("thing"), None);
        assert!(msg.tags.contains_key("something"));
        assert_eq!(msg.tag("something"), None);
        assert!(!msg.tags.contains_key("junk"));
        assert_eq!(msg.command(), Some("PING"));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(Message::parse("@time=x"), Err(ParseError::Malformed(_))));
        assert!(matches!(Message::parse(":server.only"), Err(ParseError::Malformed(_))));
        assert!(matches!(Message::parse(":server "), Err(ParseError::Malformed(_))));
        assert!(matches!(Message::parse("1000 me :x"), Err(ParseError::InvalidNumeric(_))));
        assert!(matches!(Message::parse("001abc me"), Err(ParseError::InvalidNumeric(_))));
        assert!(Message::parse("001").is_ok());
    }

    #[test]
    fn test_tag_escaping_is_lossless() {
        let value = "a;b c\\d\r\ne";
        assert_eq!(unescape_tag_value(&escape_tag_value(value)), value);
    }

    #[test]
    fn test_serialize_reparses() {
        for line in [
            ":nick!u@h PRIVMSG #rust :hello world",
            "JOIN #a,#b",
            ":serv 005 me PREFIX=(ov)@+ CHANTYPES=# :are supported",
            "TOPIC #c :",
        ] {
            let msg = Message::parse(line).unwrap();
            let again = Message::parse(&msg.to_string()).unwrap();
            assert_eq!(again.verb, msg.verb);
            assert_eq!(again.params, msg.params);
            assert_eq!(again.sender, msg.sender);
        }
        assert_eq!(format_command("PRIVMSG", &["#c", "hi there"]), "PRIVMSG #c :hi there");
        assert_eq!(format_command("NICK", &["me"]), "NICK me");
        assert_eq!(format_command("QUIT", &[]), "QUIT");
    }
}

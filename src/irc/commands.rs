//! User input parser.
//!
//! Turns what the user typed into a context into a [`ParsedCommand`]. Plain
//! text becomes [`ParsedCommand::Say`]; `/command` names the session does not
//! know are passed through to the server verbatim.

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Say { text: String },
    Me { text: String },
    Join { channels: String, key: Option<String> },
    Part { channel: Option<String>, reason: Option<String> },
    Nick { nick: String },
    Msg { target: String, text: String },
    Notice { target: String, text: String },
    Topic { channel: Option<String>, text: Option<String> },
    Quit { message: Option<String> },
    Close,
    Raw { line: String },
}

/// Parse one line of input. `chan_types` decides whether a leading argument
/// names a channel. Returns `None` for empty input or a command missing its
/// required argument.
pub fn parse_command(input: &str, chan_types: &str) -> Option<ParsedCommand> {
    let input = input.trim_end_matches(['\r', '\n']);
    if input.trim().is_empty() {
        return None;
    }

    let Some(body) = input.strip_prefix('/') else {
        return Some(ParsedCommand::Say {
            text: input.to_string(),
        });
    };
    // `//text` sends text starting with a slash.
    if body.starts_with('/') {
        return Some(ParsedCommand::Say {
            text: body.to_string(),
        });
    }

    let (cmd, args) = match body.split_once(' ') {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (body, ""),
    };
    let is_channel = |s: &str| s.chars().next().is_some_and(|c| chan_types.contains(c));
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    let (first, rest) = match args.split_once(' ') {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (args, ""),
    };

    match cmd.to_lowercase().as_str() {
        "say" => non_empty(args).map(|text| ParsedCommand::Say { text }),
        "me" => Some(ParsedCommand::Me {
            text: args.to_string(),
        }),
        "join" | "j" => {
            let channels = non_empty(first)?;
            Some(ParsedCommand::Join {
                channels,
                key: non_empty(rest),
            })
        }
        "part" | "leave" => {
            if is_channel(first) {
                Some(ParsedCommand::Part {
                    channel: Some(first.to_string()),
                    reason: non_empty(rest),
                })
            } else {
                Some(ParsedCommand::Part {
                    channel: None,
                    reason: non_empty(args),
                })
            }
        }
        "nick" => non_empty(first).map(|nick| ParsedCommand::Nick { nick }),
        "msg" | "query" => Some(ParsedCommand::Msg {
            target: non_empty(first)?,
            text: rest.to_string(),
        }),
        "notice" => Some(ParsedCommand::Notice {
            target: non_empty(first)?,
            text: non_empty(rest)?,
        }),
        "topic" | "t" => {
            if is_channel(first) {
                Some(ParsedCommand::Topic {
                    channel: Some(first.to_string()),
                    text: non_empty(rest),
                })
            } else {
                Some(ParsedCommand::Topic {
                    channel: None,
                    text: non_empty(args),
                })
            }
        }
        "quit" | "exit" => Some(ParsedCommand::Quit {
            message: non_empty(args),
        }),
        "close" => Some(ParsedCommand::Close),
        "raw" | "quote" => non_empty(args).map(|line| ParsedCommand::Raw { line }),
        _ => Some(ParsedCommand::Raw {
            line: body.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_say() {
        assert_eq!(
            parse_command("hello there", "#&"),
            Some(ParsedCommand::Say { text: "hello there".into() })
        );
        assert_eq!(
            parse_command("//not a command", "#&"),
            Some(ParsedCommand::Say { text: "/not a command".into() })
        );
        assert_eq!(parse_command("   ", "#&"), None);
    }

    #[test]
    fn test_part_with_and_without_channel() {
        assert_eq!(
            parse_command("/part #rust bye all", "#"),
            Some(ParsedCommand::Part {
                channel: Some("#rust".into()),
                reason: Some("bye all".into())
            })
        );
        assert_eq!(
            parse_command("/part bye all", "#"),
            Some(ParsedCommand::Part { channel: None, reason: Some("bye all".into()) })
        );
        // `&` is not a channel prefix on this network.
        assert_eq!(
            parse_command("/part &local", "#"),
            Some(ParsedCommand::Part { channel: None, reason: Some("&local".into()) })
        );
    }

    #[test]
    fn test_msg_and_join() {
        assert_eq!(
            parse_command("/msg nick hi there", "#"),
            Some(ParsedCommand::Msg { target: "nick".into(), text: "hi there".into() })
        );
        assert_eq!(
            parse_command("/join #a,#b key", "#"),
            Some(ParsedCommand::Join { channels: "#a,#b".into(), key: Some("key".into()) })
        );
        assert_eq!(parse_command("/join", "#"), None);
        assert_eq!(parse_command("/nick", "#"), None);
    }

    #[test]
    fn test_unknown_is_raw() {
        assert_eq!(
            parse_command("/whois someone", "#"),
            Some(ParsedCommand::Raw { line: "whois someone".into() })
        );
        assert_eq!(
            parse_command("/QUOTE PRIVMSG x :y", "#"),
            Some(ParsedCommand::Raw { line: "PRIVMSG x :y".into() })
        );
        assert_eq!(parse_command("/quit", "#"), Some(ParsedCommand::Quit { message: None }));
    }
}

//! Line-oriented console front end: turns session events into printable
//! lines and stdin lines into session commands.

use crate::app::action::SessionCommand;
use crate::app::event::{ConnectionState, MessageKind, SessionEvent};
use crate::irc::casemap::has_casefold_prefix;
use crate::session::ContextId;
use chrono::{DateTime, Local, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Print(String),
    Send {
        network: String,
        command: SessionCommand,
    },
    Exit,
}

#[derive(Debug, Default)]
pub struct ConsoleState {
    networks: Vec<String>,
    /// Where typed text goes: the context that printed last, unless the
    /// user picked one.
    current: Option<ContextId>,
    /// Open channels and queries, in the order they appeared.
    contexts: Vec<ContextId>,
}

fn stamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|t| t.with_timezone(&Local))
        .unwrap_or_else(Local::now)
        .format("%H:%M")
        .to_string()
}

impl ConsoleState {
    pub fn new(networks: Vec<String>) -> Self {
        let current = networks.first().map(|n| ContextId::Server(n.clone()));
        Self {
            networks,
            current,
            contexts: Vec::new(),
        }
    }

    /// Resolve what the user typed after `/focus` on `network`: an open
    /// context with that name, else the only one it is a prefix of.
    fn resolve(&self, network: &str, name: &str) -> ContextId {
        let wanted = if name.starts_with(['#', '&', '!', '+']) {
            ContextId::Channel(network.to_string(), name.to_string())
        } else {
            ContextId::Query(network.to_string(), name.to_string())
        };
        let open = self.contexts.iter().filter(|c| c.network() == network);
        if let Some(found) = open.clone().find(|c| c.matches(&wanted)) {
            return found.clone();
        }
        let mut candidates = open.filter(|c| has_casefold_prefix(c.name(), name));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => only.clone(),
            _ => wanted,
        }
    }

    fn focus(&mut self, context: ContextId) -> Vec<ConsoleAction> {
        if self.current.as_ref() == Some(&context) {
            return Vec::new();
        }
        let mut actions = Vec::new();
        // The old session no longer has the user's attention.
        if let Some(old) = self.current.take() {
            if old.network() != context.network() {
                actions.push(ConsoleAction::Send {
                    network: old.network().to_string(),
                    command: SessionCommand::Focus { context: None },
                });
            }
        }
        actions.push(ConsoleAction::Send {
            network: context.network().to_string(),
            command: SessionCommand::Focus {
                context: Some(context.clone()),
            },
        });
        self.current = Some(context);
        actions
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<ConsoleAction> {
        match event {
            SessionEvent::Print(print) => {
                let marker = match print.kind {
                    MessageKind::Error => "!!! ",
                    MessageKind::Highlight => "** ",
                    _ => "",
                };
                let line = format!(
                    "[{}] {} {}{}",
                    stamp(print.timestamp),
                    print.context,
                    marker,
                    print.text
                );
                let mut actions = vec![ConsoleAction::Print(line)];
                if !matches!(print.context, ContextId::Server(_)) {
                    actions.extend(self.focus(print.context));
                }
                actions
            }
            SessionEvent::Notify { context, title, body } => vec![ConsoleAction::Print(format!(
                "[{}] {} ! {}: {}",
                stamp(None),
                context,
                title,
                body
            ))],
            SessionEvent::ContextAdded(context) => {
                if !self.contexts.iter().any(|c| c.matches(&context)) {
                    self.contexts.push(context);
                }
                Vec::new()
            }
            SessionEvent::ContextRemoved(context) => {
                self.contexts.retain(|c| !c.matches(&context));
                if self.current.as_ref() == Some(&context) {
                    self.current = context.parent();
                }
                vec![ConsoleAction::Print(format!("[{}] {} closed", stamp(None), context))]
            }
            SessionEvent::StateChanged { network, state } => {
                tracing::debug!(network = %network, ?state, "state changed");
                match state {
                    ConnectionState::Ready => vec![ConsoleAction::Print(format!(
                        "[{}] {} ready",
                        stamp(None),
                        network
                    ))],
                    _ => Vec::new(),
                }
            }
            SessionEvent::Activity { .. } | SessionEvent::MembersChanged { .. } => Vec::new(),
        }
    }

    pub fn handle_input(&mut self, line: &str) -> Vec<ConsoleAction> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Vec::new();
        }
        let (command, args) = match line.strip_prefix('/') {
            Some(rest) => rest.split_once(' ').unwrap_or((rest, "")),
            None => ("", ""),
        };
        let args = args.trim();

        match command.to_ascii_lowercase().as_str() {
            "exit" => vec![ConsoleAction::Exit],
            "network" => match self.networks.iter().find(|n| n.eq_ignore_ascii_case(args)) {
                Some(network) => {
                    let context = ContextId::Server(network.clone());
                    self.focus(context)
                }
                None => vec![ConsoleAction::Print(format!(
                    "Unknown network {:?}; configured: {}",
                    args,
                    self.networks.join(", ")
                ))],
            },
            "focus" if !args.is_empty() => {
                let Some(network) = self.current.as_ref().map(|c| c.network().to_string()) else {
                    return Vec::new();
                };
                let context = self.resolve(&network, args);
                self.focus(context)
            }
            "raw" if !args.is_empty() => match &self.current {
                Some(current) => vec![ConsoleAction::Send {
                    network: current.network().to_string(),
                    command: SessionCommand::SendRaw {
                        line: args.to_string(),
                    },
                }],
                None => Vec::new(),
            },
            "close" => match &self.current {
                Some(current) => vec![ConsoleAction::Send {
                    network: current.network().to_string(),
                    command: SessionCommand::CloseContext {
                        context: current.clone(),
                    },
                }],
                None => Vec::new(),
            },
            "connect" | "disconnect" => {
                let Some(current) = &self.current else {
                    return Vec::new();
                };
                let command = if command.eq_ignore_ascii_case("connect") {
                    SessionCommand::Connect
                } else {
                    SessionCommand::Disconnect
                };
                vec![ConsoleAction::Send {
                    network: current.network().to_string(),
                    command,
                }]
            }
            _ => match &self.current {
                Some(context) => vec![ConsoleAction::Send {
                    network: context.network().to_string(),
                    command: SessionCommand::Input {
                        context: context.clone(),
                        text: line.to_string(),
                    },
                }],
                None => vec![ConsoleAction::Print("No network configured".to_string())],
            },
        }
    }
}

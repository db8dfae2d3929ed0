//! Per-network session state and connection lifecycle.
//!
//! [`Server`] is synchronous: it never awaits. The runner feeds it completed
//! connects, decoded lines and pacer ticks, and it answers by writing to its
//! [`LineSink`] and pushing [`SessionEvent`]s. Every asynchronous completion
//! carries the generation it was started under so stale completions from an
//! earlier connection are ignored.

use super::channel::{Channel, MemberChange};
use super::context::ContextId;
use super::isupport::Isupport;
use super::query::Query;
use super::sendq::{encode_line, LineSink, SendQueue};
use super::user::{UserId, UserRegistry};
use crate::app::event::{ConnectionState, MessageKind, PrintEvent, SessionEvent};
use crate::config::nickname::NickRetry;
use crate::config::settings::{SettingsLookup, HIDE_JOIN_PART};
use crate::config::NetworkConfig;
use crate::identd::IdentReporter;
use crate::irc::casemap::{casefold_eq, CaseKey};
use crate::irc::caps::{CapAction, CapNegotiator, Caps};
use crate::irc::charset::Charset;
use crate::irc::commands::{parse_command, ParsedCommand};
use crate::irc::message::{format_command, Message};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything the runner needs to open a socket for [`Server::begin_connect`].
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub generation: u64,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub accept_invalid_certs: bool,
    pub cancel: CancellationToken,
}

pub struct Server {
    pub(super) config: NetworkConfig,
    pub(super) settings: Arc<dyn SettingsLookup>,
    events: mpsc::UnboundedSender<SessionEvent>,
    ident: Option<Arc<dyn IdentReporter>>,

    pub(super) state: ConnectionState,
    generation: u64,
    connect_token: Option<CancellationToken>,
    read_token: Option<CancellationToken>,
    sink: Option<Box<dyn LineSink>>,
    sendq: SendQueue,
    charset: Charset,

    pub(super) users: UserRegistry,
    pub(super) me: Option<UserId>,
    pub(super) channels: HashMap<CaseKey, Channel>,
    pub(super) queries: HashMap<CaseKey, Query>,
    pub(super) caps: Caps,
    pub(super) isupport: Isupport,
    pub(super) cap_negotiator: CapNegotiator,
    pub(super) nick_retry: NickRetry,
    front: Option<ContextId>,
}

impl Server {
    pub fn new(
        config: NetworkConfig,
        settings: Arc<dyn SettingsLookup>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let charset = Charset::for_label(&config.encoding);
        let nick_retry = NickRetry::new(&config.alt_nicks);
        Self {
            config,
            settings,
            events,
            ident: None,
            state: ConnectionState::Disconnected,
            generation: 0,
            connect_token: None,
            read_token: None,
            sink: None,
            sendq: SendQueue::new(),
            charset,
            users: UserRegistry::new(),
            me: None,
            channels: HashMap::new(),
            queries: HashMap::new(),
            caps: Caps::empty(),
            isupport: Isupport::default(),
            cap_negotiator: CapNegotiator::new(),
            nick_retry,
            front: None,
        }
    }

    pub fn with_ident(mut self, ident: Arc<dyn IdentReporter>) -> Self {
        self.ident = Some(ident);
        self
    }

    pub fn network(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn caps(&self) -> Caps {
        self.caps
    }

    pub fn isupport(&self) -> &Isupport {
        &self.isupport
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn me(&self) -> Option<UserId> {
        self.me
    }

    pub fn me_nick(&self) -> Option<&str> {
        self.me.map(|id| self.users.nick(id))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&CaseKey::new(name))
    }

    pub fn query(&self, nick: &str) -> Option<&Query> {
        self.queries.get(&CaseKey::new(nick))
    }

    pub fn cap_negotiator(&self) -> &CapNegotiator {
        &self.cap_negotiator
    }

    pub fn is_pacing(&self) -> bool {
        self.sendq.is_pacing()
    }

    pub fn server_context(&self) -> ContextId {
        ContextId::Server(self.config.name.clone())
    }

    pub fn channel_context(&self, name: &str) -> ContextId {
        ContextId::Channel(self.config.name.clone(), name.to_string())
    }

    pub fn query_context(&self, nick: &str) -> ContextId {
        ContextId::Query(self.config.name.clone(), nick.to_string())
    }

    pub(super) fn is_me(&self, nick: &str) -> bool {
        self.me_nick().is_some_and(|me| casefold_eq(me, nick))
    }

    pub fn set_front(&mut self, context: Option<ContextId>) {
        self.front = context;
    }

    pub(super) fn is_front(&self, context: &ContextId) -> bool {
        self.front.as_ref().is_some_and(|front| front.matches(context))
    }

    pub(super) fn setting(&self, context: &ContextId, key: &str) -> bool {
        self.settings.lookup_bool(context, key)
    }

    pub(super) fn hide_join_part(&self, context: &ContextId) -> bool {
        self.setting(context, HIDE_JOIN_PART)
    }

    // -- events --------------------------------------------------------------

    pub(super) fn emit(&self, event: SessionEvent) {
        // A closed receiver means nobody is presenting this session any more.
        let _ = self.events.send(event);
    }

    pub(super) fn print(
        &self,
        context: ContextId,
        kind: MessageKind,
        text: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.emit(SessionEvent::Print(PrintEvent {
            context,
            kind,
            text: text.into(),
            timestamp,
        }));
    }

    pub(super) fn print_server(&self, kind: MessageKind, text: impl Into<String>) {
        self.print(self.server_context(), kind, text, None);
    }

    pub(super) fn emit_member_changes(
        &self,
        context: &ContextId,
        changes: impl IntoIterator<Item = MemberChange>,
    ) {
        for change in changes {
            self.emit(SessionEvent::MembersChanged {
                context: context.clone(),
                change,
            });
        }
    }

    pub(super) fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(network = %self.config.name, from = ?self.state, to = ?state, "session state");
        self.state = state;
        self.emit(SessionEvent::StateChanged {
            network: self.config.name.clone(),
            state,
        });
    }

    // -- lifecycle -----------------------------------------------------------

    /// Start a new connection attempt, tearing down any current one first.
    pub fn begin_connect(&mut self) -> ConnectTarget {
        if self.state != ConnectionState::Disconnected {
            self.disconnect();
        }
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.connect_token = Some(cancel.clone());
        self.charset = Charset::for_label(&self.config.encoding);
        self.set_state(ConnectionState::Connecting);
        self.print_server(
            MessageKind::System,
            format!("Connecting to {}:{}", self.config.host, self.config.port),
        );
        ConnectTarget {
            generation: self.generation,
            host: self.config.host.clone(),
            port: self.config.port,
            tls: self.config.tls,
            accept_invalid_certs: self.config.accept_invalid_certs,
            cancel,
        }
    }

    /// Completions from `generation` still apply to this session.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.state != ConnectionState::Disconnected
    }

    pub fn connect_failed(&mut self, generation: u64, error: &str) {
        if !self.is_current(generation) || self.state != ConnectionState::Connecting {
            return;
        }
        tracing::warn!(network = %self.config.name, error, "connect failed");
        self.connect_token = None;
        self.print_server(MessageKind::Error, format!("Connection failed: {}", error));
        self.set_state(ConnectionState::Disconnected);
    }

    /// The socket is up: send the registration burst and hand back the token
    /// the read loop must observe.
    pub fn on_connected(
        &mut self,
        generation: u64,
        sink: Box<dyn LineSink>,
        local_port: u16,
    ) -> Option<CancellationToken> {
        let cancelled = self
            .connect_token
            .as_ref()
            .map_or(true, CancellationToken::is_cancelled);
        if !self.is_current(generation) || self.state != ConnectionState::Connecting || cancelled {
            return None;
        }
        self.connect_token = None;

        let me = self.users.intern(&self.config.nickname);
        if let Some(user) = self.users.get_mut(me) {
            user.username = self.config.username().to_string();
            user.realname = self.config.realname().to_string();
        }
        self.users.retain(me);
        self.me = Some(me);

        if let Some(ident) = &self.ident {
            ident.register(local_port, self.config.username());
        }

        let mut burst = String::new();
        if let Some(password) = self.config.password.as_deref().filter(|p| !p.is_empty()) {
            burst.push_str(&format_command("PASS", &[password]));
            burst.push_str("\r\n");
        }
        burst.push_str(self.cap_negotiator.start());
        burst.push_str("\r\n");
        burst.push_str(&format_command("NICK", &[&self.config.nickname]));
        burst.push_str("\r\n");
        burst.push_str(&format_command(
            "USER",
            &[self.config.username(), "*", "*", self.config.realname()],
        ));

        let mut sink = sink;
        sink.write(encode_line(&self.charset, &burst));
        self.sink = Some(sink);

        tracing::info!(network = %self.config.name, local_port, "connected");
        self.print_server(MessageKind::System, "Connected. Logging in...");
        self.set_state(ConnectionState::Registering);

        let read_token = CancellationToken::new();
        self.read_token = Some(read_token.clone());
        Some(read_token)
    }

    /// One raw line from the read loop, terminator already stripped.
    pub fn handle_raw_line(&mut self, generation: u64, bytes: &[u8]) {
        if !self.is_current(generation) || self.sink.is_none() {
            return;
        }
        let line = self.charset.decode(bytes);
        self.handle_line(&line);
    }

    pub fn handle_line(&mut self, line: &str) {
        tracing::trace!(network = %self.config.name, line, "<<");
        match Message::parse(line) {
            Ok(msg) => self.dispatch(&msg),
            Err(e) => {
                tracing::warn!(network = %self.config.name, error = %e, line, "dropping unparsable line")
            }
        }
    }

    /// The transport reported EOF or an error.
    pub fn connection_lost(&mut self, generation: u64, reason: Option<&str>) {
        if !self.is_current(generation) {
            return;
        }
        let reason = reason.unwrap_or("Connection closed");
        tracing::warn!(network = %self.config.name, reason, "connection lost");
        self.print_server(MessageKind::Error, format!("Disconnected: {}", reason));
        self.disconnect();
    }

    pub fn disconnect(&mut self) {
        self.disconnect_with(None);
    }

    /// Tear the connection down. Entities survive for a later reconnect;
    /// calling this while already disconnected only resets state.
    pub fn disconnect_with(&mut self, quit_message: Option<&str>) {
        if let Some(token) = self.connect_token.take() {
            token.cancel();
        }
        if let Some(token) = self.read_token.take() {
            token.cancel();
        }
        self.sendq.flush();
        if let Some(mut sink) = self.sink.take() {
            let message = quit_message.unwrap_or(self.config.quit_message());
            let quit = format_command("QUIT", &[message]);
            sink.write(encode_line(&self.charset, &quit));
        }

        let mut cleared = Vec::new();
        for channel in self.channels.values_mut() {
            let changes = channel.set_joined(&mut self.users, false);
            if !changes.is_empty() {
                cleared.push((channel.name.clone(), changes));
            }
        }
        for query in self.queries.values_mut() {
            query.set_online(&mut self.users, false);
        }
        if let Some(me) = self.me.take() {
            self.users.release(me);
        }
        if !self.users.is_empty() {
            debug_assert!(false, "{} users outlived disconnect", self.users.len());
            tracing::debug!(network = %self.config.name, leaked = self.users.len(), "users outlived disconnect");
        }

        self.caps = Caps::empty();
        self.cap_negotiator.reset();
        self.isupport = Isupport::default();
        self.nick_retry.reset();

        for (name, changes) in cleared {
            let context = self.channel_context(&name);
            self.emit_member_changes(&context, changes);
        }
        if self.state != ConnectionState::Disconnected {
            self.print_server(MessageKind::System, "Disconnected");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    // -- outbound ------------------------------------------------------------

    /// Queue one protocol line. Anything after a CR or LF is dropped.
    pub fn write_line(&mut self, line: &str) {
        let line = match line.find(['\r', '\n']) {
            Some(end) => {
                tracing::debug!(network = %self.config.name, "truncating line at embedded newline");
                &line[..end]
            }
            None => line,
        };
        let Some(sink) = self.sink.as_deref_mut() else {
            tracing::debug!(network = %self.config.name, line, "not connected, dropping line");
            return;
        };
        tracing::trace!(network = %self.config.name, line, ">>");
        self.sendq.write_line(sink, &self.charset, line);
    }

    pub fn pacer_tick(&mut self) {
        if let Some(sink) = self.sink.as_deref_mut() {
            self.sendq.tick(sink, &self.charset);
        } else {
            self.sendq.flush();
        }
    }

    pub(super) fn apply_cap_actions(&mut self, actions: Vec<CapAction>) {
        for action in actions {
            match action {
                CapAction::Send(line) => self.write_line(&line),
                CapAction::Print(text) => self.print_server(MessageKind::System, text),
            }
        }
        tracing::debug!(network = %self.config.name, cap = ?self.cap_negotiator.state(), "capability negotiation");
        if matches!(
            self.state,
            ConnectionState::Registering | ConnectionState::Negotiating
        ) {
            let state = if self.cap_negotiator.sent_cap_end() {
                ConnectionState::Registering
            } else {
                ConnectionState::Negotiating
            };
            self.set_state(state);
        }
    }

    // -- entities ------------------------------------------------------------

    /// Find or open the query with `peer`. `userhost` fills in the peer's
    /// details when the query has none.
    pub(super) fn ensure_query(&mut self, peer: &str, userhost: &str) -> ContextId {
        let key = CaseKey::new(peer);
        let created = !self.queries.contains_key(&key);
        let query = self
            .queries
            .entry(key)
            .or_insert_with(|| Query::new(peer));
        let name = query.name.clone();
        if query.peer().is_none() {
            let id = self.users.intern(userhost);
            query.set_peer(&mut self.users, id);
        }

        let context = self.query_context(&name);
        if created {
            self.emit(SessionEvent::ContextAdded(context.clone()));
            if self.caps.contains(Caps::MONITOR) {
                self.write_line(&format!("MONITOR + {}", name));
            }
        }
        context
    }

    /// Leave a channel or drop a query and forget it.
    pub fn close_context(&mut self, context: &ContextId) {
        match context {
            ContextId::Server(_) => self.disconnect(),
            ContextId::Channel(_, name) => {
                let key = CaseKey::new(name);
                let Some(mut channel) = self.channels.remove(&key) else {
                    tracing::warn!(network = %self.config.name, channel = %name, "close of unknown channel");
                    return;
                };
                if channel.joined {
                    self.write_line(&format_command("PART", &[&channel.name]));
                }
                let changes = channel.set_joined(&mut self.users, false);
                let context = self.channel_context(&channel.name);
                self.emit_member_changes(&context, changes);
                self.emit(SessionEvent::ContextRemoved(context));
            }
            ContextId::Query(_, name) => {
                let key = CaseKey::new(name);
                let Some(mut query) = self.queries.remove(&key) else {
                    tracing::warn!(network = %self.config.name, query = %name, "close of unknown query");
                    return;
                };
                if self.caps.contains(Caps::MONITOR) {
                    self.write_line(&format!("MONITOR - {}", query.name));
                }
                query.set_online(&mut self.users, false);
                self.emit(SessionEvent::ContextRemoved(self.query_context(&query.name)));
            }
        }
    }

    // -- user input ----------------------------------------------------------

    pub fn handle_input(&mut self, context: &ContextId, text: &str) {
        let Some(command) = parse_command(text, &self.isupport.chan_types) else {
            return;
        };
        let current = match context {
            ContextId::Server(_) => None,
            ContextId::Channel(_, name) | ContextId::Query(_, name) => Some(name.clone()),
        };

        match command {
            ParsedCommand::Say { text } => match current {
                Some(target) => self.say(context.clone(), &target, &text, false),
                None => self.print_server(MessageKind::Error, "Not in a channel or query"),
            },
            ParsedCommand::Me { text } => match current {
                Some(target) => self.say(context.clone(), &target, &text, true),
                None => self.print_server(MessageKind::Error, "Not in a channel or query"),
            },
            ParsedCommand::Join { channels, key } => match key {
                Some(key) => self.write_line(&format_command("JOIN", &[&channels, &key])),
                None => self.write_line(&format_command("JOIN", &[&channels])),
            },
            ParsedCommand::Part { channel, reason } => {
                let channel = channel.or_else(|| match context {
                    ContextId::Channel(_, name) => Some(name.clone()),
                    _ => None,
                });
                match (channel, reason) {
                    (Some(channel), Some(reason)) => {
                        self.write_line(&format_command("PART", &[&channel, &reason]))
                    }
                    (Some(channel), None) => self.write_line(&format_command("PART", &[&channel])),
                    (None, _) => self.print_server(MessageKind::Error, "Not in a channel"),
                }
            }
            ParsedCommand::Nick { nick } => {
                if self.state != ConnectionState::Ready {
                    if let Some(me) = self.me {
                        self.users.rename(me, &nick);
                    }
                }
                self.write_line(&format_command("NICK", &[&nick]));
            }
            ParsedCommand::Msg { target, text } => {
                let destination = if self.isupport.is_channel(&target) {
                    self.channel_context(&target)
                } else {
                    self.ensure_query(&target, &target)
                };
                if !text.is_empty() {
                    self.say(destination, &target, &text, false);
                }
            }
            ParsedCommand::Notice { target, text } => {
                self.write_line(&format_command("NOTICE", &[&target, &text]));
                self.print(
                    context.clone(),
                    MessageKind::Notice,
                    format!("-> -{}- {}", target, text),
                    None,
                );
            }
            ParsedCommand::Topic { channel, text } => {
                let channel = channel.or_else(|| match context {
                    ContextId::Channel(_, name) => Some(name.clone()),
                    _ => None,
                });
                match (channel, text) {
                    (Some(channel), Some(text)) => {
                        self.write_line(&format_command("TOPIC", &[&channel, &text]))
                    }
                    (Some(channel), None) => self.write_line(&format_command("TOPIC", &[&channel])),
                    (None, _) => self.print_server(MessageKind::Error, "Not in a channel"),
                }
            }
            ParsedCommand::Quit { message } => self.disconnect_with(message.as_deref()),
            ParsedCommand::Close => self.close_context(context),
            ParsedCommand::Raw { line } => self.write_line(&line),
        }
    }

    fn say(&mut self, context: ContextId, target: &str, text: &str, action: bool) {
        if self.sink.is_none() {
            self.print(context, MessageKind::Error, "Not connected", None);
            return;
        }
        // No CTCP smuggling through ordinary messages.
        let clean = text.replace('\x01', "");
        let nick = self.me_nick().unwrap_or(&self.config.nickname).to_string();
        if action {
            self.write_line(&format_command("PRIVMSG", &[target, &format!("\x01ACTION {}\x01", clean)]));
            self.print(context, MessageKind::Action, format!("* {} {}", nick, clean), None);
        } else {
            self.write_line(&format_command("PRIVMSG", &[target, &clean]));
            self.print(context, MessageKind::Normal, format!("<{}> {}", nick, clean), None);
        }
    }
}

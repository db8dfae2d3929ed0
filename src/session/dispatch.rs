//! Inbound command handling: updates session state from one parsed message
//! and tells the front-end what happened.

use super::context::ContextId;
use super::server::Server;
use super::user::UserId;
use crate::app::event::{MessageKind, SessionEvent};
use crate::config::settings::STRIP_COLOR;
use crate::irc::casemap::{casefold_eq, casefold_find, CaseKey};
use crate::irc::caps::Caps;
use crate::irc::formatting::strip_attributes;
use crate::irc::message::{format_command, Message};

pub fn version_string() -> String {
    format!("crabirc {}", env!("CARGO_PKG_VERSION"))
}

/// `*` and `0` both mean "not logged in".
fn account_value(raw: &str) -> Option<String> {
    match raw {
        "" | "*" | "0" => None,
        account => Some(account.to_string()),
    }
}

impl Server {
    pub(super) fn dispatch(&mut self, msg: &Message) {
        if let Some(numeric) = msg.numeric() {
            return self.handle_numeric(numeric, msg);
        }
        match msg.command().unwrap_or("") {
            "PRIVMSG" => self.on_privmsg(msg),
            "NOTICE" => self.on_notice(msg),
            "JOIN" => self.on_join(msg),
            "PART" => self.on_part(msg),
            "KICK" => self.on_kick(msg),
            "QUIT" => self.on_quit(msg),
            "NICK" => self.on_nick(msg),
            "MODE" => self.on_mode(msg),
            "TOPIC" => self.on_topic(msg),
            "ACCOUNT" => self.on_account(msg),
            "CHGHOST" => self.on_chghost(msg),
            "AWAY" => self.on_away(msg),
            "PING" => {
                let line = format!("PONG {}", msg.content.as_deref().unwrap_or(""));
                self.write_line(line.trim_end());
            }
            "CAP" => {
                let creds = self.config.sasl_credentials();
                let actions = self
                    .cap_negotiator
                    .handle_cap(msg, &mut self.caps, creds.as_ref());
                self.apply_cap_actions(actions);
            }
            "AUTHENTICATE" => {
                let creds = self.config.sasl_credentials();
                let actions = self.cap_negotiator.handle_authenticate(msg, creds.as_ref());
                self.apply_cap_actions(actions);
            }
            "ERROR" => self.print_server(MessageKind::Error, msg.param(0)),
            other => tracing::debug!(network = %self.config.name, command = other, "unhandled command"),
        }
    }

    fn known_channel(&self, name: &str) -> Option<ContextId> {
        self.channels
            .get(&CaseKey::new(name))
            .map(|chan| self.channel_context(&chan.name))
    }

    fn on_privmsg(&mut self, msg: &Message) {
        let target = msg.param(0);
        let body = msg.param(1);
        let nick = msg.source_nick();
        let is_you = self.is_me(nick);
        let is_chan = self.isupport.is_channel(target);

        let (text, is_action) = match body.strip_prefix("\x01ACTION") {
            Some(rest) => (
                rest.strip_prefix(' ').unwrap_or(rest).trim_end_matches('\x01'),
                true,
            ),
            None => (body, false),
        };
        if !is_action {
            if let Some(request) = body
                .strip_prefix('\x01')
                .and_then(|rest| rest.strip_suffix('\x01'))
            {
                self.on_ctcp(nick, target, request);
                return;
            }
        }

        let context = if is_chan {
            match self.known_channel(target) {
                Some(context) => context,
                None => {
                    tracing::warn!(network = %self.config.name, channel = target, "message for a channel we are not in");
                    return;
                }
            }
        } else if is_you {
            // self-message echo of something we sent to `target`
            self.ensure_query(target, target)
        } else {
            let userhost = msg.sender.as_deref().unwrap_or(nick);
            let context = self.ensure_query(nick, userhost);
            if let Some(query) = self.queries.get_mut(&CaseKey::new(nick)) {
                query.set_online(&mut self.users, true);
            }
            context
        };

        let display = msg
            .tag("display-name")
            .filter(|name| self.caps.contains(Caps::TWITCH_TAGS) && casefold_eq(name, nick))
            .unwrap_or(nick);
        let highlight =
            !is_you && self.me_nick().is_some_and(|me| casefold_find(text, me).is_some());
        let text = if self.setting(&context, STRIP_COLOR) {
            strip_attributes(text)
        } else {
            text.to_string()
        };

        let (kind, line) = match (is_action, highlight) {
            (true, false) => (MessageKind::Action, format!("* {} {}", display, text)),
            (true, true) => (MessageKind::Highlight, format!("* {} {}", display, text)),
            (false, true) => (MessageKind::Highlight, format!("<{}> {}", display, text)),
            (false, false) => (MessageKind::Normal, format!("<{}> {}", display, text)),
        };
        self.print(context.clone(), kind, line.clone(), msg.server_time);

        // Playback carries a timestamp and is never announced.
        if is_you || msg.server_time.is_some() {
            return;
        }
        if !self.is_front(&context) && (highlight || !is_chan) {
            let title = if is_chan {
                format!("Highlight in {}", context.name())
            } else {
                format!("Private message from {}", display)
            };
            self.emit(SessionEvent::Notify {
                context: context.clone(),
                title,
                body: line,
            });
        }
        self.emit(SessionEvent::Activity {
            context,
            highlight: highlight || !is_chan,
        });
    }

    fn on_ctcp(&mut self, nick: &str, target: &str, request: &str) {
        let command = request.split(' ').next().unwrap_or("");
        if command.eq_ignore_ascii_case("VERSION") && self.is_me(target) && !self.is_me(nick) {
            let reply = format!("\x01VERSION {}\x01", version_string());
            self.write_line(&format_command("NOTICE", &[nick, &reply]));
            return;
        }
        tracing::warn!(network = %self.config.name, from = nick, command, "ignoring CTCP request");
    }

    fn on_notice(&mut self, msg: &Message) {
        let from = match msg.source_nick() {
            "" => self.config.host.clone(),
            nick => nick.to_string(),
        };
        let text = msg.param(1).trim_matches('\x01');
        let context = self
            .known_channel(msg.param(0))
            .unwrap_or_else(|| self.server_context());
        self.print(
            context,
            MessageKind::Notice,
            format!("-{}- {}", from, text),
            msg.server_time,
        );
    }

    fn on_join(&mut self, msg: &Message) {
        let name = msg.param(0);
        let nick = msg.source_nick();
        let key = CaseKey::new(name);

        if self.is_me(nick) {
            let created = match self.channels.get_mut(&key) {
                Some(channel) => {
                    channel.set_joined(&mut self.users, true);
                    false
                }
                None => {
                    self.channels.insert(key.clone(), super::channel::Channel::new(name));
                    true
                }
            };
            let context = self.channel_context(name);
            if created {
                self.emit(SessionEvent::ContextAdded(context.clone()));
            }
            self.print(context, MessageKind::Join, format!("--> You joined {}", name), msg.server_time);
            return;
        }

        let Some(channel) = self.channels.get_mut(&key) else {
            tracing::warn!(network = %self.config.name, channel = name, nick, "JOIN for a channel we are not in");
            return;
        };
        let id = self.users.intern(msg.sender.as_deref().unwrap_or(nick));
        let change = channel.add_member(&mut self.users, id, "");
        let channel_name = channel.name.clone();

        if msg.params.len() >= 3 {
            if let Some(user) = self.users.get_mut(id) {
                user.account = account_value(msg.param(1));
                user.realname = msg.param(2).to_string();
            }
        }

        let context = self.channel_context(&channel_name);
        self.emit_member_changes(&context, change);
        if !self.hide_join_part(&context) {
            let host = self
                .users
                .get(id)
                .filter(|u| !u.username.is_empty())
                .map(|u| format!(" ({}@{})", u.username, u.hostname))
                .unwrap_or_default();
            self.print(
                context,
                MessageKind::Join,
                format!("--> {}{} joined {}", nick, host, channel_name),
                msg.server_time,
            );
        }
    }

    fn on_part(&mut self, msg: &Message) {
        let name = msg.param(0);
        let reason = msg.param(1);
        let nick = msg.source_nick();
        let is_you = self.is_me(nick);

        let Some(channel) = self.channels.get_mut(&CaseKey::new(name)) else {
            tracing::warn!(network = %self.config.name, channel = name, nick, "PART for a channel we are not in");
            return;
        };
        let channel_name = channel.name.clone();
        let changes = if is_you {
            channel.set_joined(&mut self.users, false)
        } else {
            match self.users.lookup(nick) {
                Some(id) => channel.remove_member(&mut self.users, id).into_iter().collect(),
                None => Vec::new(),
            }
        };

        let context = self.channel_context(&channel_name);
        let was_member = !changes.is_empty();
        self.emit_member_changes(&context, changes);
        let suffix = if reason.is_empty() {
            String::new()
        } else {
            format!(" ({})", reason)
        };
        if is_you {
            self.print(context, MessageKind::Part, format!("<-- You left {}{}", channel_name, suffix), msg.server_time);
        } else if was_member && !self.hide_join_part(&context) {
            self.print(
                context,
                MessageKind::Part,
                format!("<-- {} left {}{}", nick, channel_name, suffix),
                msg.server_time,
            );
        }
    }

    fn on_kick(&mut self, msg: &Message) {
        let name = msg.param(0);
        let victim = msg.param(1);
        let reason = msg.param(2);
        let kicker = msg.source_nick();
        let is_you = self.is_me(victim);

        let Some(channel) = self.channels.get_mut(&CaseKey::new(name)) else {
            tracing::warn!(network = %self.config.name, channel = name, "KICK for a channel we are not in");
            return;
        };
        let channel_name = channel.name.clone();
        let changes = if is_you {
            channel.set_joined(&mut self.users, false)
        } else {
            match self.users.lookup(victim) {
                Some(id) => channel.remove_member(&mut self.users, id).into_iter().collect(),
                None => Vec::new(),
            }
        };

        let context = self.channel_context(&channel_name);
        self.emit_member_changes(&context, changes);
        let text = if is_you {
            format!("<-- You were kicked from {} by {} ({})", channel_name, kicker, reason)
        } else {
            format!("<-- {} was kicked from {} by {} ({})", victim, channel_name, kicker, reason)
        };
        self.print(context, MessageKind::Part, text, msg.server_time);
    }

    fn on_quit(&mut self, msg: &Message) {
        let nick = msg.source_nick();
        let reason = msg.param(0);
        let Some(id) = self.users.lookup(nick) else {
            tracing::debug!(network = %self.config.name, nick, "QUIT from unknown user");
            return;
        };
        if Some(id) == self.me {
            return;
        }

        // Hold the user for the whole sweep so its id stays valid.
        self.users.retain(id);
        let mut left = Vec::new();
        for channel in self.channels.values_mut() {
            if let Some(change) = channel.remove_member(&mut self.users, id) {
                left.push((channel.name.clone(), change));
            }
        }
        self.users.release(id);

        for (name, change) in left {
            let context = self.channel_context(&name);
            self.emit_member_changes(&context, Some(change));
            if !self.hide_join_part(&context) {
                let text = if reason.is_empty() {
                    format!("<-- {} quit", nick)
                } else {
                    format!("<-- {} quit ({})", nick, reason)
                };
                self.print(context, MessageKind::Quit, text, msg.server_time);
            }
        }
    }

    fn on_nick(&mut self, msg: &Message) {
        let old = msg.source_nick();
        let new = msg.param(0);
        let Some(id) = self.users.lookup(old) else {
            tracing::debug!(network = %self.config.name, nick = old, "NICK from unknown user");
            return;
        };
        if let Some(stale) = self.users.lookup(new).filter(|&other| other != id) {
            self.displace_user(stale, id);
        }
        self.users.rename(id, new);

        let mut renamed = Vec::new();
        for channel in self.channels.values_mut() {
            let changes = channel.rename_member(id, new);
            if !changes.is_empty() {
                renamed.push((channel.name.clone(), changes));
            }
        }
        for (name, changes) in renamed {
            let context = self.channel_context(&name);
            self.emit_member_changes(&context, changes);
            self.print(
                context,
                MessageKind::System,
                format!("* {} is now known as {}", old, new),
                msg.server_time,
            );
        }
        if Some(id) == self.me {
            self.print_server(MessageKind::System, format!("You are now known as {}", new));
        }
    }

    /// `stale` still holds a nick the server just gave to `replacement`, so
    /// it left without us seeing it. Queries follow the nick, memberships go.
    fn displace_user(&mut self, stale: UserId, replacement: UserId) {
        tracing::debug!(
            network = %self.config.name,
            nick = self.users.nick(stale),
            "nick taken over from a user we never saw leave"
        );
        for query in self.queries.values_mut() {
            if query.peer() == Some(stale) {
                query.set_peer(&mut self.users, replacement);
            }
        }
        let mut removed = Vec::new();
        for channel in self.channels.values_mut() {
            if let Some(change) = channel.remove_member(&mut self.users, stale) {
                removed.push((channel.name.clone(), change));
            }
        }
        for (name, change) in removed {
            let context = self.channel_context(&name);
            self.emit_member_changes(&context, vec![change]);
        }
    }

    fn on_mode(&mut self, msg: &Message) {
        let target = msg.param(0);
        let setter = match msg.source_nick() {
            "" => self.config.host.clone(),
            nick => nick.to_string(),
        };
        if !self.isupport.is_channel(target) {
            self.print_server(
                MessageKind::System,
                format!("* {} sets mode {} on {}", setter, msg.params[1..].join(" "), target),
            );
            return;
        }
        let key = CaseKey::new(target);
        let Some(channel_name) = self.channels.get(&key).map(|c| c.name.clone()) else {
            tracing::warn!(network = %self.config.name, channel = target, "MODE for a channel we are not in");
            return;
        };

        let mut args = msg.params.iter().skip(2);
        let mut adding = true;
        let mut prefix_changes = Vec::new();
        for mode in msg.param(1).chars() {
            match mode {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    let arg = if self.isupport.mode_takes_param(mode, adding) {
                        args.next()
                    } else {
                        None
                    };
                    if let (Some(symbol), Some(nick)) = (self.isupport.prefix_for_mode(mode), arg) {
                        prefix_changes.push((nick.as_str(), symbol, adding));
                    }
                }
            }
        }

        for (nick, symbol, adding) in prefix_changes {
            let Some(id) = self.users.lookup(nick) else {
                continue;
            };
            let Some(channel) = self.channels.get_mut(&key) else {
                break;
            };
            let Some(current) = channel.member_prefix(id) else {
                continue;
            };
            let updated = if adding {
                self.isupport.add_prefix(current, symbol)
            } else {
                self.isupport.remove_prefix(current, symbol)
            };
            channel.set_member_prefix(id, &updated);
        }

        let context = self.channel_context(&channel_name);
        self.print(
            context,
            MessageKind::System,
            format!("* {} sets mode {}", setter, msg.params[1..].join(" ")),
            msg.server_time,
        );
    }

    fn on_topic(&mut self, msg: &Message) {
        let name = msg.param(0);
        let topic = msg.param(1);
        let Some(channel) = self.channels.get_mut(&CaseKey::new(name)) else {
            tracing::warn!(network = %self.config.name, channel = name, "TOPIC for a channel we are not in");
            return;
        };
        channel.topic = (!topic.is_empty()).then(|| topic.to_string());
        let channel_name = channel.name.clone();
        let context = self.channel_context(&channel_name);
        self.print(
            context,
            MessageKind::System,
            format!("* {} changed the topic to: {}", msg.source_nick(), topic),
            msg.server_time,
        );
    }

    fn on_account(&mut self, msg: &Message) {
        let Some(id) = self.users.lookup(msg.source_nick()) else {
            return;
        };
        if let Some(user) = self.users.get_mut(id) {
            user.account = account_value(msg.param(0));
        }
    }

    fn on_chghost(&mut self, msg: &Message) {
        let Some(id) = self.users.lookup(msg.source_nick()) else {
            return;
        };
        if let Some(user) = self.users.get_mut(id) {
            user.username = msg.param(0).to_string();
            user.hostname = msg.param(1).to_string();
        }
    }

    fn on_away(&mut self, msg: &Message) {
        let Some(id) = self.users.lookup(msg.source_nick()) else {
            return;
        };
        if let Some(user) = self.users.get_mut(id) {
            let reason = msg.param(0);
            user.away = !reason.is_empty();
            user.away_reason = user.away.then(|| reason.to_string());
        }
    }
}

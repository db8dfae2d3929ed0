//! Numeric reply handling.

use super::server::Server;
use crate::app::event::{ConnectionState, MessageKind};
use crate::irc::casemap::CaseKey;
use crate::irc::caps::Caps;
use crate::irc::message::{format_command, Message};

/// Query type we tag our WHOX requests with; replies carrying any other
/// token were not asked for by us.
pub const WHOX_TOKEN: &str = "152";

const RPL_WELCOME: u16 = 1;
const RPL_ISUPPORT: u16 = 5;
const RPL_ISON: u16 = 303;
const RPL_ENDOFWHO: u16 = 315;
const RPL_TOPIC: u16 = 332;
const RPL_TOPICWHOTIME: u16 = 333;
const RPL_NAMREPLY: u16 = 353;
const RPL_WHOSPCRPL: u16 = 354;
const RPL_ENDOFNAMES: u16 = 366;
const RPL_MOTD: u16 = 372;
const RPL_MOTDSTART: u16 = 375;
const RPL_ENDOFMOTD: u16 = 376;
const ERR_NOMOTD: u16 = 422;
const ERR_NICKNAMEINUSE: u16 = 433;
const RPL_MONONLINE: u16 = 730;
const RPL_MONOFFLINE: u16 = 731;
const RPL_SASLSUCCESS: u16 = 903;
const ERR_SASLFAIL: u16 = 904;
const ERR_SASLTOOLONG: u16 = 905;
const ERR_SASLABORTED: u16 = 906;

impl Server {
    pub(super) fn handle_numeric(&mut self, numeric: u16, msg: &Message) {
        match numeric {
            RPL_WELCOME => self.on_welcome(msg),
            RPL_ISUPPORT => self.on_isupport(msg),
            RPL_ISON => self.on_ison(msg),
            RPL_ENDOFWHO | RPL_TOPICWHOTIME => {}
            RPL_TOPIC => self.on_topic_reply(msg),
            RPL_NAMREPLY => self.on_names(msg),
            RPL_WHOSPCRPL => self.on_whox(msg),
            RPL_ENDOFNAMES => {
                if self.caps.contains(Caps::WHOX) {
                    let request = format!("%chtsunfra,{}", WHOX_TOKEN);
                    self.write_line(&format_command("WHO", &[msg.param(1), &request]));
                }
            }
            RPL_MOTD | RPL_MOTDSTART => self.print_server(MessageKind::System, msg.param(1)),
            RPL_ENDOFMOTD | ERR_NOMOTD => {
                self.print_server(MessageKind::System, msg.param(1));
                self.on_end_of_motd();
            }
            ERR_NICKNAMEINUSE => self.on_nick_in_use(msg),
            RPL_MONONLINE | RPL_MONOFFLINE => {
                let online = numeric == RPL_MONONLINE;
                for target in msg.param(1).split(',').filter(|t| !t.is_empty()) {
                    self.set_peer_online(target, online);
                }
            }
            RPL_SASLSUCCESS | ERR_SASLFAIL | ERR_SASLTOOLONG | ERR_SASLABORTED => {
                let (kind, text) = match numeric {
                    RPL_SASLSUCCESS => (MessageKind::System, "SASL authentication successful"),
                    ERR_SASLFAIL => (MessageKind::Error, "SASL authentication failed"),
                    ERR_SASLTOOLONG => (MessageKind::Error, "SASL message too long"),
                    _ => (MessageKind::Error, "SASL authentication aborted"),
                };
                self.print_server(kind, text);
                let actions = self.cap_negotiator.sasl_finished();
                self.apply_cap_actions(actions);
            }
            other => {
                tracing::debug!(network = %self.config.name, numeric = other, text = msg.word_eol(1), "unhandled numeric")
            }
        }
    }

    fn on_welcome(&mut self, msg: &Message) {
        self.cap_negotiator.registered();
        self.nick_retry.reset();
        let nick = msg.param(0);
        if let Some(me) = self.me {
            if !nick.is_empty() && self.users.nick(me) != nick {
                self.users.rename(me, nick);
            }
        }
        self.set_state(ConnectionState::Ready);
        self.print_server(MessageKind::System, msg.param(1));
    }

    fn on_isupport(&mut self, msg: &Message) {
        for token in msg.params.iter().skip(1) {
            if let Err(e) = self.isupport.apply_token(token, &mut self.caps) {
                tracing::warn!(network = %self.config.name, error = %e, "ignoring ISUPPORT token");
            }
        }
        self.print_server(MessageKind::System, msg.params[1..].join(" "));
    }

    fn on_ison(&mut self, msg: &Message) {
        let online: Vec<CaseKey> = msg.param(1).split_whitespace().map(CaseKey::new).collect();
        for (key, query) in self.queries.iter_mut() {
            if online.contains(key) {
                if query.peer().is_none() {
                    let id = self.users.intern(&query.name);
                    query.set_peer(&mut self.users, id);
                }
                query.set_online(&mut self.users, true);
            } else {
                query.set_online(&mut self.users, false);
            }
        }
    }

    fn on_topic_reply(&mut self, msg: &Message) {
        let name = msg.param(1);
        let topic = msg.param(2);
        let Some(channel) = self.channels.get_mut(&CaseKey::new(name)) else {
            tracing::debug!(network = %self.config.name, channel = name, "topic for a channel we are not in");
            return;
        };
        channel.topic = (!topic.is_empty()).then(|| topic.to_string());
        let channel_name = channel.name.clone();
        let context = self.channel_context(&channel_name);
        self.print(context, MessageKind::System, format!("Topic: {}", topic), msg.server_time);
    }

    fn on_names(&mut self, msg: &Message) {
        let name = msg.param(2);
        let key = CaseKey::new(name);
        let Some(channel) = self.channels.get_mut(&key) else {
            tracing::debug!(network = %self.config.name, channel = name, "NAMES for a channel we are not in");
            return;
        };
        let with_userhost = self.caps.contains(Caps::USERHOST_IN_NAMES);
        let mut changes = Vec::new();
        for entry in msg.param(3).split_whitespace() {
            let (prefix, rest) = self.isupport.split_prefix(entry);
            if rest.is_empty() {
                continue;
            }
            let userhost = if with_userhost {
                rest
            } else {
                rest.split(['!', '@']).next().unwrap_or(rest)
            };
            let id = self.users.intern(userhost);
            changes.extend(channel.add_member(&mut self.users, id, prefix));
        }
        let channel_name = channel.name.clone();
        let context = self.channel_context(&channel_name);
        self.emit_member_changes(&context, changes);
    }

    /// `354 me <token> <channel> <user> <host> <server> <nick> <flags> <account> :<realname>`
    fn on_whox(&mut self, msg: &Message) {
        if msg.param(1) != WHOX_TOKEN {
            tracing::debug!(network = %self.config.name, token = msg.param(1), "ignoring foreign WHOX reply");
            return;
        }
        let Some(id) = self.users.lookup(msg.param(6)) else {
            return;
        };
        let update_host = !self.caps.contains(Caps::USERHOST_IN_NAMES);
        // Without away-notify the flag goes stale, so it is not tracked.
        let update_away = self.caps.contains(Caps::AWAY_NOTIFY);
        let Some(user) = self.users.get_mut(id) else {
            return;
        };
        if update_host {
            user.username = msg.param(3).to_string();
            user.hostname = msg.param(4).to_string();
        }
        if update_away {
            user.away = msg.param(7).starts_with('G');
        }
        user.account = match msg.param(8) {
            "" | "0" | "*" => None,
            account => Some(account.to_string()),
        };
        user.realname = msg.param(9).to_string();
    }

    /// Registration is complete: rejoin what we had, or the configured
    /// channels on a fresh session, and ask after open queries.
    fn on_end_of_motd(&mut self) {
        let mut channels: Vec<String> = if self.channels.is_empty() {
            self.config.channels.clone()
        } else {
            self.channels.values().map(|c| c.name.clone()).collect()
        };
        channels.sort();
        if !channels.is_empty() {
            self.write_line(&format_command("JOIN", &[&channels.join(",")]));
        }

        let mut nicks: Vec<String> = self.queries.values().map(|q| q.name.clone()).collect();
        nicks.sort();
        if nicks.is_empty() {
            return;
        }
        if self.caps.contains(Caps::MONITOR) {
            self.write_line(&format!("MONITOR + {}", nicks.join(",")));
        } else {
            self.write_line(&format!("ISON {}", nicks.join(" ")));
        }
    }

    fn on_nick_in_use(&mut self, msg: &Message) {
        let rejected = msg.param(1);
        if self.state == ConnectionState::Ready {
            self.print_server(MessageKind::Error, format!("Nickname {} is already in use", rejected));
            return;
        }
        match self.nick_retry.next(rejected) {
            Some(nick) => {
                if let Some(me) = self.me {
                    self.users.rename(me, &nick);
                }
                self.print_server(
                    MessageKind::System,
                    format!("Nickname {} is already in use, trying {}", rejected, nick),
                );
                self.write_line(&format_command("NICK", &[&nick]));
            }
            None => self.print_server(
                MessageKind::Error,
                format!("Nickname {} is already in use and no alternatives are left; pick one with /nick", rejected),
            ),
        }
    }

    /// MONITOR reported `target` (`nick[!user@host]`) going on or offline.
    fn set_peer_online(&mut self, target: &str, online: bool) {
        let nick = target.split('!').next().unwrap_or(target);
        let Some(query) = self.queries.get_mut(&CaseKey::new(nick)) else {
            tracing::debug!(network = %self.config.name, nick, "MONITOR status for an unknown query");
            return;
        };
        if online && query.peer().is_none() {
            let id = self.users.intern(target);
            query.set_peer(&mut self.users, id);
        }
        query.set_online(&mut self.users, online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::config::settings::SettingsConfig;
    use crate::app::event::SessionEvent;
    use crate::session::server::tests::Harness;

    #[test]
    fn test_welcome_then_isupport() {
        let mut h = Harness::new();
        h.feed(":serv 001 me_ :Welcome to the network");
        h.feed(":serv 005 me_ PREFIX=(ov)@+ CHANTYPES=# :are supported by this server");
        assert_eq!(h.server.state(), ConnectionState::Ready);
        assert_eq!(h.server.me_nick(), Some("me_"));
        assert!(h.server.cap_negotiator().sent_cap_end());
        let isupport = h.server.isupport();
        assert_eq!(isupport.nick_prefixes, "@+");
        assert_eq!(isupport.nick_modes, "ov");
        assert_eq!(isupport.chan_types, "#");
        assert!(!isupport.is_channel("&local"));
        let printed = h.printed();
        assert!(printed
            .iter()
            .any(|(_, text)| text == "PREFIX=(ov)@+ CHANTYPES=# are supported by this server"));
    }

    #[test]
    fn test_isupport_whox_monitor() {
        let mut h = Harness::registered();
        h.feed(":serv 005 me WHOX MONITOR=100 PREFIX=(qaohv)~&@%+ :are supported");
        assert!(h.server.caps().contains(Caps::WHOX | Caps::MONITOR));
        assert_eq!(h.server.isupport().nick_prefixes, "~&@%+");
        h.feed(":serv 005 me -WHOX PREFIX=bogus :are supported");
        assert!(!h.server.caps().contains(Caps::WHOX));
        assert_eq!(h.server.isupport().nick_prefixes, "~&@%+");
    }

    #[test]
    fn test_names_then_whox() {
        let mut h = Harness::registered();
        h.feed(":serv 005 me WHOX :are supported");
        h.feed(":me!u@h JOIN #test");
        h.feed(":serv 353 me = #test :@op +voiced plain");
        h.feed(":serv 353 me = #test :me");
        h.feed(":serv 366 me #test :End of /NAMES list.");
        assert_eq!(h.member_nicks("#test"), vec!["me", "op", "plain", "voiced"]);
        assert_eq!(h.sink.lines(), vec!["WHO #test %chtsunfra,152"]);

        h.feed(":serv 354 me 152 #test ouser o.host irc.serv op G opacct :Op Erator");
        h.feed(":serv 354 me 999 #test x y irc.serv plain H acct :ignored");
        let users = h.server.users();
        let op = users.get(users.lookup("op").unwrap()).unwrap();
        assert_eq!(op.username, "ouser");
        assert_eq!(op.hostname, "o.host");
        // not tracked without away-notify
        assert!(!op.away);
        assert_eq!(op.account.as_deref(), Some("opacct"));
        assert_eq!(op.realname, "Op Erator");
        let plain = users.get(users.lookup("plain").unwrap()).unwrap();
        assert_eq!(plain.account, None);
        assert!(plain.username.is_empty());
    }

    #[test]
    fn test_whox_sets_initial_away_with_away_notify() {
        let mut h = Harness::registered();
        h.server.caps.insert(Caps::AWAY_NOTIFY | Caps::WHOX);
        h.feed(":me!u@h JOIN #c");
        h.feed(":serv 353 me = #c :me bob carol");
        h.feed(":serv 354 me 152 #c u h srv bob G 0 :r");
        h.feed(":serv 354 me 152 #c u h srv carol H 0 :r");
        let users = h.server.users();
        assert!(users.get(users.lookup("bob").unwrap()).unwrap().away);
        assert!(!users.get(users.lookup("carol").unwrap()).unwrap().away);
    }

    #[test]
    fn test_names_with_userhost() {
        let mut h = Harness::registered();
        h.server.caps.insert(Caps::USERHOST_IN_NAMES | Caps::MULTI_PREFIX);
        h.feed(":me!u@h JOIN #test");
        h.feed(":serv 353 me = #test :@+op!o@op.host");
        let users = h.server.users();
        let id = users.lookup("op").unwrap();
        assert_eq!(users.get(id).unwrap().hostname, "op.host");
        assert_eq!(h.server.channel("#test").unwrap().member_prefix(id), Some("@+"));
    }

    #[test]
    fn test_topic_reply() {
        let mut h = Harness::registered();
        h.feed(":me!u@h JOIN #test");
        h.feed(":serv 332 me #test :Welcome to #test");
        assert_eq!(h.server.channel("#test").unwrap().topic.as_deref(), Some("Welcome to #test"));
    }

    #[test]
    fn test_end_of_motd_joins_configured_channels() {
        let mut config = NetworkConfig::new("testnet", "irc.example.org", "me");
        config.channels = vec!["#rust".into(), "#crabirc".into()];
        let mut h = Harness::with_config(config, SettingsConfig::default());
        h.feed(":serv 001 me :Welcome");
        h.feed(":serv 376 me :End of /MOTD command.");
        assert_eq!(h.sink.lines(), vec!["JOIN #crabirc,#rust"]);
    }

    #[test]
    fn test_reconnect_rejoins_known_channels_and_queries() {
        let mut h = Harness::registered();
        h.feed(":me!u@h JOIN #one");
        h.feed(":me!u@h JOIN #two");
        h.feed(":zed!z@h PRIVMSG me :hi");
        h.feed(":amy!a@h PRIVMSG me :hi");
        h.server.disconnect();

        let target = h.server.begin_connect();
        let sink = crate::session::sendq::tests::RecordingSink::default();
        h.server.on_connected(target.generation, Box::new(sink.clone()), 0).unwrap();
        h.feed(":serv 001 me :Welcome");
        h.feed(":serv 422 me :MOTD File is missing");
        let lines = sink.lines();
        assert_eq!(&lines[lines.len() - 2..], &["JOIN #one,#two", "ISON amy zed"]);
    }

    #[test]
    fn test_monitor_online_offline() {
        let mut h = Harness::registered();
        h.feed(":serv 005 me MONITOR=100 :are supported");
        h.feed(":friend!f@h PRIVMSG me :hi");
        h.feed(":serv 731 me :friend");
        assert!(!h.server.query("friend").unwrap().online);
        assert!(h.server.users().lookup("friend").is_none());
        h.feed(":serv 730 me :friend!f@back.host,stranger!s@h");
        let query = h.server.query("friend").unwrap();
        assert!(query.online);
        let id = query.peer().unwrap();
        assert_eq!(h.server.users().get(id).unwrap().hostname, "back.host");
        assert!(h.server.users().lookup("stranger").is_none());
    }

    #[test]
    fn test_ison_reply() {
        let mut h = Harness::registered();
        h.feed(":a!a@h PRIVMSG me :hi");
        h.feed(":b!b@h PRIVMSG me :hi");
        h.feed(":serv 303 me :A");
        assert!(h.server.query("a").unwrap().online);
        assert!(!h.server.query("b").unwrap().online);
    }

    #[test]
    fn test_nick_in_use_during_registration() {
        let mut config = NetworkConfig::new("testnet", "irc.example.org", "me");
        config.alt_nicks = vec!["other".into()];
        let mut h = Harness::with_config(config, SettingsConfig::default());
        h.feed(":serv 433 * me :Nickname is already in use");
        h.feed(":serv 433 * other :Nickname is already in use");
        h.feed(":serv 433 * other_ :Nickname is already in use");
        h.feed(":serv 433 * other__ :Nickname is already in use");
        h.feed(":serv 433 * other___ :Nickname is already in use");
        assert_eq!(
            h.sink.lines(),
            vec!["NICK other", "NICK other_", "NICK other__", "NICK other___"]
        );
        assert_eq!(h.server.me_nick(), Some("other___"));
        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Print(p) if p.kind == MessageKind::Error
        )));
    }

    #[test]
    fn test_nick_in_use_after_registration_only_prints() {
        let mut h = Harness::registered();
        h.feed(":serv 433 me taken :Nickname is already in use");
        assert!(h.sink.lines().is_empty());
        assert_eq!(h.server.me_nick(), Some("me"));
    }

    #[test]
    fn test_unknown_numeric_is_ignored() {
        let mut h = Harness::registered();
        h.feed(":serv 999 me :something odd");
        h.feed(":serv 421 me FOO :Unknown command");
        assert!(h.printed().is_empty());
    }
}

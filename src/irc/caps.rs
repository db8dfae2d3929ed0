//! IRCv3 capability negotiation.
//!
//! [`CapNegotiator`] is a small state machine fed with `CAP`, `AUTHENTICATE`
//! and SASL result numerics. It never writes to the socket itself: every
//! handler returns the [`CapAction`]s the session should carry out.

use super::casemap::casefold_eq;
use super::message::Message;
use super::sasl::{self, SaslCredentials};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of negotiated capabilities and server support flags.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Caps(u32);

impl Caps {
    pub const SERVER_TIME: Caps = Caps(1 << 0);
    pub const USERHOST_IN_NAMES: Caps = Caps(1 << 1);
    pub const EXTENDED_JOIN: Caps = Caps(1 << 2);
    pub const ACCOUNT_NOTIFY: Caps = Caps(1 << 3);
    pub const CHGHOST: Caps = Caps(1 << 4);
    pub const MULTI_PREFIX: Caps = Caps(1 << 5);
    pub const SASL: Caps = Caps(1 << 6);
    pub const AWAY_NOTIFY: Caps = Caps(1 << 7);
    pub const CAP_NOTIFY: Caps = Caps(1 << 8);
    pub const SELF_MESSAGE: Caps = Caps(1 << 9);
    pub const TWITCH_MEMBERSHIP: Caps = Caps(1 << 10);
    pub const TWITCH_TAGS: Caps = Caps(1 << 11);
    // Learned from ISUPPORT rather than CAP.
    pub const WHOX: Caps = Caps(1 << 16);
    pub const MONITOR: Caps = Caps(1 << 17);

    pub const fn empty() -> Self {
        Caps(0)
    }

    pub const fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Caps) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Caps) {
        self.0 &= !other.0;
    }
}

impl BitOr for Caps {
    type Output = Caps;

    fn bitor(self, rhs: Caps) -> Caps {
        Caps(self.0 | rhs.0)
    }
}

impl BitOrAssign for Caps {
    fn bitor_assign(&mut self, rhs: Caps) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = SUPPORTED_CAPS
            .iter()
            .filter(|(_, cap)| self.contains(*cap))
            .map(|(name, _)| *name)
            .chain(self.contains(Caps::WHOX).then_some("WHOX"))
            .chain(self.contains(Caps::MONITOR).then_some("MONITOR"))
            .collect();
        write!(f, "Caps({})", names.join(" "))
    }
}

/// Capabilities this client knows how to use.
pub const SUPPORTED_CAPS: &[(&str, Caps)] = &[
    ("server-time", Caps::SERVER_TIME),
    ("userhost-in-names", Caps::USERHOST_IN_NAMES),
    ("extended-join", Caps::EXTENDED_JOIN),
    ("account-notify", Caps::ACCOUNT_NOTIFY),
    ("chghost", Caps::CHGHOST),
    ("multi-prefix", Caps::MULTI_PREFIX),
    ("sasl", Caps::SASL),
    ("away-notify", Caps::AWAY_NOTIFY),
    ("cap-notify", Caps::CAP_NOTIFY),
    ("znc.in/server-time-iso", Caps::SERVER_TIME),
    ("znc.in/self-message", Caps::SELF_MESSAGE),
    ("twitch.tv/membership", Caps::TWITCH_MEMBERSHIP),
    ("twitch.tv/tags", Caps::TWITCH_TAGS),
];

pub fn lookup_cap(name: &str) -> Option<Caps> {
    SUPPORTED_CAPS
        .iter()
        .find(|(known, _)| casefold_eq(known, name))
        .map(|(_, cap)| *cap)
}

/// Keep each `CAP REQ` comfortably inside the 512 byte line limit.
const MAX_REQ_LEN: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapState {
    Idle,
    AwaitingLs,
    AwaitingAck,
    AwaitingSasl,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapAction {
    Send(String),
    Print(String),
}

#[derive(Debug, Default)]
pub struct CapNegotiator {
    started: bool,
    sent_cap_end: bool,
    /// A multi-line LS reply is still arriving.
    waiting_on_cap: bool,
    waiting_on_sasl: bool,
    /// `CAP REQ` lines not yet answered by ACK or NAK.
    pending_requests: usize,
    offered: Vec<String>,
}

impl CapNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// First line of the registration burst.
    pub fn start(&mut self) -> &'static str {
        self.reset();
        self.started = true;
        "CAP LS 302"
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn state(&self) -> CapState {
        if self.sent_cap_end {
            CapState::Ended
        } else if self.waiting_on_sasl {
            CapState::AwaitingSasl
        } else if self.pending_requests > 0 {
            CapState::AwaitingAck
        } else if self.started {
            CapState::AwaitingLs
        } else {
            CapState::Idle
        }
    }

    pub fn sent_cap_end(&self) -> bool {
        self.sent_cap_end
    }

    /// Registration finished without (or after) negotiation; no `CAP END`
    /// may be sent from now on.
    pub fn registered(&mut self) {
        self.sent_cap_end = true;
        self.waiting_on_cap = false;
    }

    /// Handle `CAP <target> <subcommand> [*] :<caps>`.
    pub fn handle_cap(
        &mut self,
        msg: &Message,
        caps: &mut Caps,
        sasl: Option<&SaslCredentials>,
    ) -> Vec<CapAction> {
        let subcommand = msg.param(1).to_ascii_uppercase();
        let (list, more) = if msg.param(2) == "*" {
            (msg.param(3), true)
        } else {
            (msg.param(2), false)
        };

        match subcommand.as_str() {
            "LS" | "NEW" => self.handle_offer(list, more, *caps, sasl),
            "ACK" => self.handle_ack(list, caps, sasl),
            "NAK" => {
                tracing::debug!(caps = list, "capabilities rejected");
                self.pending_requests = self.pending_requests.saturating_sub(1);
                self.try_finish()
            }
            "DEL" => self.handle_del(list, caps),
            "LIST" => vec![CapAction::Print(format!("Enabled capabilities: {}", list))],
            other => {
                tracing::warn!(subcommand = other, "unhandled CAP subcommand");
                Vec::new()
            }
        }
    }

    /// Server asks for the SASL payload with `AUTHENTICATE +`.
    pub fn handle_authenticate(
        &mut self,
        msg: &Message,
        sasl: Option<&SaslCredentials>,
    ) -> Vec<CapAction> {
        if msg.param(0) != "+" {
            tracing::warn!(payload = msg.param(0), "unexpected AUTHENTICATE challenge");
            return Vec::new();
        }
        match (self.waiting_on_sasl, sasl) {
            (true, Some(creds)) => {
                let encoded = sasl::encode_plain(&creds.username, &creds.password);
                sasl::authenticate_lines(&encoded)
                    .into_iter()
                    .map(CapAction::Send)
                    .collect()
            }
            _ => {
                tracing::warn!("AUTHENTICATE received without a SASL exchange in progress");
                Vec::new()
            }
        }
    }

    /// Numerics 903 through 906 all end the SASL exchange.
    pub fn sasl_finished(&mut self) -> Vec<CapAction> {
        self.waiting_on_sasl = false;
        self.try_finish()
    }

    fn handle_offer(
        &mut self,
        list: &str,
        more: bool,
        enabled: Caps,
        sasl: Option<&SaslCredentials>,
    ) -> Vec<CapAction> {
        for token in list.split_whitespace() {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (token, None),
            };
            let Some(cap) = lookup_cap(name) else {
                continue;
            };
            if enabled.contains(cap) {
                continue;
            }
            if cap == Caps::SASL {
                let plain_offered = value.map_or(true, |mechs| {
                    mechs.split(',').any(|m| m.eq_ignore_ascii_case("PLAIN"))
                });
                if sasl.is_none() || !plain_offered {
                    continue;
                }
            }
            if !self.offered.iter().any(|o| o == name) {
                self.offered.push(name.to_string());
            }
        }

        if more {
            self.waiting_on_cap = true;
            return Vec::new();
        }
        self.waiting_on_cap = false;

        let wanted = std::mem::take(&mut self.offered);
        if wanted.is_empty() {
            return self.try_finish();
        }

        let mut actions = Vec::new();
        let mut line = String::new();
        for name in wanted {
            if !line.is_empty() && line.len() + name.len() + 1 > MAX_REQ_LEN {
                actions.push(CapAction::Send(format!("CAP REQ :{}", line)));
                line.clear();
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&name);
        }
        actions.push(CapAction::Send(format!("CAP REQ :{}", line)));
        self.pending_requests += actions.len();
        actions
    }

    fn handle_ack(
        &mut self,
        list: &str,
        caps: &mut Caps,
        sasl: Option<&SaslCredentials>,
    ) -> Vec<CapAction> {
        self.pending_requests = self.pending_requests.saturating_sub(1);
        let mut sasl_granted = false;
        for token in list.split_whitespace() {
            if let Some(name) = token.strip_prefix('-') {
                if let Some(cap) = lookup_cap(name) {
                    caps.remove(cap);
                }
                continue;
            }
            if let Some(cap) = lookup_cap(token) {
                caps.insert(cap);
                sasl_granted |= cap == Caps::SASL;
            }
        }

        if sasl_granted && sasl.is_some() && !self.waiting_on_sasl && !self.sent_cap_end {
            self.waiting_on_sasl = true;
            return vec![CapAction::Send("AUTHENTICATE PLAIN".to_string())];
        }
        self.try_finish()
    }

    fn handle_del(&mut self, list: &str, caps: &mut Caps) -> Vec<CapAction> {
        for name in list.split_whitespace() {
            if let Some(cap) = lookup_cap(name) {
                caps.remove(cap);
                if cap == Caps::SASL && self.waiting_on_sasl {
                    self.waiting_on_sasl = false;
                    return self.try_finish();
                }
            }
        }
        Vec::new()
    }

    fn try_finish(&mut self) -> Vec<CapAction> {
        if self.sent_cap_end
            || self.waiting_on_cap
            || self.waiting_on_sasl
            || self.pending_requests > 0
        {
            return Vec::new();
        }
        self.sent_cap_end = true;
        vec![CapAction::Send("CAP END".to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(line: &str) -> Message {
        Message::parse(line).unwrap()
    }

    fn sent(actions: &[CapAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                CapAction::Send(line) => Some(line.as_str()),
                CapAction::Print(_) => None,
            })
            .collect()
    }

    fn creds() -> SaslCredentials {
        SaslCredentials::new("user", "pass").unwrap()
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup_cap("multi-prefix"), Some(Caps::MULTI_PREFIX));
        assert_eq!(lookup_cap("znc.in/server-time-iso"), Some(Caps::SERVER_TIME));
        assert_eq!(lookup_cap("batch"), None);
    }

    #[test]
    fn test_ls_without_supported_caps_ends() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::empty();
        neg.start();
        let actions = neg.handle_cap(&cap(":srv CAP * LS :batch labeled-response"), &mut caps, None);
        assert_eq!(sent(&actions), vec!["CAP END"]);
        assert_eq!(neg.state(), CapState::Ended);
    }

    #[test]
    fn test_multiline_ls_then_ack() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::empty();
        neg.start();
        let first = neg.handle_cap(&cap(":srv CAP * LS * :multi-prefix batch"), &mut caps, None);
        assert!(first.is_empty());
        assert_eq!(neg.state(), CapState::AwaitingLs);

        let second = neg.handle_cap(&cap(":srv CAP * LS :away-notify sasl=PLAIN"), &mut caps, None);
        assert_eq!(sent(&second), vec!["CAP REQ :multi-prefix away-notify"]);
        assert_eq!(neg.state(), CapState::AwaitingAck);

        let ack = neg.handle_cap(&cap(":srv CAP * ACK :multi-prefix away-notify"), &mut caps, None);
        assert_eq!(sent(&ack), vec!["CAP END"]);
        assert!(caps.contains(Caps::MULTI_PREFIX | Caps::AWAY_NOTIFY));
        assert!(!caps.contains(Caps::SASL));
    }

    #[test]
    fn test_sasl_flow() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::empty();
        let creds = creds();
        neg.start();
        let req = neg.handle_cap(&cap(":srv CAP * LS :sasl=EXTERNAL,PLAIN"), &mut caps, Some(&creds));
        assert_eq!(sent(&req), vec!["CAP REQ :sasl"]);

        let ack = neg.handle_cap(&cap(":srv CAP * ACK :sasl"), &mut caps, Some(&creds));
        assert_eq!(sent(&ack), vec!["AUTHENTICATE PLAIN"]);
        assert_eq!(neg.state(), CapState::AwaitingSasl);

        let payload = neg.handle_authenticate(&cap("AUTHENTICATE +"), Some(&creds));
        assert_eq!(sent(&payload), vec!["AUTHENTICATE dXNlcgB1c2VyAHBhc3M="]);

        assert_eq!(sent(&neg.sasl_finished()), vec!["CAP END"]);
        assert!(neg.sasl_finished().is_empty());
    }

    #[test]
    fn test_sasl_skipped_without_plain() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::empty();
        let creds = creds();
        neg.start();
        let actions = neg.handle_cap(&cap(":srv CAP * LS :sasl=EXTERNAL"), &mut caps, Some(&creds));
        assert_eq!(sent(&actions), vec!["CAP END"]);
    }

    #[test]
    fn test_cap_end_sent_once_with_nak() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::empty();
        neg.start();
        let long: Vec<&str> = SUPPORTED_CAPS.iter().map(|(n, _)| *n).collect();
        let ls = format!(":srv CAP * LS :{}", long.join(" "));
        let reqs = neg.handle_cap(&cap(&ls), &mut caps, None);
        assert!(!reqs.is_empty());

        let mut ends = 0;
        for _ in 0..reqs.len() {
            let actions = neg.handle_cap(&cap(":srv CAP * NAK :chghost"), &mut caps, None);
            ends += sent(&actions).iter().filter(|l| **l == "CAP END").count();
        }
        let late = neg.handle_cap(&cap(":srv CAP * ACK :chghost"), &mut caps, None);
        ends += sent(&late).iter().filter(|l| **l == "CAP END").count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_del_and_list() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::AWAY_NOTIFY | Caps::CHGHOST;
        neg.registered();
        neg.handle_cap(&cap(":srv CAP me DEL :away-notify"), &mut caps, None);
        assert_eq!(caps, Caps::CHGHOST);
        // Deleting something we never had must not turn it on.
        neg.handle_cap(&cap(":srv CAP me DEL :away-notify"), &mut caps, None);
        assert_eq!(caps, Caps::CHGHOST);

        let list = neg.handle_cap(&cap(":srv CAP me LIST :chghost"), &mut caps, None);
        assert_eq!(list, vec![CapAction::Print("Enabled capabilities: chghost".into())]);
    }

    #[test]
    fn test_new_after_registration_requests_without_end() {
        let mut neg = CapNegotiator::new();
        let mut caps = Caps::empty();
        neg.registered();
        let req = neg.handle_cap(&cap(":srv CAP me NEW :chghost"), &mut caps, None);
        assert_eq!(sent(&req), vec!["CAP REQ :chghost"]);
        let ack = neg.handle_cap(&cap(":srv CAP me ACK :chghost"), &mut caps, None);
        assert!(ack.is_empty());
        assert!(caps.contains(Caps::CHGHOST));
    }
}

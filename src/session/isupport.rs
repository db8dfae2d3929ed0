//! Server syntax learned from `RPL_ISUPPORT` (005).

use crate::irc::caps::Caps;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IsupportError {
    #[error("malformed PREFIX value {0:?}")]
    BadPrefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isupport {
    /// Membership symbols, highest rank first (`@+`).
    pub nick_prefixes: String,
    /// Channel modes granting the symbol at the same index (`ov`).
    pub nick_modes: String,
    pub chan_types: String,
    /// `A,B,C,D` channel mode classes.
    pub chan_modes: String,
}

impl Default for Isupport {
    fn default() -> Self {
        Self {
            nick_prefixes: "@+".to_string(),
            nick_modes: "ov".to_string(),
            chan_types: "#&".to_string(),
            chan_modes: "beI,k,l,imnpst".to_string(),
        }
    }
}

impl Isupport {
    /// Apply one `KEY[=VALUE]` token. WHOX and MONITOR support are recorded
    /// in `caps`.
    pub fn apply_token(&mut self, token: &str, caps: &mut Caps) -> Result<(), IsupportError> {
        if let Some(value) = token.strip_prefix("PREFIX=") {
            return self.set_prefix(value);
        }
        if let Some(value) = token.strip_prefix("CHANTYPES=") {
            self.chan_types = value.to_string();
        } else if let Some(value) = token.strip_prefix("CHANMODES=") {
            self.chan_modes = value.to_string();
        } else if token == "WHOX" {
            caps.insert(Caps::WHOX);
        } else if token == "MONITOR" || token.starts_with("MONITOR=") {
            caps.insert(Caps::MONITOR);
        } else if token == "-WHOX" {
            caps.remove(Caps::WHOX);
        } else if token == "-MONITOR" {
            caps.remove(Caps::MONITOR);
        }
        Ok(())
    }

    fn set_prefix(&mut self, value: &str) -> Result<(), IsupportError> {
        if value.is_empty() {
            self.nick_modes.clear();
            self.nick_prefixes.clear();
            return Ok(());
        }
        let parsed = value
            .strip_prefix('(')
            .and_then(|rest| rest.split_once(')'))
            .filter(|(modes, prefixes)| modes.chars().count() == prefixes.chars().count());
        match parsed {
            Some((modes, prefixes)) => {
                self.nick_modes = modes.to_string();
                self.nick_prefixes = prefixes.to_string();
                Ok(())
            }
            None => Err(IsupportError::BadPrefix(value.to_string())),
        }
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chan_types.contains(c))
    }

    /// Split leading membership symbols off a NAMES entry.
    pub fn split_prefix<'a>(&self, entry: &'a str) -> (&'a str, &'a str) {
        let end = entry
            .char_indices()
            .find(|(_, c)| !self.nick_prefixes.contains(*c))
            .map_or(entry.len(), |(i, _)| i);
        entry.split_at(end)
    }

    pub fn prefix_for_mode(&self, mode: char) -> Option<char> {
        let index = self.nick_modes.chars().position(|m| m == mode)?;
        self.nick_prefixes.chars().nth(index)
    }

    fn rank(&self, symbol: char) -> usize {
        self.nick_prefixes
            .chars()
            .position(|p| p == symbol)
            .unwrap_or(usize::MAX)
    }

    /// Add a symbol to a membership prefix string, keeping rank order.
    pub fn add_prefix(&self, current: &str, symbol: char) -> String {
        let mut symbols: Vec<char> = current.chars().filter(|c| *c != symbol).collect();
        symbols.push(symbol);
        symbols.sort_by_key(|c| self.rank(*c));
        symbols.into_iter().collect()
    }

    pub fn remove_prefix(&self, current: &str, symbol: char) -> String {
        current.chars().filter(|c| *c != symbol).collect()
    }

    /// Whether `mode` consumes an argument in a MODE change.
    pub fn mode_takes_param(&self, mode: char, adding: bool) -> bool {
        if self.nick_modes.contains(mode) {
            return true;
        }
        let mut classes = self.chan_modes.split(',');
        let always = [classes.next(), classes.next()];
        if always.iter().flatten().any(|class| class.contains(mode)) {
            return true;
        }
        adding && classes.next().is_some_and(|class| class.contains(mode))
    }
}

//! Users known to one connection.
//!
//! The registry is the only owner of [`User`] values. Channels and queries
//! hold [`UserId`]s and take a reference with [`UserRegistry::retain`]; when
//! the last reference is released the user is dropped together with its nick
//! index entry.

use crate::irc::casemap::CaseKey;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub username: String,
    pub hostname: String,
    pub realname: String,
    pub account: Option<String>,
    pub away: bool,
    pub away_reason: Option<String>,
}

impl User {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Self::default()
        }
    }

    /// Parse `nick[!user][@host]`.
    pub fn from_userhost(userhost: &str) -> Self {
        let (nick_user, host) = match userhost.split_once('@') {
            Some((left, host)) => (left, host),
            None => (userhost, ""),
        };
        let (nick, user) = match nick_user.split_once('!') {
            Some((nick, user)) => (nick, user),
            None => (nick_user, ""),
        };
        Self {
            nick: nick.to_string(),
            username: user.to_string(),
            hostname: host.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Entry {
    user: User,
    refs: usize,
}

#[derive(Debug, Default)]
pub struct UserRegistry {
    users: HashMap<UserId, Entry>,
    by_nick: HashMap<CaseKey, UserId>,
    next_id: u64,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn lookup(&self, nick: &str) -> Option<UserId> {
        self.by_nick.get(&CaseKey::new(nick)).copied()
    }

    pub fn get(&self, id: UserId) -> Option<&User> {
        self.users.get(&id).map(|entry| &entry.user)
    }

    pub fn get_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id).map(|entry| &mut entry.user)
    }

    pub fn nick(&self, id: UserId) -> &str {
        self.get(id).map(|user| user.nick.as_str()).unwrap_or("")
    }

    #[cfg(test)]
    pub fn refs(&self, id: UserId) -> usize {
        self.users.get(&id).map_or(0, |entry| entry.refs)
    }

    /// Find a user by the nick in `userhost`, creating it when unknown.
    /// Missing user/host details of an existing entry are filled in.
    ///
    /// A freshly created user has no references; callers that do not
    /// [`retain`](Self::retain) it must [`sweep`](Self::sweep) it.
    pub fn intern(&mut self, userhost: &str) -> UserId {
        let parsed = User::from_userhost(userhost);
        if let Some(id) = self.lookup(&parsed.nick) {
            if let Some(user) = self.get_mut(id) {
                if user.username.is_empty() && !parsed.username.is_empty() {
                    user.username = parsed.username;
                }
                if user.hostname.is_empty() && !parsed.hostname.is_empty() {
                    user.hostname = parsed.hostname;
                }
            }
            return id;
        }
        self.insert(parsed)
    }

    pub fn insert(&mut self, user: User) -> UserId {
        let key = CaseKey::new(&user.nick);
        if let Some(existing) = self.by_nick.get(&key) {
            debug_assert!(false, "duplicate nick {:?} in user registry", key);
            tracing::debug!(nick = %user.nick, existing = ?existing, "replacing duplicate registry entry");
        }
        let id = UserId(self.next_id);
        self.next_id += 1;
        self.by_nick.insert(key, id);
        self.users.insert(id, Entry { user, refs: 0 });
        id
    }

    pub fn retain(&mut self, id: UserId) {
        if let Some(entry) = self.users.get_mut(&id) {
            entry.refs += 1;
        }
    }

    /// Drop one reference. Returns `true` when this removed the user.
    pub fn release(&mut self, id: UserId) -> bool {
        let Some(entry) = self.users.get_mut(&id) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        self.sweep(id)
    }

    /// Remove `id` if nothing references it any more.
    pub fn sweep(&mut self, id: UserId) -> bool {
        match self.users.get(&id) {
            Some(entry) if entry.refs == 0 => {}
            _ => return false,
        }
        if let Some(entry) = self.users.remove(&id) {
            let key = CaseKey::new(&entry.user.nick);
            if self.by_nick.get(&key) == Some(&id) {
                self.by_nick.remove(&key);
            }
        }
        true
    }

    /// Change a user's nick, keeping the index consistent.
    pub fn rename(&mut self, id: UserId, new_nick: &str) {
        let Some(entry) = self.users.get_mut(&id) else {
            return;
        };
        let old_key = CaseKey::new(&entry.user.nick);
        let new_key = CaseKey::new(new_nick);
        entry.user.nick = new_nick.to_string();

        if old_key == new_key {
            return;
        }
        if self.by_nick.get(&old_key) == Some(&id) {
            self.by_nick.remove(&old_key);
        }
        // A user still holding the nick loses its index entry; it lives on
        // until its last reference is released.
        if let Some(other) = self.by_nick.insert(new_key, id) {
            if other != id {
                tracing::debug!(nick = new_nick, ?other, "nick change displaced a stale entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_userhost() {
        let user = User::from_userhost("nick!~ident@host.example");
        assert_eq!(user.nick, "nick");
        assert_eq!(user.username, "~ident");
        assert_eq!(user.hostname, "host.example");

        let bare = User::from_userhost("nick");
        assert_eq!(bare.nick, "nick");
        assert!(bare.username.is_empty());
        assert!(bare.hostname.is_empty());

        let host_only = User::from_userhost("nick@host");
        assert_eq!(host_only.hostname, "host");
    }

    #[test]
    fn test_intern_is_case_insensitive() {
        let mut users = UserRegistry::new();
        let a = users.intern("Nick[a]");
        let b = users.intern("nick{A}!user@host");
        assert_eq!(a, b);
        assert_eq!(users.len(), 1);
        assert_eq!(users.get(a).unwrap().username, "user");
        assert_eq!(users.get(a).unwrap().nick, "Nick[a]");
    }

    #[test]
    fn test_release_drops_last_reference() {
        let mut users = UserRegistry::new();
        let id = users.intern("someone");
        users.retain(id);
        users.retain(id);
        assert!(!users.release(id));
        assert!(users.release(id));
        assert!(users.is_empty());
        assert_eq!(users.lookup("someone"), None);
    }

    #[test]
    fn test_sweep_unreferenced() {
        let mut users = UserRegistry::new();
        let id = users.intern("drive-by");
        assert!(users.sweep(id));
        assert!(users.is_empty());
    }

    #[test]
    fn test_rename_rekeys() {
        let mut users = UserRegistry::new();
        let id = users.intern("old");
        users.retain(id);
        users.rename(id, "New");
        assert_eq!(users.lookup("old"), None);
        assert_eq!(users.lookup("new"), Some(id));
        assert_eq!(users.nick(id), "New");

        // Case-only change keeps the same key.
        users.rename(id, "NEW");
        assert_eq!(users.lookup("new"), Some(id));
        assert!(users.release(id));
        assert_eq!(users.lookup("new"), None);
    }

    #[test]
    fn test_rename_onto_held_nick() {
        let mut users = UserRegistry::new();
        let stale = users.intern("bob");
        users.retain(stale);
        let alice = users.intern("alice");
        users.retain(alice);

        users.rename(alice, "Bob");
        assert_eq!(users.lookup("bob"), Some(alice));
        assert!(users.release(stale));
        assert_eq!(users.lookup("bob"), Some(alice));
        assert_eq!(users.len(), 1);
    }
}

//! Channels and their member lists.

use super::user::{UserId, UserRegistry};
use crate::irc::casemap::CaseKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user: UserId,
    /// Membership prefixes such as `@` or `@+`, highest rank first.
    pub prefix: String,
    key: CaseKey,
}

/// Position based change to a member list, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberChange {
    Inserted { position: usize },
    Removed { position: usize },
}

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub topic: Option<String>,
    pub joined: bool,
    members: Vec<Member>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: None,
            joined: true,
            members: Vec::new(),
        }
    }

    /// Members sorted by case-folded nick.
    #[cfg(test)]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_prefix(&self, user: UserId) -> Option<&str> {
        self.index_of(user).map(|i| self.members[i].prefix.as_str())
    }

    fn index_of(&self, user: UserId) -> Option<usize> {
        self.members.iter().position(|m| m.user == user)
    }

    fn insert_sorted(&mut self, member: Member) -> MemberChange {
        let position = match self.members.binary_search_by(|m| m.key.cmp(&member.key)) {
            Ok(pos) | Err(pos) => pos,
        };
        self.members.insert(position, member);
        MemberChange::Inserted { position }
    }

    /// Add a member, or update its prefix when it is already present.
    pub fn add_member(
        &mut self,
        users: &mut UserRegistry,
        user: UserId,
        prefix: &str,
    ) -> Option<MemberChange> {
        if let Some(i) = self.index_of(user) {
            self.members[i].prefix = prefix.to_string();
            return None;
        }
        let key = CaseKey::new(users.nick(user));
        users.retain(user);
        Some(self.insert_sorted(Member {
            user,
            prefix: prefix.to_string(),
            key,
        }))
    }

    pub fn remove_member(&mut self, users: &mut UserRegistry, user: UserId) -> Option<MemberChange> {
        let position = self.index_of(user)?;
        self.members.remove(position);
        users.release(user);
        Some(MemberChange::Removed { position })
    }

    pub fn set_member_prefix(&mut self, user: UserId, prefix: &str) -> bool {
        match self.index_of(user) {
            Some(i) => {
                self.members[i].prefix = prefix.to_string();
                true
            }
            None => false,
        }
    }

    /// Re-sort one member after its nick changed. Observers get the removal
    /// followed by the reinsertion.
    pub fn rename_member(&mut self, user: UserId, new_nick: &str) -> Vec<MemberChange> {
        let Some(position) = self.index_of(user) else {
            return Vec::new();
        };
        let mut member = self.members.remove(position);
        member.key = CaseKey::new(new_nick);
        let inserted = self.insert_sorted(member);
        vec![MemberChange::Removed { position }, inserted]
    }

    /// Parting clears the member list and the topic.
    pub fn set_joined(&mut self, users: &mut UserRegistry, joined: bool) -> Vec<MemberChange> {
        self.joined = joined;
        if joined {
            return Vec::new();
        }
        self.topic = None;
        let mut changes = Vec::with_capacity(self.members.len());
        for member in self.members.drain(..) {
            users.release(member.user);
            changes.push(MemberChange::Removed { position: 0 });
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nicks(channel: &Channel, users: &UserRegistry) -> Vec<String> {
        channel
            .members()
            .iter()
            .map(|m| users.nick(m.user).to_string())
            .collect()
    }

    #[test]
    fn test_members_stay_sorted() {
        let mut users = UserRegistry::new();
        let mut chan = Channel::new("#test");
        for nick in ["delta", "Alpha", "[bracket]", "charlie"] {
            let id = users.intern(nick);
            chan.add_member(&mut users, id, "");
        }
        assert_eq!(nicks(&chan, &users), vec!["Alpha", "charlie", "delta", "[bracket]"]);
    }

    #[test]
    fn test_add_twice_updates_prefix() {
        let mut users = UserRegistry::new();
        let mut chan = Channel::new("#test");
        let id = users.intern("op");
        assert!(chan.add_member(&mut users, id, "").is_some());
        assert!(chan.add_member(&mut users, id, "@").is_none());
        assert_eq!(chan.member_prefix(id), Some("@"));
        assert_eq!(users.refs(id), 1);
    }

    #[test]
    fn test_rename_is_remove_then_insert() {
        let mut users = UserRegistry::new();
        let mut chan = Channel::new("#test");
        let ids: Vec<UserId> = ["amy", "bob", "cat"]
            .iter()
            .map(|nick| {
                let id = users.intern(nick);
                chan.add_member(&mut users, id, "");
                id
            })
            .collect();

        users.rename(ids[0], "zed");
        let changes = chan.rename_member(ids[0], "zed");
        assert_eq!(
            changes,
            vec![MemberChange::Removed { position: 0 }, MemberChange::Inserted { position: 2 }]
        );
        assert_eq!(nicks(&chan, &users), vec!["bob", "cat", "zed"]);
    }

    #[test]
    fn test_part_releases_members() {
        let mut users = UserRegistry::new();
        let mut chan = Channel::new("#test");
        chan.topic = Some("topic".into());
        for nick in ["a", "b"] {
            let id = users.intern(nick);
            chan.add_member(&mut users, id, "");
        }
        let changes = chan.set_joined(&mut users, false);
        assert_eq!(changes.len(), 2);
        assert!(chan.members().is_empty());
        assert!(chan.topic.is_none());
        assert!(users.is_empty());
    }

    #[test]
    fn test_remove_member() {
        let mut users = UserRegistry::new();
        let mut chan = Channel::new("#test");
        let id = users.intern("gone");
        chan.add_member(&mut users, id, "+");
        assert_eq!(chan.remove_member(&mut users, id), Some(MemberChange::Removed { position: 0 }));
        assert_eq!(chan.remove_member(&mut users, id), None);
        assert!(users.is_empty());
    }
}

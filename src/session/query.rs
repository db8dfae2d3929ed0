//! Private conversations with a single peer.

use super::user::{UserId, UserRegistry};

#[derive(Debug)]
pub struct Query {
    /// The peer's nick as first seen; also the context name.
    pub name: String,
    peer: Option<UserId>,
    pub online: bool,
}

impl Query {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            peer: None,
            online: false,
        }
    }

    pub fn peer(&self) -> Option<UserId> {
        self.peer
    }

    pub fn set_peer(&mut self, users: &mut UserRegistry, user: UserId) {
        if self.peer == Some(user) {
            return;
        }
        users.retain(user);
        if let Some(old) = self.peer.replace(user) {
            users.release(old);
        }
    }

    /// Going offline forgets the peer so the registry can drop it.
    pub fn set_online(&mut self, users: &mut UserRegistry, online: bool) {
        self.online = online;
        if !online {
            if let Some(old) = self.peer.take() {
                users.release(old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_releases_peer() {
        let mut users = UserRegistry::new();
        let mut query = Query::new("friend");
        let id = users.intern("friend!u@h");
        query.set_peer(&mut users, id);
        query.set_peer(&mut users, id);
        query.set_online(&mut users, true);
        assert_eq!(users.refs(id), 1);

        query.set_online(&mut users, false);
        assert!(!query.online);
        assert_eq!(query.peer(), None);
        assert!(users.is_empty());
    }
}

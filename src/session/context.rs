//! Conversation contexts: the server itself, its channels and its queries.

use crate::irc::casemap::casefold_eq;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Server,
    Channel,
    Query,
}

/// Identifies where a line of output belongs. Displays as `network` or
/// `network/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextId {
    Server(String),
    Channel(String, String),
    Query(String, String),
}

impl ContextId {
    pub fn network(&self) -> &str {
        match self {
            ContextId::Server(network)
            | ContextId::Channel(network, _)
            | ContextId::Query(network, _) => network,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ContextId::Server(network) => network,
            ContextId::Channel(_, name) | ContextId::Query(_, name) => name,
        }
    }

    pub fn kind(&self) -> ContextKind {
        match self {
            ContextId::Server(_) => ContextKind::Server,
            ContextId::Channel(..) => ContextKind::Channel,
            ContextId::Query(..) => ContextKind::Query,
        }
    }

    pub fn parent(&self) -> Option<ContextId> {
        match self {
            ContextId::Server(_) => None,
            ContextId::Channel(network, _) | ContextId::Query(network, _) => {
                Some(ContextId::Server(network.clone()))
            }
        }
    }

    /// Same context under IRC case mapping.
    pub fn matches(&self, other: &ContextId) -> bool {
        self.kind() == other.kind()
            && self.network() == other.network()
            && casefold_eq(self.name(), other.name())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Server(network) => f.write_str(network),
            ContextId::Channel(network, name) | ContextId::Query(network, name) => {
                write!(f, "{}/{}", network, name)
            }
        }
    }
}

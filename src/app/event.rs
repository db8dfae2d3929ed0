//! Events a session reports to whoever presents it.
//!
//! Every session pushes into one unbounded channel. Events for a context
//! arrive in the order the protocol messages behind them were processed.

use crate::session::channel::MemberChange;
use crate::session::context::ContextId;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// NICK/USER sent, waiting for the welcome numeric.
    Registering,
    /// Capability exchange still open.
    Negotiating,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Action,
    Highlight,
    Notice,
    System,
    Error,
    Join,
    Part,
    Quit,
}

/// One line for a context's transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintEvent {
    pub context: ContextId,
    pub kind: MessageKind,
    pub text: String,
    /// Server supplied time for replayed lines; `None` for live ones.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Print(PrintEvent),
    Activity {
        context: ContextId,
        highlight: bool,
    },
    Notify {
        context: ContextId,
        title: String,
        body: String,
    },
    ContextAdded(ContextId),
    ContextRemoved(ContextId),
    MembersChanged {
        context: ContextId,
        change: MemberChange,
    },
    StateChanged {
        network: String,
        state: ConnectionState,
    },
}

use crate::session::context::ContextId;

/// Requests a front end sends to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    /// Text typed into a context: a message or a `/command`.
    Input { context: ContextId, text: String },
    /// A raw protocol line.
    SendRaw { line: String },
    /// The context the user is looking at, which suppresses notifications.
    Focus { context: Option<ContextId> },
    /// Leave a channel or stop tracking a query.
    CloseContext { context: ContextId },
    Shutdown,
}

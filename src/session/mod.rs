//! One IRC network session: entity registries, protocol state and the task
//! that drives it.

pub mod channel;
pub mod connection;
pub mod context;
mod dispatch;
pub mod isupport;
mod numerics;
pub mod query;
pub mod runner;
pub mod sendq;
pub mod server;
pub mod user;

pub use context::ContextId;
pub use runner::{spawn_session, SessionHandle};
pub use server::Server;

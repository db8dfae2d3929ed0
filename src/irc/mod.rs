//! IRC protocol layer: line codec, case mapping, capabilities, charsets and
//! user input parsing. Nothing in here owns a socket.

pub mod casemap;
pub mod caps;
pub mod charset;
pub mod commands;
pub mod formatting;
pub mod message;
pub mod sasl;

//! SASL PLAIN (RFC 4616) payloads for the `AUTHENTICATE` exchange.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Largest base64 chunk carried by a single `AUTHENTICATE` line.
pub const CHUNK_SIZE: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

impl SaslCredentials {
    /// Both halves must be non-empty for SASL to be attempted.
    pub fn new(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// `base64(user \0 user \0 password)`: the authorization identity is the
/// account name itself.
pub fn encode_plain(username: &str, password: &str) -> String {
    let payload = format!("{username}\0{username}\0{password}");
    BASE64.encode(payload.as_bytes())
}

/// Split an encoded payload into `AUTHENTICATE` lines. A payload whose last
/// chunk is exactly [`CHUNK_SIZE`] long (or an empty one) is terminated with
/// `AUTHENTICATE +`.
pub fn authenticate_lines(encoded: &str) -> Vec<String> {
    let mut lines: Vec<String> = encoded
        .as_bytes()
        .chunks(CHUNK_SIZE)
        .map(|chunk| format!("AUTHENTICATE {}", String::from_utf8_lossy(chunk)))
        .collect();
    if encoded.is_empty() || encoded.len() % CHUNK_SIZE == 0 {
        lines.push("AUTHENTICATE +".to_string());
    }
    lines
}

//! RFC1459 case mapping.
//!
//! Nicknames and channel names compare case-insensitively with the extra rule
//! that `[`, `]` and `\` are the upper-case forms of `{`, `}` and `|`. Every
//! table keyed by a nick or channel name goes through [`CaseKey`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[inline]
pub fn irc_lower(b: u8) -> u8 {
    match b {
        b'A'..=b'Z' => b + 32,
        b'[' => b'{',
        b']' => b'}',
        b'\\' => b'|',
        _ => b,
    }
}

pub fn casefold_cmp(a: &str, b: &str) -> Ordering {
    a.bytes().map(irc_lower).cmp(b.bytes().map(irc_lower))
}

pub fn casefold_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).all(|(x, y)| irc_lower(x) == irc_lower(y))
}

/// Stable hash over the case-folded bytes, `h = h * 31 + lower(b)`.
pub fn casefold_hash(s: &str) -> u32 {
    s.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(irc_lower(b) as u32))
}

pub fn has_casefold_prefix(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.bytes()
            .zip(prefix.bytes())
            .all(|(x, y)| irc_lower(x) == irc_lower(y))
}

/// Byte offset of the first case-insensitive occurrence of `needle`.
/// An empty needle matches at offset 0.
pub fn casefold_find(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&start| {
        hay[start..start + needle.len()]
            .iter()
            .zip(needle)
            .all(|(x, y)| irc_lower(*x) == irc_lower(*y))
    })
}

/// Hash map key that compares nicks and channel names under IRC case mapping.
/// Keeps the spelling it was created with.
#[derive(Clone)]
pub struct CaseKey(String);

impl CaseKey {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl PartialEq for CaseKey {
    fn eq(&self, other: &Self) -> bool {
        casefold_eq(&self.0, &other.0)
    }
}

impl Eq for CaseKey {}

impl Hash for CaseKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(casefold_hash(&self.0));
    }
}

impl PartialOrd for CaseKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaseKey {
    fn cmp(&self, other: &Self) -> Ordering {
        casefold_cmp(&self.0, &other.0)
    }
}

impl fmt::Debug for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CaseKey({:?})", self.0)
    }
}

impl From<&str> for CaseKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

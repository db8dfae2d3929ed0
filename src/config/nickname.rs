//! Nicknames: the random default and the fallback policy used when the
//! server says a nickname is taken.
//!
//! Generated nicknames look like `AdjectiveNounNN` (e.g. `NeonFox42`).

use rand::RngExt;

const ADJECTIVES: &[&str] = &[
    "Shadow", "Neon", "Cyber", "Lunar", "Solar", "Frost", "Storm", "Dark", "Pixel", "Ghost",
    "Hyper", "Turbo", "Cosmic", "Iron", "Velvet", "Silent", "Rogue", "Mystic", "Atomic", "Rapid",
    "Zero", "Nova", "Onyx", "Cobalt", "Azure", "Hex", "Glitch", "Wired", "Chrome", "Prism",
];

const NOUNS: &[&str] = &[
    "Fox", "Wolf", "Hawk", "Raven", "Lynx", "Viper", "Shark", "Falcon", "Panda", "Tiger", "Cobra",
    "Owl", "Crab", "Dragon", "Jaguar", "Mantis", "Sphinx", "Kraken", "Otter", "Hound", "Crow",
    "Bear", "Coyote", "Moth", "Newt", "Crane", "Bison", "Dingo", "Reef", "Byte", "Node",
];

/// Number of `_` suffixes tried after the configured alternatives run out.
pub const MAX_UNDERSCORE_RETRIES: usize = 3;

pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let num: u8 = rng.random_range(0..100);
    format!("{}{}{}", adj, noun, num)
}

/// Picks the next nickname to try after `433 ERR_NICKNAMEINUSE`.
///
/// Configured alternates come first, then the rejected nick with `_`
/// appended, at most [`MAX_UNDERSCORE_RETRIES`] times.
#[derive(Debug, Clone, Default)]
pub struct NickRetry {
    alternates: Vec<String>,
    next_alternate: usize,
    underscores: usize,
}

impl NickRetry {
    pub fn new(alternates: &[String]) -> Self {
        Self {
            alternates: alternates.iter().filter(|a| !a.is_empty()).cloned().collect(),
            next_alternate: 0,
            underscores: 0,
        }
    }

    pub fn next(&mut self, rejected: &str) -> Option<String> {
        if let Some(alt) = self.alternates.get(self.next_alternate) {
            self.next_alternate += 1;
            return Some(alt.clone());
        }
        if self.underscores < MAX_UNDERSCORE_RETRIES {
            self.underscores += 1;
            return Some(format!("{}_", rejected));
        }
        None
    }

    pub fn reset(&mut self) {
        self.next_alternate = 0;
        self.underscores = 0;
    }
}

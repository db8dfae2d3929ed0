//! Per-context boolean settings.
//!
//! A value set on a channel or query wins over the network value, which wins
//! over the global one. Unset everywhere means `false`.

use crate::irc::casemap::casefold_eq;
use crate::session::context::ContextId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HIDE_JOIN_PART: &str = "hide-joinpart";
pub const STRIP_COLOR: &str = "stripcolor";

pub trait SettingsLookup: Send + Sync {
    fn lookup_bool(&self, context: &ContextId, key: &str) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default)]
    pub global: BTreeMap<String, bool>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub values: BTreeMap<String, bool>,
    /// Keyed by channel name or query nick.
    #[serde(default)]
    pub channels: BTreeMap<String, BTreeMap<String, bool>>,
}

impl SettingsConfig {
    fn scoped(&self, context: &ContextId, key: &str) -> Option<bool> {
        let network = self
            .networks
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(context.network()))
            .map(|(_, settings)| settings)?;

        if !matches!(context, ContextId::Server(_)) {
            let child = network
                .channels
                .iter()
                .find(|(name, _)| casefold_eq(name, context.name()))
                .and_then(|(_, values)| values.get(key).copied());
            if child.is_some() {
                return child;
            }
        }
        network.values.get(key).copied()
    }
}

impl SettingsLookup for SettingsConfig {
    fn lookup_bool(&self, context: &ContextId, key: &str) -> bool {
        self.scoped(context, key)
            .or_else(|| self.global.get(key).copied())
            .unwrap_or(false)
    }
}

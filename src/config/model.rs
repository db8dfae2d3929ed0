//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a default so a missing or partial file still works.

use serde::{Deserialize, Serialize};

use super::nickname::generate_nickname;
use super::settings::SettingsConfig;
use crate::irc::sasl::SaslCredentials;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub identd: IdentdConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            networks: default_networks(),
            settings: SettingsConfig::default(),
            logging: LoggingConfig::default(),
            identd: IdentdConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name.eq_ignore_ascii_case(name))
    }
}

fn default_networks() -> Vec<NetworkConfig> {
    let nick = generate_nickname();
    vec![
        NetworkConfig {
            channels: vec!["#crabirc".into()],
            ..NetworkConfig::new("libera", "irc.libera.chat", &nick)
        },
        NetworkConfig::new("oftc", "irc.oftc.net", &nick),
    ]
}

/// One IRC network and how to connect and identify to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// User-facing label (e.g. `"libera"`), also the server context name.
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// Tried in order when the server rejects the nickname.
    #[serde(default)]
    pub alt_nicks: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    /// Server password sent with `PASS`.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sasl_username: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Joined after the first MOTD of a fresh session.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub quit_message: Option<String>,
}

impl NetworkConfig {
    pub fn new(name: &str, host: &str, nickname: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port: default_port(),
            tls: true,
            accept_invalid_certs: false,
            nickname: nickname.to_string(),
            alt_nicks: Vec::new(),
            username: None,
            realname: None,
            password: None,
            sasl_username: None,
            sasl_password: None,
            encoding: default_encoding(),
            channels: Vec::new(),
            auto_connect: false,
            quit_message: None,
        }
    }

    pub fn username(&self) -> &str {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.nickname)
    }

    pub fn realname(&self) -> &str {
        self.realname
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.nickname)
    }

    pub fn sasl_credentials(&self) -> Option<SaslCredentials> {
        SaslCredentials::new(
            self.sasl_username.as_deref().unwrap_or(""),
            self.sasl_password.as_deref().unwrap_or(""),
        )
    }

    pub fn quit_message(&self) -> &str {
        self.quit_message.as_deref().unwrap_or(DEFAULT_QUIT_MESSAGE)
    }
}

pub const DEFAULT_QUIT_MESSAGE: &str = "crabirc";

/// Transcript and diagnostic logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Write transcripts to disk.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_true")]
    pub log_channels: bool,
    #[serde(default)]
    pub log_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            enabled: false,
            log_dir: default_log_dir(),
            log_channels: true,
            log_queries: false,
        }
    }
}

/// Built-in ident (RFC 1413) responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentdConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_identd_bind")]
    pub bind: String,
    #[serde(default = "default_identd_ttl")]
    pub ttl_secs: u64,
}

impl Default for IdentdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_identd_bind(),
            ttl_secs: default_identd_ttl(),
        }
    }
}

fn default_nickname() -> String {
    generate_nickname()
}
fn default_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}
fn default_encoding() -> String {
    "UTF-8".to_string()
}
fn default_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "~/.local/share/crabirc/logs".to_string()
}
fn default_identd_bind() -> String {
    "0.0.0.0:113".to_string()
}
fn default_identd_ttl() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_network_gets_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [[networks]]
            name = "test"
            host = "irc.example.org"
            nickname = "tester"
            "#,
        )
        .unwrap();
        let net = &cfg.networks[0];
        assert_eq!(net.port, 6697);
        assert!(net.tls);
        assert!(!net.accept_invalid_certs);
        assert_eq!(net.encoding, "UTF-8");
        assert_eq!(net.username(), "tester");
        assert_eq!(net.realname(), "tester");
        assert_eq!(net.sasl_credentials(), None);
        assert_eq!(net.quit_message(), DEFAULT_QUIT_MESSAGE);
        assert!(!cfg.identd.enabled);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_sasl_needs_both_fields() {
        let mut net = NetworkConfig::new("n", "h", "nick");
        net.sasl_username = Some("acct".into());
        assert!(net.sasl_credentials().is_none());
        net.sasl_password = Some("secret".into());
        assert_eq!(net.sasl_credentials().unwrap().username, "acct");
    }

    #[test]
    fn test_default_config_round_trips() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.networks, cfg.networks);
        assert!(cfg.network("LIBERA").is_some());
    }
}

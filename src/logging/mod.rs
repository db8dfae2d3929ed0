//! Diagnostics and transcript logging.
//!
//! Diagnostics go to stderr through `tracing`. When enabled, printed lines
//! for channels and queries are also appended to daily transcript files named
//! `<network>_<target>_<date>.log` in the configured log directory (default:
//! `~/.local/share/crabirc/logs/`).

use crate::app::event::{MessageKind, PrintEvent};
use crate::config::LoggingConfig;
use crate::session::ContextId;
use chrono::Local;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Appends printed lines to per-context daily files.
///
/// File handles are cached for the lifetime of the logger.
pub struct TranscriptLogger {
    enabled: bool,
    log_dir: PathBuf,
    log_channels: bool,
    log_queries: bool,
    file_handles: HashMap<String, fs::File>,
}

impl TranscriptLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.enabled,
            log_dir: expand_home(&config.log_dir),
            log_channels: config.log_channels,
            log_queries: config.log_queries,
            file_handles: HashMap::new(),
        }
    }

    /// Name of the file `event` would be written to, if it is logged at all.
    fn file_name(&self, event: &PrintEvent) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let target = match &event.context {
            ContextId::Channel(_, name) if self.log_channels => name,
            ContextId::Query(_, nick) if self.log_queries => nick,
            _ => return None,
        };
        let date = event
            .timestamp
            .map(|t| t.with_timezone(&Local))
            .unwrap_or_else(Local::now)
            .format("%Y-%m-%d");
        Some(format!(
            "{}_{}_{}.log",
            sanitize(event.context.network()),
            sanitize(target),
            date
        ))
    }

    pub fn log_event(&mut self, event: &PrintEvent) {
        let Some(filename) = self.file_name(event) else {
            return;
        };

        let time = event
            .timestamp
            .map(|t| t.with_timezone(&Local))
            .unwrap_or_else(Local::now)
            .format("%H:%M:%S");
        let line = match event.kind {
            MessageKind::Error => format!("[{}] !!! {}", time, event.text),
            MessageKind::System => format!("[{}] *** {}", time, event.text),
            _ => format!("[{}] {}", time, event.text),
        };

        if !self.file_handles.contains_key(&filename) {
            let path = self.log_dir.join(&filename);
            let opened = fs::create_dir_all(&self.log_dir)
                .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
            match opened {
                Ok(file) => {
                    self.file_handles.insert(filename.clone(), file);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot open transcript");
                    return;
                }
            }
        }
        if let Some(handle) = self.file_handles.get_mut(&filename) {
            if let Err(e) = writeln!(handle, "{}", line) {
                tracing::warn!(file = %filename, error = %e, "transcript write failed");
            }
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn expand_home(dir: &str) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(dir)),
        None => PathBuf::from(dir),
    }
}

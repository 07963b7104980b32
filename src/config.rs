//! Settings types + settings file loading.
//!
//! The relay reads one JSON settings file (historically `settings.json`).
//! Each transport has its own optional section; a section only has to be
//! present when its channel is selected on the command line.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level settings file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Default log level when `RUST_LOG` is not set (`debug`, `info`, ...).
    #[serde(default)]
    pub log_level: Option<String>,
    /// Filesystem channel section.
    #[serde(default)]
    pub filesystem: Option<FilesystemSettings>,
    /// Email channel section.
    #[serde(default)]
    pub email: Option<EmailSettings>,
}

/// Filesystem channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemSettings {
    /// Base directory the channel walks.
    pub base_path: PathBuf,
    /// Regex matched against full directory paths; matching directories
    /// hold pending message files.
    pub dir_pattern: String,
}

/// Email channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    /// Outbound mail server.
    pub smtp: MailServerSettings,
    /// Inbound mail server.
    pub pop: MailServerSettings,
    /// From address on outbound mail.
    pub sender: String,
    /// Two-column CSV mapping routing code to email address.
    pub routing_table: PathBuf,
}

/// One mail server endpoint. Credentials are optional; authentication is
/// skipped when no username is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct MailServerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Settings {
    /// Load and parse the settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }
}

//! Optional TOML configuration file.
//!
//! Every key is optional; a missing key keeps the built-in default (or the
//! value from the command line, which always wins).
//!
//! ```toml
//! [hub]
//! bind_addr = "127.0.0.1:9000"
//! write_wait_secs = 10
//! pong_wait_secs = 60
//! max_message_size = 1024
//! outbound_capacity = 256
//! intake_capacity = 64
//! read_buffer_size = 1024
//! write_buffer_size = 1024
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::HubConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The effective configuration could not be rendered as TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// On-disk layout of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfigFile {
    #[serde(default)]
    pub hub: HubSection,
}

/// The `[hub]` table.  `None` means "not set in the file".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_wait_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_wait_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_buffer_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_buffer_size: Option<usize>,
}

impl HubConfigFile {
    /// Captures every field of `config`, e.g. to print the effective settings.
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            hub: HubSection {
                bind_addr: Some(config.bind_addr),
                write_wait_secs: Some(config.write_wait.as_secs()),
                pong_wait_secs: Some(config.pong_wait.as_secs()),
                max_message_size: Some(config.max_message_size),
                outbound_capacity: Some(config.outbound_capacity),
                intake_capacity: Some(config.intake_capacity),
                read_buffer_size: Some(config.read_buffer_size),
                write_buffer_size: Some(config.write_buffer_size),
            },
        }
    }

    /// Overwrites the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut HubConfig) {
        let hub = &self.hub;
        if let Some(addr) = hub.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(secs) = hub.write_wait_secs {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = hub.pong_wait_secs {
            config.pong_wait = Duration::from_secs(secs);
        }
        if let Some(size) = hub.max_message_size {
            config.max_message_size = size;
        }
        if let Some(capacity) = hub.outbound_capacity {
            config.outbound_capacity = capacity;
        }
        if let Some(capacity) = hub.intake_capacity {
            config.intake_capacity = capacity;
        }
        if let Some(size) = hub.read_buffer_size {
            config.read_buffer_size = size;
        }
        if let Some(size) = hub.write_buffer_size {
            config.write_buffer_size = size;
        }
    }

    /// The defaults with this file applied.
    pub fn into_config(self) -> HubConfig {
        let mut config = HubConfig::default();
        self.apply_to(&mut config);
        config
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses configuration text.
///
/// # Errors
///
/// [`ConfigError::Parse`] if the TOML is malformed or names an unknown key.
pub fn parse_config(text: &str) -> Result<HubConfigFile, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Reads and parses the file at `path`.
///
/// Unlike a settings store, a file named explicitly on the command line must
/// exist: "not found" is an error here.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// its content is invalid.
pub fn load_config(path: &Path) -> Result<HubConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

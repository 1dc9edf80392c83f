//! Optional TOML configuration file.
//!
//! Keys mirror the command-line flags, so `--obs-url` becomes `obs-url`:
//!
//! ```toml
//! obs-url = "ws://127.0.0.1:4455"
//! obs-password = "hunter2"
//! relay-url = "wss://relay.example.com/ws"
//! code = "K7MXQ2PA"
//! port = 4456
//! reconnect-delay = 5
//! ```
//!
//! Every key is optional.  A value here is used only when neither the flag
//! nor its environment variable is set; see `main.rs` for the merge.
//! Unknown keys are rejected so a typo does not silently fall back to a
//! default.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub obs_url: Option<String>,
    pub obs_password: Option<String>,
    pub relay_url: Option<String>,
    pub code: Option<String>,
    pub log_level: Option<String>,
    pub no_direct: Option<bool>,
    /// Seconds.
    pub reconnect_delay: Option<u64>,
    /// Seconds.
    pub request_timeout: Option<u64>,
    /// Seconds.
    pub heartbeat_interval: Option<u64>,
}

impl FileConfig {
    /// Parses file contents; `path` is used only for the error message.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML, a wrongly typed
    /// value, or an unknown key.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Reads and parses the file at `path`.
///
/// A missing file is an error: the path was given explicitly.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if its contents are invalid.
pub fn load(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::parse(&content, path)
}

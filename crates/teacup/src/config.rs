//! Configuration management
//!
//! Settings live in an optional JSON file, `~/.teacup/teacup.json` unless a
//! path is given. Every field has a default, so a missing default file is
//! not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::handshake::HandshakeSettings;
use crate::relay::SessionConfig;
use crate::render::MethodFilter;

pub const DEFAULT_LISTEN: &str = "localhost:8686";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on
    pub listen: String,

    /// How long a new connection has to send `Proxy.Connect`
    pub handshake_timeout_ms: u64,

    /// How long dialing the target may take
    pub dial_timeout_ms: u64,

    /// Method-name substrings whose events are not rendered
    pub deny_methods: Vec<String>,

    /// Render each connection in its own color
    pub color: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            handshake_timeout_ms: 1000,
            dial_timeout_ms: 1000,
            deny_methods: vec!["Fetch.Commons".to_string(), "Profile.Data".to_string()],
            color: true,
        }
    }
}

/// `~/.teacup/teacup.json`, if a home directory exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".teacup").join("teacup.json"))
}

impl ProxyConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn handshake(&self) -> HandshakeSettings {
        HandshakeSettings {
            timeout: Duration::from_millis(self.handshake_timeout_ms),
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
        }
    }

    pub fn method_filter(&self) -> MethodFilter {
        MethodFilter::new(self.deny_methods.iter().cloned())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            handshake: self.handshake(),
            filter: self.method_filter(),
            color: self.color,
        }
    }
}

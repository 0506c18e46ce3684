//! Configuration management for voicetask
//!
//! Precedence: environment > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::session::SessionConfig;
use crate::{Error, Result};

pub use file::ConfigFile;

/// Default realtime endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default bound on the setup handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// voicetask configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Realtime websocket endpoint
    pub endpoint: Url,

    /// Bound on connect + setup
    pub handshake_timeout: Duration,

    /// Helper command that prints the API key, consulted before the stored key
    pub key_command: Option<String>,

    /// Path to data directory (settings database)
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint or timeout is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |name| std::env::var(name).ok())?;

        // Ensure data dir exists
        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint or timeout is invalid
    pub fn from_sources<F>(fc: ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = env("VOICETASK_ENDPOINT")
            .or(fc.session.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint must be ws:// or wss://, got {}",
                endpoint.scheme()
            )));
        }

        let handshake_timeout = match env("VOICETASK_HANDSHAKE_TIMEOUT") {
            Some(secs) => Duration::from_secs(secs.trim().parse().map_err(|_| {
                Error::Config(format!("invalid VOICETASK_HANDSHAKE_TIMEOUT {secs:?}"))
            })?),
            None => fc
                .session
                .handshake_timeout_secs
                .map_or(DEFAULT_HANDSHAKE_TIMEOUT, Duration::from_secs),
        };
        if handshake_timeout.is_zero() {
            return Err(Error::Config("handshake timeout must be positive".to_string()));
        }

        let key_command = env("VOICETASK_KEY_COMMAND")
            .or(fc.credentials.key_command)
            .filter(|c| !c.trim().is_empty());

        let data_dir = env("VOICETASK_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            endpoint,
            handshake_timeout,
            key_command,
            data_dir,
        })
    }

    /// Path of the settings database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("voicetask.db")
    }

    /// Connection settings for the session controller
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            handshake_timeout: self.handshake_timeout,
        }
    }
}

/// Default data directory: `~/.local/share/omni/voicetask/`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/voicetask"),
        |d| d.data_dir().join("omni").join("voicetask"),
    )
}

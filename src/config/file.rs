//! TOML configuration file loading
//!
//! Supports `~/.config/omni/voicetask/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Realtime session settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Credential settings
    #[serde(default)]
    pub credentials: CredentialsFileConfig,

    /// Data directory for the settings database
    pub data_dir: Option<String>,
}

/// Realtime session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Websocket endpoint (e.g. "wss://generativelanguage.googleapis.com/ws/...")
    pub endpoint: Option<String>,

    /// Seconds to wait for the setup handshake
    pub handshake_timeout_secs: Option<u64>,
}

/// Credential configuration
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsFileConfig {
    /// Helper command printing the API key (e.g. "pass show gemini")
    pub key_command: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, with the same fallbacks
pub fn load_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/voicetask/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("voicetask")
            .join("config.toml")
    })
}

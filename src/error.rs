//! Error types for the voice task assistant

use thiserror::Error;

/// Result type alias for voicetask operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio stream error outside of device acquisition
    #[error("audio error: {0}")]
    Audio(String),

    /// No API key could be resolved
    #[error("no API key available")]
    MissingCredential,

    /// Connecting or the setup handshake failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An inbound audio fragment could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport encoding failed
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The remote model requested a tool we do not know
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A known tool was called with missing or malformed arguments
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidToolArgs {
        /// Tool name
        tool: String,
        /// What was wrong
        reason: String,
    },

    /// The peer signalled an error or the connection failed mid-session
    #[error("remote error: {0}")]
    Remote(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Short user-facing status line for this error
    #[must_use]
    pub fn status_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => {
                "Microphone access was denied. Allow access and try again.".to_string()
            }
            Self::DeviceUnavailable(_) => "No usable audio device found.".to_string(),
            Self::MissingCredential => {
                "No API key configured. Run `voicetask set-key` to add one.".to_string()
            }
            Self::HandshakeFailed(reason) => format!("Could not connect: {reason}"),
            Self::Remote(reason) => format!("Connection lost: {reason}"),
            other => other.to_string(),
        }
    }

    /// Whether this error only affects a single inbound fragment
    #[must_use]
    pub const fn is_fragment_local(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Encoding(_))
    }
}

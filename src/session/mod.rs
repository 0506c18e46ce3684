//! Realtime voice session: lifecycle, wire protocol, and dispatch

mod connection;
mod controller;
pub mod protocol;

use std::fmt;

use tokio::sync::mpsc;

pub use connection::{Connection, Outbound, is_normal_close};
pub use controller::{Flow, LiveSession, SessionConfig, SessionController, UserCommand};
pub use protocol::{ClientMessage, ServerMessage};

/// Lifecycle of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing held
    Idle,
    /// Resolving the key, opening devices, and handshaking
    Connecting,
    /// Streaming in both directions
    Open,
    /// Torn down; `reason` is set when the session ended on an error
    Closed { reason: Option<String> },
}

impl SessionState {
    /// Whether a session currently holds resources
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed { reason: None } => write!(f, "closed"),
            Self::Closed { reason: Some(reason) } => write!(f, "closed ({reason})"),
        }
    }
}

/// Notifications for whoever presents the session to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new state
    State(SessionState),
    /// The assistant started or stopped speaking
    Speaking(bool),
    /// Short human-readable status line
    Status(String),
}

/// Sender half for [`SessionEvent`]s
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

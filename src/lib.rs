//! voicetask - Realtime voice assistant that keeps a task list
//!
//! This library provides the core functionality for voicetask:
//! - Microphone capture and PCM16 encoding
//! - Gap-free scheduling of streamed assistant audio
//! - A websocket session against a realtime speech model
//! - Task-list tools the model can call mid-conversation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Devices                             │
//! │   Microphone (16 kHz)   │   Speaker (24 kHz)         │
//! └────────────┬────────────────────────▲───────────────┘
//!              │ chunks                 │ fragments
//! ┌────────────▼────────────────────────┴───────────────┐
//! │               Session Controller                     │
//! │   Capture  │  Playback Scheduler  │  Tool Bridge    │
//! └────────────┬────────────────────────▲───────────────┘
//!              │ realtimeInput          │ audio / toolCall
//! ┌────────────▼────────────────────────┴───────────────┐
//! │            Realtime model (websocket)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod session;
pub mod tasks;
pub mod testing;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use credentials::{CredentialResolver, KeyStore};
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use session::{SessionController, SessionEvent, SessionState, UserCommand};
pub use tasks::{TaskList, TaskRecord, TaskSurface};
pub use tools::ToolBridge;

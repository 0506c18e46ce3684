//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use voicetask::audio::pcm;
use voicetask::session::{ClientMessage, LiveSession};
use voicetask::testing::FakeOutput;
use voicetask::{DbPool, KeyStore, SessionEvent, TaskList, ToolBridge, db};

/// A live session over a fake speaker, with its channels exposed
pub struct Harness {
    pub live: LiveSession<FakeOutput>,
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub tasks: Arc<TaskList>,
}

/// Build a harness whose output runs at the model's 24 kHz rate
#[must_use]
pub fn harness() -> Harness {
    let tasks = Arc::new(TaskList::new());
    let (outbound_tx, outbound) = mpsc::unbounded_channel();
    let (events_tx, events) = mpsc::unbounded_channel();
    let live = LiveSession::new(
        FakeOutput::new(pcm::OUTPUT_SAMPLE_RATE),
        ToolBridge::new(tasks.clone()),
        outbound_tx,
        events_tx,
    );
    Harness {
        live,
        outbound,
        events,
        tasks,
    }
}

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// An empty key store over an in-memory database
#[must_use]
pub fn empty_key_store() -> KeyStore {
    KeyStore::new(setup_test_db())
}

/// Base64 of `bytes` zero bytes of PCM16LE
#[must_use]
pub fn silent_pcm_base64(bytes: usize) -> String {
    pcm::encode_base64(&vec![0u8; bytes])
}

/// Drain queued outbound messages as JSON
pub fn drain_outbound(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(serde_json::from_str(&message.to_json().expect("serialize")).expect("json"));
    }
    out
}

/// Drain queued speaking transitions
pub fn drain_speaking(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<bool> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::Speaking(speaking) = event {
            out.push(speaking);
        }
    }
    out
}

/// Generate sine wave audio samples
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn generate_sine_samples(sample_rate: u32, frequency: f32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

//! Voice I/O: microphone capture and scheduled playback

mod capture;
mod playback;

pub use capture::{CapturePipeline, ChunkAssembler, ChunkStream};
pub use playback::{PlaybackScheduler, SpeakingTransition};

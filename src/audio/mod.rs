//! Audio primitives: the PCM wire codec and the output clock

mod output;
pub mod pcm;

pub use output::{AudioOutput, CpalOutput, SourceEndedRx, SourceId};
pub use pcm::{AudioChunk, PlaybackFragment, WireBlob};

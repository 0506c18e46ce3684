//! Hardware-free doubles for the audio output

use crate::Result;
use crate::audio::{AudioOutput, PlaybackFragment, SourceId};

/// An [`AudioOutput`] whose clock only moves when told to
///
/// Records every start and stop so scheduling can be asserted on.
#[derive(Debug, Default)]
pub struct FakeOutput {
    now: f64,
    sample_rate: u32,
    starts: Vec<(SourceId, f64, f64)>,
    stopped: Vec<SourceId>,
}

impl FakeOutput {
    /// Create a fake output clocked at `sample_rate`, starting at time zero
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    /// Move the clock
    pub const fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    /// `(id, start, duration)` for every started source, in start order
    #[must_use]
    pub fn starts(&self) -> &[(SourceId, f64, f64)] {
        &self.starts
    }

    /// Ids passed to `stop`, in order
    #[must_use]
    pub fn stopped(&self) -> &[SourceId] {
        &self.stopped
    }
}

impl AudioOutput for FakeOutput {
    fn now(&self) -> f64 {
        self.now
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, id: SourceId, fragment: PlaybackFragment, at: f64) -> Result<()> {
        self.starts.push((id, at, fragment.duration()));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.stopped.push(id);
    }
}

//! Gapless, interruptible playback scheduling

use std::collections::BTreeSet;

use crate::Result;
use crate::audio::{AudioOutput, PlaybackFragment, SourceId};

/// Change in the "bot is speaking" state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakingTransition {
    /// First source became active
    Started,
    /// Last active source finished or was stopped
    Ended,
}

/// Schedules decoded fragments back to back on an output clock
///
/// Each fragment starts exactly where the previous one ends, or at the
/// clock's current time when the queue has drained.
pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    cursor: f64,
    active: BTreeSet<SourceId>,
    next_id: SourceId,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    /// Create a scheduler driving `output`
    pub const fn new(output: O) -> Self {
        Self {
            output,
            cursor: 0.0,
            active: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Queue a fragment right after everything already scheduled
    ///
    /// # Errors
    ///
    /// Returns error if the output rejects the fragment
    pub fn schedule(&mut self, fragment: PlaybackFragment) -> Result<Option<SpeakingTransition>> {
        self.cursor = self.cursor.max(self.output.now());

        let id = self.next_id;
        let duration = fragment.duration();
        self.output.start(id, fragment, self.cursor)?;

        self.next_id += 1;
        self.cursor += duration;

        let was_idle = self.active.is_empty();
        self.active.insert(id);

        tracing::trace!(id, start = self.cursor - duration, duration, "fragment scheduled");

        Ok(was_idle.then_some(SpeakingTransition::Started))
    }

    /// Handle a completion event from the output
    ///
    /// Events for sources already removed by an interrupt are ignored.
    pub fn on_source_ended(&mut self, id: SourceId) -> Option<SpeakingTransition> {
        if !self.active.remove(&id) {
            tracing::trace!(id, "ignoring completion for stopped source");
            return None;
        }
        self.active
            .is_empty()
            .then_some(SpeakingTransition::Ended)
    }

    /// Stop everything immediately and rewind the cursor to now
    pub fn interrupt(&mut self) -> Option<SpeakingTransition> {
        let was_speaking = !self.active.is_empty();
        let stopped = self.active.len();

        for id in std::mem::take(&mut self.active) {
            self.output.stop(id);
        }
        self.cursor = self.output.now();

        if was_speaking {
            tracing::debug!(stopped, "playback interrupted");
        }
        was_speaking.then_some(SpeakingTransition::Ended)
    }

    /// Flush playback on teardown
    pub fn shutdown(&mut self) -> Option<SpeakingTransition> {
        self.interrupt()
    }

    /// Whether any fragment is scheduled or playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Number of scheduled or playing fragments
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Earliest time the next fragment may start
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Native rate of the output clock
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    /// Borrow the output
    #[must_use]
    pub const fn output(&self) -> &O {
        &self.output
    }

    /// Mutably borrow the output
    pub const fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

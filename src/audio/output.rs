//! Output audio clock and mixer stream

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::pcm::{OUTPUT_SAMPLE_RATE, PlaybackFragment};
use crate::{Error, Result};

/// Identifies one scheduled fragment on an output
pub type SourceId = u64;

/// Receives one completion event per source that plays to the end
pub type SourceEndedRx = mpsc::UnboundedReceiver<SourceId>;

/// An output device with its own monotonic clock
///
/// Completion of a started source is reported once on the channel handed out
/// when the output was opened. Sources removed with [`AudioOutput::stop`] are
/// not reported.
pub trait AudioOutput {
    /// Current clock time in seconds
    fn now(&self) -> f64;

    /// Native sample rate of the clock
    fn sample_rate(&self) -> u32;

    /// Start `fragment` at absolute clock time `at`
    ///
    /// # Errors
    ///
    /// Returns error if the fragment cannot be queued
    fn start(&mut self, id: SourceId, fragment: PlaybackFragment, at: f64) -> Result<()>;

    /// Stop a source immediately
    fn stop(&mut self, id: SourceId);
}

/// A fragment queued on the mixer
struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    pos: usize,
}

/// State shared with the cpal callback
#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    /// Render `frames` mono samples starting at absolute frame `first`
    fn render(&mut self, first: u64, out: &mut [f32]) -> Vec<SourceId> {
        out.fill(0.0);

        for voice in &mut self.voices {
            for (offset, slot) in out.iter_mut().enumerate() {
                let frame = first + offset as u64;
                if frame < voice.start_frame || voice.pos >= voice.samples.len() {
                    continue;
                }
                *slot += voice.samples[voice.pos];
                voice.pos += 1;
            }
        }

        let mut ended = Vec::new();
        self.voices.retain(|voice| {
            let done = voice.pos >= voice.samples.len();
            if done {
                ended.push(voice.id);
            }
            !done
        });

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        ended
    }
}

/// Plays scheduled fragments on the default output device
///
/// The device's rendered frame count is the clock, so scheduled start times
/// line up sample-exactly.
pub struct CpalOutput {
    #[allow(dead_code)]
    stream: Stream,
    mixer: Arc<Mutex<Mixer>>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalOutput {
    /// Open the default output device
    ///
    /// Prefers a 24kHz config so model audio plays without resampling.
    ///
    /// # Errors
    ///
    /// Returns error if no output device or stream can be opened
    pub fn open() -> Result<(Self, SourceEndedRx)> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let config = Self::pick_config(&device)?;
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio output initialized"
        );

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let frames = Arc::new(AtomicU64::new(0));

        let callback_mixer = Arc::clone(&mixer);
        let callback_frames = Arc::clone(&frames);
        let mut mono = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frame_count = data.len() / channels;
                    mono.resize(frame_count, 0.0);

                    let first = callback_frames.load(Ordering::Acquire);
                    let ended = callback_mixer
                        .lock()
                        .map(|mut mixer| mixer.render(first, &mut mono))
                        .unwrap_or_default();
                    callback_frames.fetch_add(frame_count as u64, Ordering::Release);

                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(sample);
                    }

                    for id in ended {
                        let _ = ended_tx.send(id);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio output error");
                },
                None,
            )
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        Ok((
            Self {
                stream,
                mixer,
                frames,
                sample_rate,
            },
            ended_rx,
        ))
    }

    fn pick_config(device: &cpal::Device) -> Result<StreamConfig> {
        let wanted = SampleRate(OUTPUT_SAMPLE_RATE);
        let supports = |c: &cpal::SupportedStreamConfigRange| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= wanted
                && c.max_sample_rate() >= wanted
        };

        let configs: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .collect();

        // Mono first, then stereo, then whatever the device defaults to
        let preferred = configs
            .iter()
            .find(|c| c.channels() == 1 && supports(c))
            .or_else(|| configs.iter().find(|c| c.channels() == 2 && supports(c)));

        if let Some(range) = preferred {
            return Ok(range.clone().with_sample_rate(wanted).config());
        }

        device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::DeviceUnavailable(format!("no suitable output config: {e}")))
    }
}

impl AudioOutput for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn start(&mut self, id: SourceId, fragment: PlaybackFragment, at: f64) -> Result<()> {
        if fragment.sample_rate() != self.sample_rate {
            return Err(Error::Audio(format!(
                "fragment rate {} does not match output rate {}",
                fragment.sample_rate(),
                self.sample_rate
            )));
        }

        let start_frame = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("output mixer poisoned".to_string()))?;
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples: fragment.into_samples(),
            pos: 0,
        });
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.retain(|voice| voice.id != id);
        }
    }
}

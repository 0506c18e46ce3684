//! Microphone capture framed into fixed-size chunks

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::audio::AudioChunk;
use crate::audio::pcm::{CHUNK_SAMPLES, INPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Captured chunks in capture order, or the error that ended the stream
pub type ChunkStream = mpsc::UnboundedReceiver<Result<AudioChunk>>;

/// Frames an arbitrary stream of samples into fixed-size chunks
#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_len: usize,
    pending: Vec<f32>,
}

impl ChunkAssembler {
    /// Create an assembler emitting chunks of `chunk_len` samples
    #[must_use]
    pub fn new(chunk_len: usize) -> Self {
        Self {
            chunk_len,
            pending: Vec::with_capacity(chunk_len),
        }
    }

    /// Append samples, returning every chunk that became complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        let mut ready = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.chunk_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.chunk_len {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_len));
                ready.push(AudioChunk::new(full));
            }
        }

        ready
    }

    /// Samples waiting for the next chunk
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Captures audio from the default input device
///
/// Chunks are pushed into an unbounded channel from the audio thread, so a
/// slow consumer never stalls capture.
pub struct CapturePipeline {
    stream: Option<Stream>,
}

impl CapturePipeline {
    /// Acquire the microphone and start producing chunks
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the OS refuses microphone access and
    /// `DeviceUnavailable` if no usable input device exists
    pub fn start() -> Result<(Self, ChunkStream)> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let config = Self::pick_config(&device)?;
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = INPUT_SAMPLE_RATE,
            channels,
            "audio capture initialized"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let error_tx = tx.clone();
        let mut assembler = ChunkAssembler::new(CHUNK_SAMPLES);
        let mut mono = Vec::new();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = if channels == 1 {
                        data
                    } else {
                        downmix(data, channels, &mut mono);
                        mono.as_slice()
                    };
                    for chunk in assembler.push(samples) {
                        let _ = tx.send(Ok(chunk));
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let _ = error_tx.send(Err(Error::DeviceUnavailable(err.to_string())));
                },
                None,
            )
            .map_err(map_build_error)?;

        stream.play().map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        tracing::debug!("audio capture started");
        Ok((
            Self {
                stream: Some(stream),
            },
            rx,
        ))
    }

    fn pick_config(device: &cpal::Device) -> Result<StreamConfig> {
        let wanted = SampleRate(INPUT_SAMPLE_RATE);
        let mut configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .filter(|c| {
                c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= wanted
                    && c.max_sample_rate() >= wanted
            })
            .collect();

        // Fewest channels first so mono wins when offered
        configs.sort_by_key(cpal::SupportedStreamConfigRange::channels);

        configs
            .into_iter()
            .next()
            .map(|c| c.with_sample_rate(wanted).config())
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!(
                    "no input config supports {INPUT_SAMPLE_RATE} Hz f32"
                ))
            })
    }

    /// Release the microphone
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

/// Classify a stream build failure
fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::BackendSpecific { err } => {
            let description = err.description.to_lowercase();
            if description.contains("permission")
                || description.contains("denied")
                || description.contains("not authorized")
            {
                Error::PermissionDenied(err.description)
            } else {
                Error::DeviceUnavailable(err.description)
            }
        }
        other => Error::DeviceUnavailable(other.to_string()),
    }
}

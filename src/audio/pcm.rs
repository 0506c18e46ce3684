//! PCM16 wire codec and base64 transport encoding

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::{Error, Result};

/// Sample rate of captured microphone audio (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of model audio on the wire
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured chunk
pub const CHUNK_SAMPLES: usize = 4096;

/// MIME tag for outbound microphone audio
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A fixed-size block of captured mono input samples in [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
}

impl AudioChunk {
    /// Wrap captured samples
    #[must_use]
    pub const fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Captured samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// PCM16LE bytes tagged with their encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBlob {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl WireBlob {
    /// Encode a captured chunk for the wire
    ///
    /// # Errors
    ///
    /// Returns error if the chunk is empty
    pub fn from_chunk(chunk: &AudioChunk) -> Result<Self> {
        Ok(Self {
            mime_type: INPUT_MIME_TYPE,
            data: encode(chunk.samples())?,
        })
    }

    /// Base64 transport form of the payload
    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_base64(&self.data)
    }
}

/// Decoded model audio ready for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFragment {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PlaybackFragment {
    /// Build a fragment from mono samples at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if there are no samples or the rate is zero
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Decode("fragment has no samples".to_string()));
        }
        if sample_rate == 0 {
            return Err(Error::Decode("fragment sample rate is zero".to_string()));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Mono samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the fragment, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample rate of `samples`
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Convert normalized samples to PCM16 little-endian bytes
///
/// # Errors
///
/// Returns error if `samples` is empty
pub fn encode(samples: &[f32]) -> Result<Vec<u8>> {
    if samples.is_empty() {
        return Err(Error::Encoding("cannot encode an empty chunk".to_string()));
    }

    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample.clamp(-1.0, 1.0) * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Ok(bytes)
}

/// Decode PCM16LE bytes into a fragment at `target_rate`
///
/// A trailing odd byte is dropped. Audio is resampled when the rates differ.
///
/// # Errors
///
/// Returns error if no whole sample is present or resampling fails
pub fn decode(bytes: &[u8], source_rate: u32, target_rate: u32) -> Result<PlaybackFragment> {
    if bytes.len() < 2 {
        return Err(Error::Decode(format!(
            "need at least one sample, got {} bytes",
            bytes.len()
        )));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    let samples = if source_rate == target_rate {
        samples
    } else {
        resample(&samples, source_rate, target_rate)?
    };

    PlaybackFragment::new(samples, target_rate)
}

/// Encode bytes as standard base64 without line wrapping
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode standard base64
///
/// # Errors
///
/// Returns error on characters outside the standard alphabet or bad padding
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    B64.decode(text)
        .map_err(|e| Error::Encoding(format!("invalid base64 payload: {e}")))
}

/// Resample mono audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Decode(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    let mut chunks = input.chunks_exact(chunk_size);
    for chunk in &mut chunks {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Decode(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let result = resampler
            .process_partial(Some(&[remainder]), None)
            .map_err(|e| Error::Decode(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush the filter delay so the tail of the fragment is not lost
    let tail = resampler
        .process_partial::<&[f64]>(None, None)
        .map_err(|e| Error::Decode(format!("resample failed: {e}")))?;
    output.extend_from_slice(&tail[0]);

    // Drop the leading delay and trim to the exact expected length
    let delay = resampler.output_delay();
    let expected = (input.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}

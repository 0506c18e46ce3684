//! Voice pipeline integration tests
//!
//! Tests the codec and playback scheduling without requiring audio hardware

use voicetask::Error;
use voicetask::audio::{PlaybackFragment, WireBlob, pcm};
use voicetask::testing::FakeOutput;
use voicetask::voice::{ChunkAssembler, PlaybackScheduler, SpeakingTransition};

mod common;
use common::generate_sine_samples;

fn fragment(seconds: f64) -> PlaybackFragment {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (f64::from(pcm::OUTPUT_SAMPLE_RATE) * seconds) as usize;
    PlaybackFragment::new(vec![0.1; len], pcm::OUTPUT_SAMPLE_RATE).unwrap()
}

#[test]
fn test_zeros_survive_encode_decode() {
    let bytes = pcm::encode(&[0.0; 512]).unwrap();
    assert_eq!(bytes.len(), 1024);

    let decoded = pcm::decode(&bytes, pcm::INPUT_SAMPLE_RATE, pcm::INPUT_SAMPLE_RATE).unwrap();
    assert_eq!(decoded.samples().len(), 512);
    assert!(decoded.samples().iter().all(|s| *s == 0.0));
}

#[test]
fn test_empty_decode_fails() {
    assert!(matches!(
        pcm::decode(&[], pcm::OUTPUT_SAMPLE_RATE, pcm::OUTPUT_SAMPLE_RATE),
        Err(Error::Decode(_))
    ));
}

#[test]
fn test_encoding_saturates_out_of_range() {
    let bytes = pcm::encode(&[2.0, -2.0]).unwrap();
    let values: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert_eq!(values, vec![i16::MAX, i16::MIN]);
}

#[test]
fn test_sine_keeps_shape_through_codec() {
    let samples = generate_sine_samples(pcm::INPUT_SAMPLE_RATE, 440.0, 0.1);
    let bytes = pcm::encode(&samples).unwrap();
    let decoded = pcm::decode(&bytes, pcm::INPUT_SAMPLE_RATE, pcm::INPUT_SAMPLE_RATE).unwrap();

    let max_error = samples
        .iter()
        .zip(decoded.samples())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(max_error < 1.0 / 16384.0);
}

#[test]
fn test_decode_resamples_to_device_rate() {
    let bytes = vec![0u8; 9600];
    let fragment = pcm::decode(&bytes, pcm::OUTPUT_SAMPLE_RATE, 48_000).unwrap();
    assert_eq!(fragment.sample_rate(), 48_000);
    assert!((fragment.duration() - 0.2).abs() < 1e-6);
}

#[test]
fn test_wire_blob_from_captured_audio() {
    let mut assembler = ChunkAssembler::new(pcm::CHUNK_SAMPLES);
    let captured = generate_sine_samples(pcm::INPUT_SAMPLE_RATE, 220.0, 0.6);
    let chunks = assembler.push(&captured);

    // 0.6 s at 16 kHz is 9600 samples: two full chunks
    assert_eq!(chunks.len(), 2);
    assert_eq!(assembler.pending(), 9600 - 2 * pcm::CHUNK_SAMPLES);

    let blob = WireBlob::from_chunk(&chunks[0]).unwrap();
    assert_eq!(blob.mime_type, pcm::INPUT_MIME_TYPE);
    assert_eq!(blob.data.len(), pcm::CHUNK_SAMPLES * 2);
}

#[test]
fn test_scheduled_fragments_never_overlap() {
    let mut scheduler = PlaybackScheduler::new(FakeOutput::new(pcm::OUTPUT_SAMPLE_RATE));

    for (i, seconds) in [0.2, 0.05, 0.5, 0.1, 0.3].into_iter().enumerate() {
        // The clock creeps forward but never catches the cursor
        #[allow(clippy::cast_precision_loss)]
        scheduler.output_mut().set_now(i as f64 * 0.01);
        scheduler.schedule(fragment(seconds)).unwrap();
    }

    let starts = scheduler.output().starts();
    for pair in starts.windows(2) {
        let (_, start, duration) = pair[0];
        assert!((pair[1].1 - (start + duration)).abs() < 1e-9);
    }
    assert!((scheduler.cursor() - 1.15).abs() < 1e-9);
}

#[test]
fn test_late_fragment_starts_at_clock() {
    let mut scheduler = PlaybackScheduler::new(FakeOutput::new(pcm::OUTPUT_SAMPLE_RATE));
    scheduler.schedule(fragment(0.2)).unwrap();

    scheduler.output_mut().set_now(1.0);
    scheduler.schedule(fragment(0.2)).unwrap();

    assert!((scheduler.output().starts()[1].1 - 1.0).abs() < 1e-9);
}

#[test]
fn test_interrupt_then_resume() {
    let mut scheduler = PlaybackScheduler::new(FakeOutput::new(pcm::OUTPUT_SAMPLE_RATE));
    assert_eq!(
        scheduler.schedule(fragment(0.5)).unwrap(),
        Some(SpeakingTransition::Started)
    );
    scheduler.schedule(fragment(0.5)).unwrap();

    scheduler.output_mut().set_now(0.3);
    assert_eq!(scheduler.interrupt(), Some(SpeakingTransition::Ended));
    assert_eq!(scheduler.active_count(), 0);
    assert!((scheduler.cursor() - 0.3).abs() < 1e-9);

    // New speech begins right away, not after the flushed audio
    assert_eq!(
        scheduler.schedule(fragment(0.1)).unwrap(),
        Some(SpeakingTransition::Started)
    );
    assert!((scheduler.output().starts()[2].1 - 0.3).abs() < 1e-9);
}

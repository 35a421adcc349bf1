//! Master capture and offline bounce tests.
//!
//! The master recorder taps the post-limiter mix from a pumped offline
//! station, so the encoded takes here carry exactly what the speakers
//! would have played. Run with:
//!
//! ```bash
//! cargo test -p segno --test master_capture_tests
//! ```

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::tolerances::*;
use helpers::*;
use segno::prelude::*;
use segno::MasterTake;

/// Decode an in-memory WAV into its spec and interleaved samples,
/// normalizing integer formats to float.
fn decode_wav(bytes: &[u8]) -> (hound::WavSpec, Vec<f32>) {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes)).expect("wav decode");
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.expect("sample"))
            .collect(),
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.expect("sample") as f32 / 32_767.0)
            .collect(),
    };
    (spec, samples)
}

fn capture_take(format: MasterCaptureFormat) -> MasterTake {
    let station = offline_station();
    station.load_wav_to_track(0, &dc_wav(0.5, 2.0)).unwrap();
    station.play_track(0).unwrap();

    station.start_master_recording().unwrap();
    pump_paced(&station, 24);
    assert!(
        wait_until(|| station.master_recorded_secs() >= 0.25),
        "capture never reached a quarter second"
    );
    station
        .stop_master_recording(format)
        .unwrap()
        .expect("finished take")
}

#[test]
fn master_capture_encodes_the_mix() {
    let take = capture_take(MasterCaptureFormat::Float32);
    assert_eq!(take.sample_rate, 48_000);
    assert!(
        (12_000..=12_288).contains(&take.frames),
        "unexpected frame count {}",
        take.frames
    );

    let (spec, samples) = decode_wav(&take.wav);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(spec.sample_format, hound::SampleFormat::Float);
    assert_eq!(spec.bits_per_sample, 32);
    assert_eq!(samples.len() as u64, take.frames * 2);

    // Edge fades zero the first frame; the interior is untouched.
    assert!(samples[0].abs() < FLOAT_EPSILON);
    assert!((samples[2_000] - 0.5).abs() < FLOAT_EPSILON);
    assert!((samples[2_001] - 0.5).abs() < FLOAT_EPSILON);
}

#[test]
fn master_capture_can_encode_int16() {
    let take = capture_take(MasterCaptureFormat::Int16);
    let (spec, samples) = decode_wav(&take.wav);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(spec.bits_per_sample, 16);
    assert!((samples[2_000] - 0.5).abs() < PERCEPTUAL_EPSILON);
}

#[test]
fn silent_capture_yields_a_short_quiet_take() {
    let station = offline_station();
    station.start_master_recording().unwrap();
    let take = station
        .stop_master_recording(MasterCaptureFormat::Float32)
        .unwrap()
        .expect("take");
    assert_eq!(take.frames, 64);
    let (_, samples) = decode_wav(&take.wav);
    assert!(samples.iter().all(|s| s.abs() <= SILENCE_THRESHOLD));
}

#[test]
fn second_master_capture_reports_busy() {
    let station = offline_station();
    station.start_master_recording().unwrap();
    assert!(matches!(
        station.start_master_recording(),
        Err(Error::MasterRecordingBusy)
    ));
    station
        .stop_master_recording(MasterCaptureFormat::Float32)
        .unwrap();
}

#[test]
fn master_stop_without_a_capture_is_a_no_op() {
    let station = offline_station();
    assert!(station
        .stop_master_recording(MasterCaptureFormat::Float32)
        .unwrap()
        .is_none());
    assert_eq!(station.master_recorded_secs(), 0.0);
}

#[test]
fn bounce_renders_the_mix_on_demand() {
    let station = offline_station();
    station.load_wav_to_track(0, &dc_wav(0.5, 2.0)).unwrap();
    station.play_track(0).unwrap();

    let before = station.current_time();
    let wav = station.bounce(0.5, MasterCaptureFormat::Float32).unwrap();
    let (spec, samples) = decode_wav(&wav);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(samples.len(), 24_000 * 2);
    // Bounces are raw renders, no edge fades.
    assert!((samples[0] - 0.5).abs() < FLOAT_EPSILON);
    assert!((samples[23_999 * 2] - 0.5).abs() < FLOAT_EPSILON);

    // The bounce consumed half a second of the timeline.
    assert!((station.current_time() - before - 0.5).abs() < 1e-9);
}

#[test]
fn bounce_can_encode_int16() {
    let station = offline_station();
    station.load_wav_to_track(0, &dc_wav(0.5, 1.0)).unwrap();
    station.play_track(0).unwrap();
    let wav = station.bounce(0.1, MasterCaptureFormat::Int16).unwrap();
    let (spec, samples) = decode_wav(&wav);
    assert_eq!(spec.bits_per_sample, 16);
    assert!((samples[100] - 0.5).abs() < PERCEPTUAL_EPSILON);
}

#[test]
fn non_positive_bounce_lengths_render_nothing() {
    let station = offline_station();
    let wav = station.bounce(-1.0, MasterCaptureFormat::Float32).unwrap();
    let (_, samples) = decode_wav(&wav);
    assert!(samples.is_empty());
}

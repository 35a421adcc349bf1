//! Shared fixtures for the station integration tests.
//!
//! Every test here runs against an offline station: the renderer is
//! pumped by hand and no audio device is ever opened. Recording paths
//! use detached capture streams fed from the test thread instead of a
//! microphone.
//!
//! ## Tolerance Levels
//!
//! Use the matching constant from [`tolerances`]:
//! - `FLOAT_EPSILON` (1e-6): exact routing, unity gain
//! - `DSP_EPSILON` (1e-4): anything that crossed a filter or a ramp
//! - `PERCEPTUAL_EPSILON` (0.001): perceptual equivalence (-60 dB)
//! - `SILENCE_THRESHOLD` (0.0001): silence detection (-80 dB)

pub mod tolerances;

use segno::prelude::*;
use std::time::Duration;

/// Sample rate every fixture runs at.
pub const TEST_SAMPLE_RATE: f64 = 48_000.0;

/// Block size used when pumping the renderer.
pub const TEST_BLOCK: usize = 512;

/// Route engine logs to the test harness; `RUST_LOG` filters as usual.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An offline station with the default four tracks.
pub fn offline_station() -> Station {
    offline_station_with_tracks(4)
}

/// An offline station with `tracks` strips.
pub fn offline_station_with_tracks(tracks: usize) -> Station {
    init_logging();
    Station::builder()
        .sample_rate(TEST_SAMPLE_RATE)
        .buffer_frames(TEST_BLOCK as u32)
        .tracks(tracks)
        .build_offline()
        .expect("offline station")
}

/// Render whole blocks and collect the output.
pub fn pump_blocks(station: &Station, blocks: usize) -> Vec<(f32, f32)> {
    let mut out = Vec::with_capacity(blocks * TEST_BLOCK);
    for _ in 0..blocks {
        out.extend(station.pump(TEST_BLOCK).expect("offline pump"));
    }
    out
}

/// Render at least `secs` of audio in block-sized steps.
pub fn pump_secs(station: &Station, secs: f64) -> Vec<(f32, f32)> {
    let blocks = ((secs * TEST_SAMPLE_RATE) / TEST_BLOCK as f64).ceil() as usize;
    pump_blocks(station, blocks.max(1))
}

/// Render blocks with short pauses so collectors draining a bounded
/// tap (master capture, cast) keep up with the producer.
pub fn pump_paced(station: &Station, blocks: usize) -> Vec<(f32, f32)> {
    let mut out = Vec::with_capacity(blocks * TEST_BLOCK);
    let mut remaining = blocks;
    while remaining > 0 {
        let step = remaining.min(4);
        out.extend(pump_blocks(station, step));
        remaining -= step;
        std::thread::sleep(Duration::from_millis(5));
    }
    out
}

/// Stereo WAV bytes holding a constant value.
pub fn dc_wav(value: f32, secs: f64) -> Vec<u8> {
    let n = (secs * TEST_SAMPLE_RATE) as usize;
    segno::encode_wav_f32(&vec![value; n], &vec![value; n], TEST_SAMPLE_RATE as u32)
        .expect("wav encode")
}

/// Stereo WAV bytes holding a sine at `freq` Hz with `amp` peak.
pub fn sine_wav(freq: f64, amp: f32, secs: f64) -> Vec<u8> {
    let n = (secs * TEST_SAMPLE_RATE) as usize;
    let samples: Vec<f32> = (0..n)
        .map(|i| {
            let t = i as f64 / TEST_SAMPLE_RATE;
            (2.0 * std::f64::consts::PI * freq * t).sin() as f32 * amp
        })
        .collect();
    segno::encode_wav_f32(&samples, &samples, TEST_SAMPLE_RATE as u32).expect("wav encode")
}

/// Stereo WAV bytes holding uniform noise with `amp` peak.
pub fn noise_wav(amp: f32, secs: f64) -> Vec<u8> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let n = (secs * TEST_SAMPLE_RATE) as usize;
    let samples: Vec<f32> = (0..n).map(|_| rng.gen_range(-amp..=amp)).collect();
    segno::encode_wav_f32(&samples, &samples, TEST_SAMPLE_RATE as u32).expect("wav encode")
}

/// RMS of one channel.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute amplitude of one channel.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

/// Split pumped frames into left and right channel vectors.
pub fn split_channels(frames: &[(f32, f32)]) -> (Vec<f32>, Vec<f32>) {
    frames.iter().copied().unzip()
}

/// Peak absolute amplitude across both channels.
pub fn stereo_peak(frames: &[(f32, f32)]) -> f32 {
    frames
        .iter()
        .map(|&(l, r)| l.abs().max(r.abs()))
        .fold(0.0_f32, f32::max)
}

/// Assert that a stretch of output is effectively silent.
pub fn assert_silence(frames: &[(f32, f32)]) {
    let max = stereo_peak(frames);
    assert!(
        max <= tolerances::SILENCE_THRESHOLD,
        "expected silence, peak was {max}"
    );
}

/// Assert that a stretch of output carries audio.
pub fn assert_has_audio(frames: &[(f32, f32)], min_rms: f32) {
    let (left, _) = split_channels(frames);
    let r = rms(&left);
    assert!(r >= min_rms, "expected RMS >= {min_rms}, got {r}");
}

/// Poll `cond` for up to two seconds; true once it holds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Feed a detached capture stream in paced chunks so a recorder's
/// collector keeps up and the bounded tap never overflows.
pub fn feed_paced(stream: &segno::capture::SharedStream, frames: &[(f32, f32)]) {
    for chunk in frames.chunks(2_048) {
        stream.feed(chunk);
        std::thread::sleep(Duration::from_millis(5));
    }
}

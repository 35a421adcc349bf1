//! LFO and parameter-binding tests.
//!
//! Bindings with a collapsed range (`min == max`) pin their target to a
//! known value, which makes the modulation path assertable on pumped
//! audio without chasing oscillator phase. Run with:
//!
//! ```bash
//! cargo test -p segno --test lfo_binding_tests
//! ```

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::tolerances::*;
use helpers::*;
use segno::core::LFO_COUNT;
use segno::prelude::*;

fn pinned(lfo: usize, value: f32) -> LfoBinding {
    LfoBinding {
        lfo,
        min: value,
        max: value,
        reversed: false,
    }
}

fn playing_station() -> Station {
    let station = offline_station();
    station.load_wav_to_track(0, &dc_wav(0.5, 4.0)).unwrap();
    station.play_track(0).unwrap();
    station
}

#[test]
fn lfo_bank_bounds_are_enforced() {
    let station = offline_station();
    station.set_lfo(0, 2.0, true).unwrap();
    station.set_lfo(1, 0.5, true).unwrap();
    assert!(station.set_lfo(LFO_COUNT, 2.0, true).is_err());
    assert!(station.lfo_meter(LFO_COUNT).is_err());
}

#[test]
fn lfo_meter_follows_the_rendered_oscillator() {
    let station = offline_station();
    assert_eq!(station.lfo_meter(0).unwrap(), 0.0);

    station.set_lfo(0, 2.0, true).unwrap();
    pump_blocks(&station, 10);
    let early = station.lfo_meter(0).unwrap();
    assert!((-1.0..=1.0).contains(&early));
    assert!(early.abs() > 0.01, "oscillator never moved: {early}");

    pump_blocks(&station, 10);
    let later = station.lfo_meter(0).unwrap();
    assert!((early - later).abs() > 0.05, "meter froze at {early}");

    // Disabling resets the meter.
    station.set_lfo(0, 2.0, false).unwrap();
    assert_eq!(station.lfo_meter(0).unwrap(), 0.0);
}

#[test]
fn volume_binding_overrides_the_fader() {
    let station = playing_station();
    station.set_lfo(0, 2.0, true).unwrap();
    station
        .bind_lfo(0, ParamTarget::Volume, pinned(0, 0.0))
        .unwrap();
    pump_blocks(&station, 1);
    assert_silence(&pump_blocks(&station, 2));

    // Unbinding falls back to the fader.
    assert!(station.unbind_lfo(0, ParamTarget::Volume).unwrap());
    pump_blocks(&station, 1);
    let out = pump_blocks(&station, 1);
    assert!((out[10].0 - 0.5).abs() < DSP_EPSILON, "got {}", out[10].0);
}

#[test]
fn bound_values_replace_the_base_instead_of_scaling_it() {
    let station = playing_station();
    station.track(0).unwrap().set_volume(0.2);
    station.set_lfo(0, 2.0, true).unwrap();
    station
        .bind_lfo(0, ParamTarget::Volume, pinned(0, 1.0))
        .unwrap();
    pump_blocks(&station, 2);
    let out = pump_blocks(&station, 1);
    assert!((out[10].0 - 0.5).abs() < DSP_EPSILON, "got {}", out[10].0);
}

#[test]
fn pan_binding_steers_the_image() {
    let station = playing_station();
    station.set_lfo(1, 0.2, true).unwrap();
    station
        .bind_lfo(0, ParamTarget::Pan, pinned(1, -1.0))
        .unwrap();
    pump_blocks(&station, 2);
    let out = pump_blocks(&station, 2);
    let (left, right) = split_channels(&out);
    let expected = 0.5 * std::f32::consts::SQRT_2;
    assert!((peak(&left) - expected).abs() < DSP_EPSILON);
    assert!(peak(&right) < SILENCE_THRESHOLD);
}

#[test]
fn rebinding_a_target_replaces_the_connection() {
    let station = playing_station();
    station.set_lfo(0, 2.0, true).unwrap();
    station
        .bind_lfo(0, ParamTarget::Volume, pinned(0, 0.0))
        .unwrap();
    pump_blocks(&station, 1);
    assert_silence(&pump_blocks(&station, 2));

    station
        .bind_lfo(0, ParamTarget::Volume, pinned(0, 1.0))
        .unwrap();
    pump_blocks(&station, 1);
    let out = pump_blocks(&station, 1);
    assert!((out[10].0 - 0.5).abs() < DSP_EPSILON, "got {}", out[10].0);
}

#[test]
fn disabled_lfos_leave_the_base_value() {
    let station = playing_station();
    station.set_lfo(0, 2.0, false).unwrap();
    station
        .bind_lfo(0, ParamTarget::Volume, pinned(0, 0.0))
        .unwrap();
    pump_blocks(&station, 2);
    let out = pump_blocks(&station, 1);
    assert!((out[10].0 - 0.5).abs() < DSP_EPSILON, "got {}", out[10].0);
}

#[test]
fn invalid_bindings_are_rejected() {
    let station = offline_station();
    assert!(station
        .bind_lfo(0, ParamTarget::Volume, pinned(LFO_COUNT, 0.5))
        .is_err());
    assert!(station
        .bind_lfo(99, ParamTarget::Volume, pinned(0, 0.5))
        .is_err());
    assert!(!station.unbind_lfo(0, ParamTarget::Volume).unwrap());
}

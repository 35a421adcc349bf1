//! Tolerance constants for audio assertions.
//!
//! Different stages of the graph deserve different precision: exact
//! routing is held to float rounding, anything that crossed a filter
//! or a quantizer gets the looser bounds.

/// Floating point rounding errors (passthrough, exact gain).
pub const FLOAT_EPSILON: f32 = 1e-6;

/// DSP processing tolerance (EQ at flat settings, gain ramps).
pub const DSP_EPSILON: f32 = 1e-4;

/// Perceptual tolerance (~-60 dB, inaudible differences).
pub const PERCEPTUAL_EPSILON: f32 = 0.001;

/// Values below this count as silence (~-80 dB).
pub const SILENCE_THRESHOLD: f32 = 0.0001;

/// One 24-bit quantization step, for cast round trips.
pub const INT24_EPSILON: f32 = 1.0 / 8_388_608.0;

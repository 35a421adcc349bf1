//! Performance pad sampler for the segno looping station.
//!
//! Twenty pads, each with its own voice: one-shot, gate or toggle
//! response, choke groups, per-voice gain, pitch and loop flag, and an
//! optional color chain ("character"). The control-side
//! [`SamplerEngine`] is lock-free throughout; its [`SamplerRenderer`]
//! half runs inside the station callback and adds voices either to the
//! shared sampler bus or into a track strip's aux input.
//!
//! # Example
//!
//! ```ignore
//! use segno_sampler::{PadMode, SamplerEngine};
//!
//! let (sampler, renderer) = SamplerEngine::new(4);
//! sampler.assign_file(0, "kick.wav")?;
//! sampler.set_character(0, "grit")?;
//! sampler.trigger_pad(0, 1.0)?;
//! ```

pub mod error;
pub use error::{Error, Result};

// Pad state cells and the render-side voice machine.
mod voice;
pub use voice::{ChokeGroup, PadMode, VoiceRoute, VoiceUnit, DECLICK_SECS, PAD_COUNT, TRACK_PAD_BASE};

// Per-voice color processing.
mod character;
pub use character::{CharacterChain, CharacterProfile, LIMITER_CEILING};

// Control surface and block renderer.
mod engine;
pub use engine::{SamplerEngine, SamplerRenderer, PITCH_MAX, PITCH_MIN, VOICE_GAIN_MAX};

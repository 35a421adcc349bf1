//! Track channels for the segno looping station.
//!
//! Each track pairs a control-side [`TrackChannel`] with a render-side
//! [`TrackRenderer`]. The channel owns samples, transport, loop region,
//! 3-band EQ, seven effect slots plus an audition slot, LFO bindings,
//! the live input connection and the sample recorder; the renderer runs
//! the strip inside the station callback without locks or allocation.
//!
//! # Example
//!
//! ```ignore
//! use segno_track::{EffectRegistry, TrackChannel};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(EffectRegistry::with_builtins());
//! let (track, renderer) = TrackChannel::new(0, 48_000.0, registry);
//! track.load_sample_file("loop.wav")?;
//! track.set_loop(0.0, 4.0);
//! track.set_loop_enabled(true);
//! track.play();
//! ```

pub mod error;
pub use error::{Error, Result};

// Control and render halves of a track.
mod channel;
pub use channel::{
    LoopRegion, TrackChannel, TrackParams, INPUT_GAIN_MAX, PITCH_PCT_MAX, RATE_MAX, RATE_MIN,
    VOLUME_MAX,
};
mod render;
pub use render::TrackRenderer;

// Loop transport math, pure and shared with the tests.
pub mod transport;
pub use transport::{TransportState, MIN_LOOP_SECS};

// Sample storage and WAV codec.
pub mod sample;
pub use sample::{encode_wav_f32, encode_wav_i16, SampleBuffer};

// Capture-to-sample recorder.
pub mod recorder;
pub use recorder::{RecordedSample, RecorderState, SampleRecorder};

// Effect slots and the fixed EQ.
pub mod fx;
pub use fx::{Effect, EffectRegistry, EqParams, SlotBank, SlotSpec, SLOT_COUNT};

// LFO-to-parameter bindings.
pub mod bindings;
pub use bindings::{BindingTable, LfoBinding, ParamTarget};
